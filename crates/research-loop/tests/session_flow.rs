//! End-to-end session tests.
//!
//! A scripted host surface and scripted backends drive the controller
//! through whole sessions under paused tokio time, so every poll tick and
//! timeout fires deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use research_loop::prelude::*;
use research_loop::session::NO_SEARCH_RESULTS;

// ── Fake host surface ────────────────────────────────────────────────

#[derive(Default)]
struct HostState {
    /// One entry per auto-submitted question. Each reply is a list of
    /// stages; every content check reveals the next stage.
    replies: VecDeque<Vec<String>>,
    stages: VecDeque<String>,
    content: String,
    seen: bool,
    submissions: Vec<(String, bool)>,
    resets: usize,
}

#[derive(Default)]
struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    fn with_replies(replies: Vec<Vec<String>>) -> Arc<Self> {
        let host = Self::default();
        host.state.lock().unwrap().replies = replies.into();
        Arc::new(host)
    }

    fn submissions(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().submissions.clone()
    }

    fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    fn advance(state: &mut HostState) {
        if let Some(next) = state.stages.pop_front() {
            state.content = next;
            state.seen = false;
        }
    }
}

impl HostSurface for FakeHost {
    fn submit_question<'a>(&'a self, text: &'a str, auto_submit: bool) -> SurfaceFuture<'a, ()> {
        let mut s = self.state.lock().unwrap();
        s.submissions.push((text.to_string(), auto_submit));
        if auto_submit && let Some(reply) = s.replies.pop_front() {
            s.stages = reply.into();
        }
        Box::pin(async { Ok(()) })
    }

    fn is_producing_output(&self) -> SurfaceFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }

    fn check_for_new_content(&self) -> SurfaceFuture<'_, Option<String>> {
        let mut s = self.state.lock().unwrap();
        Self::advance(&mut s);
        let fresh = (!s.seen && !s.content.is_empty()).then(|| s.content.clone());
        Box::pin(async move { Ok(fresh) })
    }

    fn check_for_content_growth(&self, min_length: usize) -> SurfaceFuture<'_, Option<String>> {
        let mut s = self.state.lock().unwrap();
        Self::advance(&mut s);
        let grown = (s.content.chars().count() >= min_length).then(|| s.content.clone());
        Box::pin(async move { Ok(grown) })
    }

    fn mark_current_content_as_seen(&self) -> SurfaceFuture<'_, ()> {
        self.state.lock().unwrap().seen = true;
        Box::pin(async { Ok(()) })
    }

    fn reset_conversation(&self) -> SurfaceFuture<'_, ()> {
        self.state.lock().unwrap().resets += 1;
        Box::pin(async { Ok(()) })
    }
}

// ── Fake backends ────────────────────────────────────────────────────

type Reply = Box<dyn Fn(usize) -> Result<String, String> + Send + Sync>;

/// Backend whose reply depends on the call index. Calls at or after
/// `slow_from` sleep for `delay` first.
struct Scripted {
    reply: Reply,
    calls: AtomicUsize,
    slow_from: usize,
    delay: Duration,
}

impl Scripted {
    fn new(reply: impl Fn(usize) -> Result<String, String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
            slow_from: usize::MAX,
            delay: Duration::ZERO,
        }
    }

    fn slow_from(mut self, call: usize, delay: Duration) -> Self {
        self.slow_from = call;
        self.delay = delay;
        self
    }
}

impl ReasoningBackend for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete<'a>(&'a self, _request: CompletionRequest<'a>) -> BackendFuture<'a> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = if n >= self.slow_from { self.delay } else { Duration::ZERO };
        let result = (self.reply)(n);
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

fn extractor() -> Scripted {
    Scripted::new(|_| Ok("1. Claim alpha holds in practice\n2. Claim beta was measured".into()))
}

fn synthesizer() -> Scripted {
    Scripted::new(|n| {
        Ok(format!(
            "### Self-Assessment\nCoverage is improving.\n\n\
             ### Synthesis\nSynthesis for call {n}.\n\n\
             ### Follow-up Question\nWhat explains observation number {n}?"
        ))
    })
}

fn failing() -> Scripted {
    Scripted::new(|_| Err("HTTP 503".into()))
}

struct OneHit;

impl SearchBackend for OneHit {
    fn name(&self) -> &str {
        "one-hit"
    }

    fn search<'a>(&'a self, query: &'a str, _count: usize) -> SearchFuture<'a> {
        let hit = SearchResult {
            title: format!("About {query}"),
            url: "https://example.org/source".into(),
            description: "Independent measurement".into(),
        };
        Box::pin(async move { vec![hit] })
    }
}

fn report(round: usize) -> String {
    format!("Round {round} findings. {}", "Detailed evidence text. ".repeat(25))
}

fn controller_with(
    host: Arc<FakeHost>,
    a: Scripted,
    b: Scripted,
    search: Arc<dyn SearchBackend>,
    config: LoopConfig,
) -> SessionController {
    let pipeline = AnalysisPipeline::new(Arc::new(a), Arc::new(b), search, PipelineLimits::default());
    SessionController::new(host, pipeline, config)
}

fn controller(host: Arc<FakeHost>) -> SessionController {
    controller_with(
        host,
        extractor(),
        synthesizer(),
        Arc::new(OneHit),
        LoopConfig::default(),
    )
}

fn steps(snapshot: &SessionSnapshot) -> Vec<&str> {
    snapshot.progress_log.iter().map(|e| e.step.as_str()).collect()
}

// ── Full sessions ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn three_auto_rounds_end_with_host_summary() {
    let host = FakeHost::with_replies(vec![
        vec![report(1)],
        vec![report(2)],
        vec![report(3)],
        vec!["Final cumulative summary from the host.".into()],
    ]);
    let c = controller(Arc::clone(&host));

    let finished = Arc::new(AtomicUsize::new(0));
    let seen_final_wait = Arc::new(AtomicUsize::new(0));
    let (f, w) = (Arc::clone(&finished), Arc::clone(&seen_final_wait));
    c.subscribe(Arc::new(FnEventHandler::new(move |event: &SessionEvent<'_>| {
        match event {
            SessionEvent::StateChanged {
                to: SessionState::WaitingFinalReport,
                ..
            } => {
                w.fetch_add(1, Ordering::SeqCst);
            }
            SessionEvent::Finished { .. } => {
                f.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    })));

    c.start("T", StartOptions::default().max_rounds(3), Some("rs-test".into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(c.get_session().is_none());
    assert!(!c.is_polling());
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(seen_final_wait.load(Ordering::SeqCst), 1);

    let last = c.last_session().unwrap();
    assert_eq!(last.state, SessionState::Idle);
    assert_eq!(last.reports.len(), 3);
    assert_eq!(last.analyses.len(), 3);
    for (i, (r, a)) in last.reports.iter().zip(&last.analyses).enumerate() {
        assert_eq!(r.round as usize, i + 1);
        assert_eq!(a.round as usize, i + 1);
    }
    assert_eq!(last.round, 4);
    let final_report = last.final_report.as_ref().unwrap();
    assert_eq!(final_report.source, FinalReportSource::HostSurface);
    assert_eq!(final_report.text, "Final cumulative summary from the host.");
    assert_eq!(last.usage.backend_a_calls, 3);
    assert_eq!(last.usage.backend_b_calls, 3);

    // topic, two follow-ups, then the summary request; the last round's
    // follow-up is never sent
    let sent = host.submissions();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0], ("T".to_string(), true));
    assert!(sent[1].0.starts_with("What explains observation number 0?"));
    assert!(sent[1].0.contains("https://example.org/source"));
    assert!(sent.iter().all(|(_, auto)| *auto));

    // reset runs after the configured delay
    assert_eq!(host.resets(), 1);

    let rendered = c.generate_report();
    assert!(rendered.contains("## Final Summary"));
    assert!(rendered.find("## Round 1").unwrap() < rendered.find("## Round 2").unwrap());
    assert!(rendered.find("## Round 2").unwrap() < rendered.find("## Round 3").unwrap());
    assert!(rendered.contains("Backend calls: A=3 B=3"));
}

#[tokio::test(start_paused = true)]
async fn short_first_response_waits_for_growth() {
    let host = FakeHost::with_replies(vec![vec![
        "x".repeat(50),
        "y".repeat(150),
        "z".repeat(600),
    ]]);
    let c = controller(Arc::clone(&host));
    c.start("growth", StartOptions::default().max_rounds(2), None)
        .await
        .unwrap();

    // first tick sees 50 chars
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    let snap = c.get_session().unwrap();
    assert!(snap.waiting_for_growth);
    assert!(snap.reports.is_empty());
    assert_eq!(snap.state, SessionState::WaitingResearch);
    assert!(steps(&snap).contains(&"Short response detected"));

    // second tick: 150 chars is below the threshold
    tokio::time::sleep(Duration::from_secs(5)).await;
    let snap = c.get_session().unwrap();
    assert!(snap.waiting_for_growth);
    assert!(snap.reports.is_empty());

    // third tick: 600 chars is accepted as the report
    tokio::time::sleep(Duration::from_secs(6)).await;
    let snap = c.get_session().unwrap();
    assert!(!snap.waiting_for_growth);
    assert_eq!(snap.reports.len(), 1);
    assert_eq!(snap.reports[0].content, "z".repeat(600));
    assert_eq!(snap.analyses.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_and_session_untouched() {
    let host = FakeHost::with_replies(vec![]);
    let c = controller(Arc::clone(&host));
    let first = c.start("first", StartOptions::default(), None).await.unwrap();

    match c.start("second", StartOptions::default(), None).await {
        Err(ControllerError::SessionAlreadyActive { session_id, topic }) => {
            assert_eq!(session_id, first.session_id);
            assert_eq!(topic, "first");
        }
        other => panic!("expected SessionAlreadyActive, got {other:?}"),
    }

    let snap = c.get_session().unwrap();
    assert_eq!(snap.session_id, first.session_id);
    assert_eq!(snap.topic, "first");
    assert_eq!(snap.progress_log.len(), first.progress_log.len());
    assert_eq!(host.submissions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_analysis_keeps_completed_rounds_only() {
    let host = FakeHost::with_replies(vec![vec![report(1)], vec![report(2)]]);
    let c = controller_with(
        Arc::clone(&host),
        extractor().slow_from(1, Duration::from_secs(60)),
        synthesizer(),
        Arc::new(OneHit),
        LoopConfig::default(),
    );
    c.start("cancel me", StartOptions::default().max_rounds(5), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    let snap = c.get_session().unwrap();
    assert_eq!(snap.state, SessionState::Analyzing);
    assert_eq!(snap.round, 2);
    assert_eq!(snap.analyses.len(), 1);

    let report = c.cancel().await.unwrap();
    assert!(report.contains("## Round 1"));
    assert!(!report.contains("## Round 2"));
    assert!(report.contains("## Closing Summary"));
    assert!(report.contains("cancelled by user"));
    assert!(c.get_session().is_none());
    assert_eq!(host.resets(), 1);

    // the in-flight analysis lands later and is dropped
    tokio::time::sleep(Duration::from_secs(120)).await;
    let last = c.last_session().unwrap();
    assert_eq!(last.analyses.len(), 1);
    assert_eq!(last.state, SessionState::Idle);
    assert!(!c.is_polling());
    assert_eq!(c.generate_report(), report);
}

#[tokio::test(start_paused = true)]
async fn missing_search_credential_yields_empty_evidence() {
    let host = FakeHost::with_replies(vec![vec![report(1)], vec![report(2)], vec!["done".into()]]);
    let c = controller_with(
        host,
        extractor(),
        synthesizer(),
        Arc::new(NoSearch),
        LoopConfig::default(),
    );
    c.start("no search", StartOptions::default().max_rounds(2), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let last = c.last_session().unwrap();
    assert_eq!(last.analyses.len(), 2);
    for a in &last.analyses {
        assert!(a.search_evidence.is_empty());
        assert_eq!(a.evidence_markdown(150), NO_SEARCH_RESULTS);
    }
    assert!(steps(&last).contains(&"Search skipped"));
    assert!(c.generate_report().contains("_(no search results)_"));
}

#[tokio::test(start_paused = true)]
async fn synthesis_falls_back_to_backend_a() {
    let host = FakeHost::with_replies(vec![vec![report(1)], vec!["summary".into()]]);
    let a = Scripted::new(|n| {
        Ok(if n == 0 {
            "1. Claim alpha holds in practice".to_string()
        } else {
            "### Synthesis\nFallback synthesis.\n### Follow-up Question\nWhat did the fallback find?"
                .to_string()
        })
    });
    let c = controller_with(host, a, failing(), Arc::new(NoSearch), LoopConfig::default());
    c.start("fallback", StartOptions::default().max_rounds(1), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let last = c.last_session().unwrap();
    let a = &last.analyses[0];
    assert!(!a.synthesis_failed);
    assert_eq!(a.synthesis, "Fallback synthesis.");
    assert_eq!(a.follow_up_question, "What did the fallback find?");
    assert!(steps(&last).contains(&"Synthesis fallback"));
    assert_eq!(last.usage.backend_a_calls, 2);
    assert_eq!(last.usage.backend_b_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn both_backends_failing_still_completes_the_round() {
    let host = FakeHost::with_replies(vec![vec![report(1)], vec![report(2)]]);
    let c = controller_with(
        Arc::clone(&host),
        failing(),
        failing(),
        Arc::new(OneHit),
        LoopConfig::default(),
    );
    c.start("doomed", StartOptions::default().max_rounds(3), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    let snap = c.get_session().unwrap();
    assert_eq!(snap.analyses.len(), 1);
    let a = &snap.analyses[0];
    assert!(a.synthesis_failed);
    assert!(!a.follow_up_question.trim().is_empty());
    assert!(steps(&snap).contains(&"Synthesis failed"));
    // the placeholder question still goes out and the loop continues
    assert_eq!(snap.round, 2);
    assert_eq!(snap.state, SessionState::WaitingResearch);
    assert_eq!(host.submissions()[1].0, a.enriched_question);
}

// ── Manual mode ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn manual_mode_waits_for_confirmation() {
    let host = FakeHost::with_replies(vec![vec![report(1)], vec![report(2)], vec!["sum".into()]]);
    let c = controller(Arc::clone(&host));
    c.start("manual", StartOptions::default().max_rounds(2).auto_mode(false), None)
        .await
        .unwrap();
    // starting the session is the approval for the topic itself
    assert_eq!(host.submissions()[0], ("manual".to_string(), true));

    tokio::time::sleep(Duration::from_secs(7)).await;
    let snap = c.get_session().unwrap();
    assert_eq!(snap.state, SessionState::WaitingConfirm);
    assert_eq!(snap.round, 1);
    let inserted = host.submissions()[1].clone();
    assert!(!inserted.1);
    assert_eq!(inserted.0, snap.analyses[0].enriched_question);

    // nothing moves while waiting
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(c.get_session().unwrap().state, SessionState::WaitingConfirm);

    c.confirm_and_proceed().await.unwrap();
    let snap = c.get_session().unwrap();
    assert_eq!(snap.state, SessionState::WaitingResearch);
    assert_eq!(snap.round, 2);
    assert_eq!(host.submissions()[2], (inserted.0, true));
    assert!(matches!(
        c.confirm_and_proceed().await,
        Err(ControllerError::InvalidState { .. })
    ));
}

// ── Timeouts and stop ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn silent_host_after_last_round_times_out() {
    let host = FakeHost::with_replies(vec![vec![report(1)]]);
    let c = controller_with(
        Arc::clone(&host),
        extractor(),
        synthesizer(),
        Arc::new(OneHit),
        LoopConfig::default().final_report_timeout(Duration::from_secs(60)),
    );
    c.start("quiet", StartOptions::default().max_rounds(1), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        c.get_session().unwrap().state,
        SessionState::WaitingFinalReport
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    let last = c.last_session().unwrap();
    let report = last.final_report.unwrap();
    assert_eq!(
        report.source,
        FinalReportSource::Internal(ClosingReason::FinalReportTimeout)
    );
    assert!(report.text.contains("1 of 1 round(s)"));
    assert!(!c.is_polling());
}

#[tokio::test(start_paused = true)]
async fn research_timeout_is_optional() {
    let host = FakeHost::with_replies(vec![]);
    let c = controller(Arc::clone(&host));
    c.start("patient", StartOptions::default(), None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(c.get_session().unwrap().state, SessionState::WaitingResearch);
    assert!(c.is_polling());
}

#[tokio::test(start_paused = true)]
async fn stop_mid_session_requests_summary_once() {
    let host = FakeHost::with_replies(vec![vec![report(1)], vec![report(2)], vec!["summary".into()]]);
    let c = controller(Arc::clone(&host));
    c.start("stoppable", StartOptions::default().max_rounds(5), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(c.get_session().unwrap().round, 2);

    c.stop().await.unwrap();
    c.stop().await.unwrap();
    let snap = c.get_session().unwrap();
    assert_eq!(snap.state, SessionState::WaitingFinalReport);
    assert_eq!(
        snap.progress_log.iter().filter(|e| e.step == "Stop requested").count(),
        1
    );

    // the summary request supersedes the pending round 2 reply
    tokio::time::sleep(Duration::from_secs(30)).await;
    let last = c.last_session().unwrap();
    assert_eq!(last.state, SessionState::Idle);
    assert!(last.final_report.is_some());
    assert_eq!(last.analyses.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn report_is_available_mid_session() {
    let host = FakeHost::with_replies(vec![vec![report(1)], vec![report(2)]]);
    let c = controller(Arc::clone(&host));
    assert_eq!(c.generate_report(), "");
    c.start("snapshot", StartOptions::default().max_rounds(4), None)
        .await
        .unwrap();
    let empty = c.generate_report();
    assert!(empty.contains("No rounds were completed"));

    tokio::time::sleep(Duration::from_secs(7)).await;
    let partial = c.generate_report();
    assert!(partial.contains("## Round 1"));
    assert!(partial.contains("in progress (WAITING_RESEARCH)"));
}
