//! Session controller: the research loop state machine.
//!
//! [`SessionController`] owns at most one active [`ResearchSession`] and
//! drives it through the round cycle:
//!
//! ```text
//! IDLE ─start─▶ WAITING_RESEARCH ─report─▶ ANALYZING ─▶ INSERTING_QUESTION
//!                  ▲                                         │
//!                  │          auto: submit follow-up ◀───────┤
//!                  │          manual: WAITING_CONFIRM ─confirm─▶ AUTO_SUBMIT
//!                  └──────────────────────────────────────────┘
//! last round or stop ─▶ WAITING_FINAL_REPORT ─summary / timeout─▶ IDLE
//! cancel (any state) ─▶ IDLE
//! ```
//!
//! # Concurrency
//!
//! The session lives behind a `std::sync::Mutex` that is never held across
//! an `.await`. Every async step follows the same pattern: read what it
//! needs under the lock, release it, await the surface or a backend, then
//! re-lock and apply the result only if the same session is still active
//! (and, where it matters, still in the expected state). Cancellation is
//! therefore cooperative: an in-flight backend call finishes, its result is
//! dropped, and the next poll tick stops the loop.
//!
//! Subscribers are notified after the lock is released.

use crate::analysis::prompt::final_summary_prompt;
use crate::analysis::{AnalysisPipeline, PipelineObserver, RoundContext};
use crate::backend::BackendRole;
use crate::config::LoopConfig;
use crate::events::{EventHandler, SessionEvent, Subscribers, SubscriptionId};
use crate::poller::{KeepAlive, PollTarget, Poller, TickFuture, TickOutcome};
use crate::report::{closing_summary, render_report};
use crate::session::{
    ClosingReason, FinalReportSource, ResearchSession, SessionSnapshot, SessionState,
    conversation_key, generate_session_id,
};
use crate::surface::HostSurface;
use crate::{char_len, truncate_chars};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Characters of a question shown in a progress entry.
const PROGRESS_QUESTION_CHARS: usize = 200;

/// Largest `max_rounds` a session may be started with.
pub const MAX_ROUNDS_LIMIT: u32 = 100;

// ── Errors ─────────────────────────────────────────────────────────

/// Errors returned by controller operations.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Only one session may run at a time.
    #[error("a research session is already active ({session_id}: \"{topic}\")")]
    SessionAlreadyActive { session_id: String, topic: String },

    #[error("no active research session")]
    NoActiveSession,

    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("host surface error: {0}")]
    Surface(String),
}

/// Options for [`SessionController::start`].
#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    pub max_rounds: u32,
    /// Submit follow-ups automatically. When `false` each follow-up waits
    /// for [`SessionController::confirm_and_proceed`].
    pub auto_mode: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            auto_mode: true,
        }
    }
}

impl StartOptions {
    pub fn max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn auto_mode(mut self, auto_mode: bool) -> Self {
        self.auto_mode = auto_mode;
        self
    }
}

// ── Change tracking ────────────────────────────────────────────────

enum Change {
    State { from: SessionState, to: SessionState },
    Progress(usize),
    Usage,
}

/// Records what a mutation did so the matching events can be emitted once
/// the lock is released.
#[derive(Default)]
struct Changes(Vec<Change>);

impl Changes {
    fn transition(&mut self, session: &mut ResearchSession, to: SessionState) {
        let from = session.state();
        session.set_state(to);
        if from != to {
            self.0.push(Change::State { from, to });
        }
    }

    fn progress(&mut self, session: &mut ResearchSession, step: &str, detail: impl Into<String>) {
        session.progress_mut().push(step, detail);
        self.0.push(Change::Progress(session.progress().len() - 1));
    }

    fn usage(&mut self, session: &mut ResearchSession, role: BackendRole) {
        session.record_backend_call(role);
        self.0.push(Change::Usage);
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What to do once a round's analysis is recorded.
enum NextStep {
    /// The session is gone or the analysis was rejected.
    Discard,
    /// A stop was requested while analyzing; leave the state alone.
    Hold,
    /// Last round done: ask for the final summary.
    FinalReport,
    Submit(String),
    Review(String),
}

// ── Controller ─────────────────────────────────────────────────────

#[derive(Default)]
struct Slot {
    active: Option<ResearchSession>,
    last_finished: Option<ResearchSession>,
    final_keep_alive: Option<KeepAlive>,
    poller: Option<Poller>,
}

struct Inner {
    surface: Arc<dyn HostSurface>,
    pipeline: AnalysisPipeline,
    config: LoopConfig,
    subscribers: Subscribers,
    slot: Mutex<Slot>,
}

/// Cheaply cloneable handle to the research loop.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(surface: Arc<dyn HostSurface>, pipeline: AnalysisPipeline, config: LoopConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                surface,
                pipeline,
                config,
                subscribers: Subscribers::new(),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_id(&self) -> Option<String> {
        self.lock().active.as_ref().map(|s| s.id().to_string())
    }

    /// Mutate the active session if its id is `id`, then emit the events
    /// the mutation produced. Returns `None` if that session is gone.
    fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ResearchSession, &mut Changes) -> R,
    ) -> Option<R> {
        let (result, snapshot, changes) = {
            let mut slot = self.lock();
            let session = slot.active.as_mut().filter(|s| s.id() == id)?;
            let mut changes = Changes::default();
            let result = f(session, &mut changes);
            let snapshot = (!changes.is_empty()).then(|| session.snapshot());
            (result, snapshot, changes)
        };
        if let Some(snapshot) = snapshot {
            self.dispatch(&snapshot, changes);
        }
        Some(result)
    }

    fn dispatch(&self, snapshot: &SessionSnapshot, changes: Changes) {
        let subscribers = &self.inner.subscribers;
        for change in changes.0 {
            match change {
                Change::State { from, to } => subscribers.notify(&SessionEvent::StateChanged {
                    from,
                    to,
                    snapshot,
                }),
                Change::Progress(idx) => {
                    if let Some(entry) = snapshot.progress_log.get(idx) {
                        subscribers.notify(&SessionEvent::Progress { entry, snapshot });
                    }
                }
                Change::Usage => subscribers.notify(&SessionEvent::UsageChanged { snapshot }),
            }
        }
    }

    // ── Public operations ──

    /// Start a new session and send `topic` to the host surface.
    ///
    /// Fails with [`ControllerError::SessionAlreadyActive`] while another
    /// session is running; the running session is left untouched.
    pub async fn start(
        &self,
        topic: &str,
        options: StartOptions,
        session_id: Option<String>,
    ) -> Result<SessionSnapshot, ControllerError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ControllerError::InvalidConfig("topic must not be empty".into()));
        }
        if options.max_rounds == 0 || options.max_rounds > MAX_ROUNDS_LIMIT {
            return Err(ControllerError::InvalidConfig(format!(
                "max_rounds must be between 1 and {MAX_ROUNDS_LIMIT}"
            )));
        }
        let id = session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(generate_session_id);

        {
            let mut slot = self.lock();
            if let Some(active) = &slot.active {
                return Err(ControllerError::SessionAlreadyActive {
                    session_id: active.id().to_string(),
                    topic: active.topic().to_string(),
                });
            }
            slot.active = Some(ResearchSession::new(
                &id,
                topic,
                options.max_rounds,
                options.auto_mode,
            ));
        }
        info!(
            "[{id}] starting session: {} round(s), auto={}",
            options.max_rounds, options.auto_mode
        );

        if let Err(e) = self.send_question(topic, true).await {
            let mut slot = self.lock();
            if slot.active.as_ref().is_some_and(|s| s.id() == id) {
                slot.active = None;
            }
            warn!("[{id}] could not send topic: {e}");
            return Err(ControllerError::Surface(e));
        }

        let snapshot = self
            .update(&id, |s, c| {
                c.progress(
                    s,
                    "Research question sent",
                    truncate_chars(topic, PROGRESS_QUESTION_CHARS),
                );
                c.transition(s, SessionState::WaitingResearch);
                s.snapshot()
            })
            .ok_or(ControllerError::NoActiveSession)?;

        let poller = Poller::spawn(self.clone(), id.clone(), self.inner.config.poll_interval);
        let mut slot = self.lock();
        if slot.active.as_ref().is_some_and(|s| s.id() == id) {
            slot.poller = Some(poller);
        }
        Ok(snapshot)
    }

    /// Ask the host for its final summary and wait for it.
    ///
    /// Idempotent: a second call while the summary is pending does nothing.
    /// If the request cannot be sent the session ends with an internal
    /// report instead.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let id = self.active_id().ok_or(ControllerError::NoActiveSession)?;
        let proceed = self
            .update(&id, |s, c| {
                if !s.request_stop() {
                    return false;
                }
                let detail = format!("after {} completed round(s)", s.analyses().len());
                c.progress(s, "Stop requested", detail);
                c.transition(s, SessionState::InsertingQuestion);
                true
            })
            .ok_or(ControllerError::NoActiveSession)?;
        if proceed {
            self.request_final_report(&id).await;
        }
        Ok(())
    }

    /// End the session immediately and return the internal report.
    ///
    /// An in-flight analysis is not interrupted; its result is discarded
    /// when it lands.
    pub async fn cancel(&self) -> Result<String, ControllerError> {
        let id = self.active_id().ok_or(ControllerError::NoActiveSession)?;
        let report = self
            .finish(
                &id,
                FinalReportSource::Internal(ClosingReason::Cancelled),
                String::new(),
            )
            .ok_or(ControllerError::NoActiveSession)?;
        if let Err(e) = self.inner.surface.reset_conversation().await {
            warn!("[{id}] conversation reset failed: {e}");
        }
        Ok(report)
    }

    /// Submit the follow-up waiting for review and resume the loop.
    pub async fn confirm_and_proceed(&self) -> Result<(), ControllerError> {
        let id = self.active_id().ok_or(ControllerError::NoActiveSession)?;
        let question = self
            .update(&id, |s, c| {
                if s.state() != SessionState::WaitingConfirm {
                    return Err(ControllerError::InvalidState {
                        expected: SessionState::WaitingConfirm,
                        actual: s.state(),
                    });
                }
                let question = s
                    .pending_question()
                    .map(str::to_string)
                    .ok_or(ControllerError::InvalidState {
                        expected: SessionState::WaitingConfirm,
                        actual: s.state(),
                    })?;
                c.transition(s, SessionState::AutoSubmit);
                Ok(question)
            })
            .ok_or(ControllerError::NoActiveSession)??;

        match self.inner.surface.submit_question(&question, true).await {
            Ok(()) => {
                self.update(&id, |s, c| {
                    if s.state() != SessionState::AutoSubmit {
                        return;
                    }
                    c.progress(
                        s,
                        "Follow-up confirmed",
                        truncate_chars(&question, PROGRESS_QUESTION_CHARS),
                    );
                    s.advance_round();
                    c.transition(s, SessionState::WaitingResearch);
                });
                Ok(())
            }
            Err(e) => {
                self.update(&id, |s, c| {
                    if s.state() == SessionState::AutoSubmit {
                        c.progress(s, "Follow-up submission failed", e.clone());
                        c.transition(s, SessionState::WaitingConfirm);
                    }
                });
                Err(ControllerError::Surface(e))
            }
        }
    }

    /// Snapshot of the active session.
    pub fn get_session(&self) -> Option<SessionSnapshot> {
        self.lock().active.as_ref().map(ResearchSession::snapshot)
    }

    /// Snapshot of the most recently finished session.
    pub fn last_session(&self) -> Option<SessionSnapshot> {
        self.lock().last_finished.as_ref().map(ResearchSession::snapshot)
    }

    /// Render the report for the active session, or the last finished one.
    /// Empty when no session has run.
    pub fn generate_report(&self) -> String {
        let slot = self.lock();
        slot.active
            .as_ref()
            .or(slot.last_finished.as_ref())
            .map(render_report)
            .unwrap_or_default()
    }

    /// Whether a poll loop is currently running.
    pub fn is_polling(&self) -> bool {
        self.lock().poller.as_ref().is_some_and(Poller::is_running)
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.inner.subscribers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }

    // ── Poll tick ──

    /// One poll tick for session `id`. Driven by the [`Poller`].
    pub async fn poll_once(&self, id: &str) -> Result<TickOutcome, String> {
        let view = {
            let slot = self.lock();
            match slot.active.as_ref().filter(|s| s.id() == id) {
                Some(s) => TickView {
                    state: s.state(),
                    waiting_for_growth: s.waiting_for_growth(),
                    growth_baseline: s.growth_baseline(),
                    time_in_state: s.time_in_state(),
                },
                None => return Ok(TickOutcome::Stop),
            }
        };

        let outcome = match view.state {
            SessionState::WaitingResearch => self.poll_research(id, &view).await,
            SessionState::WaitingFinalReport => self.poll_final_report(id, &view).await,
            SessionState::Idle => return Ok(TickOutcome::Stop),
            SessionState::Analyzing
            | SessionState::InsertingQuestion
            | SessionState::WaitingConfirm
            | SessionState::AutoSubmit => return Ok(TickOutcome::Continue),
        };
        self.note_surface_health(id, outcome.as_ref().err());
        outcome
    }

    /// Log one progress entry when surface checks start failing and one
    /// when they recover, so a dead bridge never leaves the log silent.
    fn note_surface_health(&self, id: &str, error: Option<&String>) {
        self.update(id, |s, c| match error {
            Some(e) => {
                if s.set_surface_unreachable(true) {
                    c.progress(s, "Host surface unreachable", e.as_str());
                }
            }
            None => {
                if s.set_surface_unreachable(false) {
                    c.progress(s, "Host surface reachable again", "polling resumed");
                }
            }
        });
    }

    async fn poll_research(&self, id: &str, view: &TickView) -> Result<TickOutcome, String> {
        if let Some(limit) = self.inner.config.research_timeout
            && view.time_in_state >= limit
        {
            warn!("[{id}] no report after {}s, ending session", limit.as_secs());
            self.finish(
                id,
                FinalReportSource::Internal(ClosingReason::ResearchTimeout),
                String::new(),
            );
            self.schedule_reset(id);
            return Ok(TickOutcome::Stop);
        }

        let surface = &self.inner.surface;
        if surface.is_producing_output().await? {
            return Ok(TickOutcome::Continue);
        }

        let growth = self.inner.config.growth;
        if view.waiting_for_growth {
            let Some(content) = surface
                .check_for_content_growth(growth.min_content_len)
                .await?
            else {
                return Ok(TickOutcome::Continue);
            };
            let len = char_len(&content);
            if !growth.accepts(view.growth_baseline, len) {
                debug!(
                    "[{id}] content at {len} chars, waiting for growth past {}",
                    view.growth_baseline
                );
                return Ok(TickOutcome::Continue);
            }
            return self.process_report(id, content).await;
        }

        let Some(content) = surface.check_for_new_content().await? else {
            return Ok(TickOutcome::Continue);
        };
        let len = char_len(&content);
        if growth.is_too_short(len) {
            self.update(id, |s, c| {
                if s.state() == SessionState::WaitingResearch && !s.waiting_for_growth() {
                    s.begin_growth_wait(len);
                    c.progress(
                        s,
                        "Short response detected",
                        format!("{len} chars, waiting for the full report"),
                    );
                }
            });
            return Ok(TickOutcome::Continue);
        }
        self.process_report(id, content).await
    }

    async fn poll_final_report(&self, id: &str, view: &TickView) -> Result<TickOutcome, String> {
        let limit = self.inner.config.final_report_timeout;
        if view.time_in_state >= limit {
            warn!("[{id}] final summary not received after {}s", limit.as_secs());
            self.finish(
                id,
                FinalReportSource::Internal(ClosingReason::FinalReportTimeout),
                String::new(),
            );
            self.schedule_reset(id);
            return Ok(TickOutcome::Stop);
        }

        let surface = &self.inner.surface;
        if surface.is_producing_output().await? {
            return Ok(TickOutcome::Continue);
        }
        match surface.check_for_new_content().await? {
            Some(text) if !text.trim().is_empty() => {
                self.finish(id, FinalReportSource::HostSurface, text);
                self.schedule_reset(id);
                Ok(TickOutcome::Stop)
            }
            _ => Ok(TickOutcome::Continue),
        }
    }

    // ── Round processing ──

    async fn process_report(&self, id: &str, content: String) -> Result<TickOutcome, String> {
        let len = char_len(&content);
        let ctx = self.update(id, |s, c| {
            if s.state() != SessionState::WaitingResearch {
                return None;
            }
            s.clear_growth_wait();
            if !s.record_report(content.clone()) {
                return None;
            }
            let detail = format!("round {}/{}: {len} chars", s.round(), s.max_rounds());
            c.progress(s, "Report received", detail);
            c.transition(s, SessionState::Analyzing);
            Some(RoundContext {
                topic: s.topic().to_string(),
                round: s.round(),
                max_rounds: s.max_rounds(),
                prior_questions: s.prior_questions(),
                conversation_key: conversation_key(s.id()),
            })
        });
        let ctx = match ctx {
            None => return Ok(TickOutcome::Stop),
            Some(None) => return Ok(TickOutcome::Continue),
            Some(Some(ctx)) => ctx,
        };

        let analysis = {
            let _keep_alive = KeepAlive::start(
                format!("{id} analysis"),
                self.inner.config.keep_alive_interval,
            );
            let observer = SessionObserver {
                controller: self,
                session_id: id,
            };
            self.inner.pipeline.analyze(&content, &ctx, &observer).await
        };

        let next = self
            .update(id, |s, c| {
                let round = analysis.round;
                let failed = analysis.synthesis_failed;
                if !s.record_analysis(analysis) {
                    return NextStep::Discard;
                }
                c.progress(
                    s,
                    "Analysis complete",
                    if failed {
                        format!("round {round}: synthesis unavailable, using placeholder question")
                    } else {
                        format!("round {round}")
                    },
                );
                if s.state() != SessionState::Analyzing {
                    return NextStep::Hold;
                }
                c.transition(s, SessionState::InsertingQuestion);
                if s.is_last_round() {
                    s.request_stop();
                    return NextStep::FinalReport;
                }
                let question = s
                    .analyses()
                    .last()
                    .map(|a| a.enriched_question.clone())
                    .unwrap_or_default();
                if s.auto_mode() {
                    NextStep::Submit(question)
                } else {
                    NextStep::Review(question)
                }
            })
            .unwrap_or(NextStep::Discard);

        match next {
            NextStep::Discard => {
                info!("[{id}] session ended during analysis, result discarded");
                Ok(TickOutcome::Stop)
            }
            NextStep::Hold => Ok(TickOutcome::Continue),
            NextStep::FinalReport => {
                self.request_final_report(id).await;
                Ok(TickOutcome::Continue)
            }
            NextStep::Submit(question) => {
                self.submit_follow_up(id, &question).await;
                Ok(TickOutcome::Continue)
            }
            NextStep::Review(question) => {
                if let Err(e) = self.send_question(&question, false).await {
                    warn!("[{id}] could not insert follow-up for review: {e}");
                }
                self.update(id, |s, c| {
                    if s.state() == SessionState::InsertingQuestion {
                        c.progress(
                            s,
                            "Awaiting confirmation",
                            truncate_chars(&question, PROGRESS_QUESTION_CHARS),
                        );
                        c.transition(s, SessionState::WaitingConfirm);
                    }
                });
                Ok(TickOutcome::Continue)
            }
        }
    }

    async fn submit_follow_up(&self, id: &str, question: &str) {
        match self.send_question(question, true).await {
            Ok(()) => {
                self.update(id, |s, c| {
                    if s.state() != SessionState::InsertingQuestion {
                        return;
                    }
                    c.progress(
                        s,
                        "Follow-up sent",
                        truncate_chars(question, PROGRESS_QUESTION_CHARS),
                    );
                    s.advance_round();
                    c.transition(s, SessionState::WaitingResearch);
                });
            }
            Err(e) => {
                warn!("[{id}] follow-up submission failed: {e}");
                let proceed = self
                    .update(id, |s, c| {
                        c.progress(s, "Follow-up submission failed", e.clone());
                        s.request_stop()
                    })
                    .unwrap_or(false);
                if proceed {
                    self.request_final_report(id).await;
                }
            }
        }
    }

    /// Mark the current host output as consumed, then place `text`.
    async fn send_question(&self, text: &str, auto_submit: bool) -> Result<(), String> {
        let surface = &self.inner.surface;
        surface.mark_current_content_as_seen().await?;
        surface.submit_question(text, auto_submit).await
    }

    /// Send the summary prompt and enter WAITING_FINAL_REPORT, or fall back
    /// to an internal report if the prompt cannot be sent.
    async fn request_final_report(&self, id: &str) {
        let Some(topic) = self.update(id, |s, c| {
            let topic = s.topic().to_string();
            c.progress(s, "Requesting final report", topic.clone());
            topic
        }) else {
            return;
        };

        match self.send_question(&final_summary_prompt(&topic), true).await {
            Ok(()) => {
                let entered = self
                    .update(id, |s, c| {
                        if s.state() == SessionState::Idle {
                            return false;
                        }
                        if s.is_last_round()
                            && s.analyses().last().is_some_and(|a| a.round == s.round())
                        {
                            s.advance_round();
                        }
                        c.transition(s, SessionState::WaitingFinalReport);
                        true
                    })
                    .unwrap_or(false);
                if entered {
                    self.hold_final_keep_alive(id);
                }
            }
            Err(e) => {
                warn!("[{id}] could not request final report: {e}");
                self.update(id, |s, c| c.progress(s, "Final report request failed", e.clone()));
                self.finish(
                    id,
                    FinalReportSource::Internal(ClosingReason::StopFailed),
                    String::new(),
                );
                if let Err(e) = self.inner.surface.reset_conversation().await {
                    warn!("[{id}] conversation reset failed: {e}");
                }
            }
        }
    }

    fn hold_final_keep_alive(&self, id: &str) {
        let mut slot = self.lock();
        if slot.active.as_ref().is_some_and(|s| s.id() == id) {
            slot.final_keep_alive = Some(KeepAlive::start(
                format!("{id} final report"),
                self.inner.config.keep_alive_interval,
            ));
        }
    }

    /// End session `id`: record the final report, move to IDLE, retire the
    /// session to `last_finished`, and return the rendered report.
    ///
    /// For internal reports `text` is ignored and a closing summary is
    /// generated from the completed rounds.
    fn finish(&self, id: &str, source: FinalReportSource, text: String) -> Option<String> {
        let (snapshot, changes, rendered) = {
            let mut slot = self.lock();
            let mut session = match slot.active.take() {
                Some(s) if s.id() == id => s,
                other => {
                    slot.active = other;
                    return None;
                }
            };
            let mut changes = Changes::default();
            let text = match source {
                FinalReportSource::HostSurface => {
                    changes.progress(
                        &mut session,
                        "Final report received",
                        format!("{} chars", char_len(&text)),
                    );
                    text
                }
                FinalReportSource::Internal(reason) => {
                    changes.progress(&mut session, "Session ended", reason.to_string());
                    closing_summary(&session, reason)
                }
            };
            session.set_final_report(source, text);
            changes.transition(&mut session, SessionState::Idle);
            slot.final_keep_alive = None;
            slot.poller = None;

            let snapshot = session.snapshot();
            let rendered = render_report(&session);
            slot.last_finished = Some(session);
            (snapshot, changes, rendered)
        };
        self.dispatch(&snapshot, changes);
        self.inner
            .subscribers
            .notify(&SessionEvent::Finished { snapshot: &snapshot });
        Some(rendered)
    }

    /// Reset the host conversation after the configured delay.
    fn schedule_reset(&self, id: &str) {
        let surface = Arc::clone(&self.inner.surface);
        let delay = self.inner.config.reset_delay;
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = surface.reset_conversation().await {
                warn!("[{id}] conversation reset failed: {e}");
            }
        });
    }
}

impl PollTarget for SessionController {
    fn tick<'a>(&'a self, session_id: &'a str) -> TickFuture<'a> {
        Box::pin(self.poll_once(session_id))
    }
}

struct TickView {
    state: SessionState,
    waiting_for_growth: bool,
    growth_baseline: usize,
    time_in_state: Duration,
}

/// Routes pipeline progress and usage into the live session.
struct SessionObserver<'a> {
    controller: &'a SessionController,
    session_id: &'a str,
}

impl PipelineObserver for SessionObserver<'_> {
    fn progress(&self, step: &str, detail: &str) {
        self.controller
            .update(self.session_id, |s, c| c.progress(s, step, detail));
    }

    fn backend_called(&self, role: BackendRole) {
        self.controller
            .update(self.session_id, |s, c| c.usage(s, role));
    }
}
