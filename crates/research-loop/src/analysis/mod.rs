//! Per-round analysis pipeline.
//!
//! One call to [`AnalysisPipeline::analyze`] turns a host report into an
//! [`AnalysisEntry`]:
//!
//! 1. **Extract**: backend A lists the report's key verifiable claims.
//! 2. **Search**: the first few claims are looked up on the web.
//! 3. **Synthesize**: backend B critiques the report against the evidence
//!    and proposes a follow-up question. On failure the same prompt is
//!    retried once on backend A.
//! 4. **Enrich**: the follow-up is wrapped with evidence and synthesis so
//!    the host sees the verification context.
//!
//! Every stage degrades instead of failing. The pipeline always returns an
//! entry with a non-empty follow-up question, so a round can always close.
//!
//! The pipeline does not own the session. It reports progress and backend
//! usage through a [`PipelineObserver`], which the controller implements by
//! writing to the live session.

pub mod prompt;
pub mod sections;

use crate::backend::search::{SearchBackend, SearchResult};
use crate::backend::{BackendRole, CompletionRequest, ReasoningBackend, complete_with_timeout};
use crate::config::PipelineLimits;
use crate::session::{AnalysisEntry, format_evidence};
use crate::{char_len, truncate_chars};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use prompt::ResearchPhase;
use sections::{
    SYNTHESIS_FAILED_FOLLOW_UP, SYNTHESIS_UNAVAILABLE, assessment_breadcrumb, enrich_question,
    extract_follow_up, parse_claims, parse_synthesis, strip_list_marker,
};

/// What the pipeline needs to know about the round.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub topic: String,
    pub round: u32,
    pub max_rounds: u32,
    /// Follow-up questions from earlier rounds, oldest first.
    pub prior_questions: Vec<String>,
    /// Conversation key for backend B.
    pub conversation_key: String,
}

/// Sink for pipeline side effects.
pub trait PipelineObserver: Send + Sync {
    fn progress(&self, step: &str, detail: &str);
    fn backend_called(&self, role: BackendRole);
}

/// Observer that discards everything.
pub struct NullObserver;

impl PipelineObserver for NullObserver {
    fn progress(&self, _step: &str, _detail: &str) {}
    fn backend_called(&self, _role: BackendRole) {}
}

pub struct AnalysisPipeline {
    backend_a: Arc<dyn ReasoningBackend>,
    backend_b: Arc<dyn ReasoningBackend>,
    search: Arc<dyn SearchBackend>,
    limits: PipelineLimits,
}

impl AnalysisPipeline {
    pub fn new(
        backend_a: Arc<dyn ReasoningBackend>,
        backend_b: Arc<dyn ReasoningBackend>,
        search: Arc<dyn SearchBackend>,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            backend_a,
            backend_b,
            search,
            limits,
        }
    }

    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    /// Run all four stages for one report.
    pub async fn analyze(
        &self,
        report: &str,
        ctx: &RoundContext,
        observer: &dyn PipelineObserver,
    ) -> AnalysisEntry {
        debug!(
            "analyzing round {}/{} ({} chars)",
            ctx.round,
            ctx.max_rounds,
            char_len(report)
        );

        let claims = self.extract_claims(report, observer).await;
        let evidence = self.gather_evidence(&claims, observer).await;
        let evidence_text = (!evidence.is_empty())
            .then(|| format_evidence(&evidence, self.limits.max_description_chars));

        let synthesized = self
            .synthesize(report, evidence_text.as_deref(), ctx, observer)
            .await;

        let (sections, synthesis_failed) = match synthesized {
            Some(text) => (parse_synthesis(&text), false),
            None => (sections::SynthesisSections::default(), true),
        };

        if let Some(crumb) = assessment_breadcrumb(&sections.self_assessment) {
            observer.progress("Strategy adjusted", &crumb);
        }

        let follow_up_question = if synthesis_failed {
            SYNTHESIS_FAILED_FOLLOW_UP.to_string()
        } else {
            extract_follow_up(sections.follow_up.as_deref())
        };
        let synthesis = if synthesis_failed {
            SYNTHESIS_UNAVAILABLE.to_string()
        } else {
            sections.synthesis
        };
        let enrich_synthesis = if synthesis_failed { "" } else { synthesis.as_str() };
        let enriched_question = enrich_question(
            &follow_up_question,
            evidence_text.as_deref(),
            enrich_synthesis,
            &self.limits,
        );

        AnalysisEntry {
            round: ctx.round,
            claims,
            search_evidence: evidence,
            synthesis,
            self_assessment: sections.self_assessment,
            follow_up_question,
            enriched_question,
            synthesis_failed,
            created_at: Utc::now(),
        }
    }

    async fn extract_claims(&self, report: &str, observer: &dyn PipelineObserver) -> Vec<String> {
        observer.progress("Extracting claims", self.backend_a.name());
        let prompt = prompt::extraction_prompt(report, &self.limits);
        let result = complete_with_timeout(
            self.backend_a.as_ref(),
            CompletionRequest::new(&prompt),
            self.limits.backend_timeout,
        )
        .await;
        observer.backend_called(BackendRole::Extraction);

        match result {
            Ok(text) => {
                let claims = parse_claims(&text, self.limits.max_claims);
                observer.progress("Claims extracted", &format!("{} claim(s)", claims.len()));
                claims
            }
            Err(e) => {
                warn!("claim extraction failed: {e}");
                observer.progress("Claim extraction failed", &e);
                Vec::new()
            }
        }
    }

    async fn gather_evidence(
        &self,
        claims: &[String],
        observer: &dyn PipelineObserver,
    ) -> Vec<SearchResult> {
        if claims.is_empty() {
            return Vec::new();
        }
        if !self.search.is_available() {
            observer.progress("Search skipped", "no search credential configured");
            return Vec::new();
        }

        observer.progress(
            "Searching evidence",
            &format!(
                "{} claim(s) via {}",
                claims.len().min(self.limits.searched_claims),
                self.search.name()
            ),
        );

        let mut results = Vec::new();
        for claim in claims.iter().take(self.limits.searched_claims) {
            let query = truncate_chars(strip_list_marker(claim), self.limits.max_query_chars);
            if query.is_empty() {
                continue;
            }
            let hits = self.search.search(query, self.limits.results_per_claim).await;
            let found = !hits.is_empty();
            results.extend(hits.into_iter().take(self.limits.results_per_claim));
            if found && !self.limits.search_delay.is_zero() {
                tokio::time::sleep(self.limits.search_delay).await;
            }
        }
        results.truncate(self.limits.max_results);

        observer.progress("Evidence gathered", &format!("{} result(s)", results.len()));
        results
    }

    /// Synthesis on backend B with a single fallback to backend A.
    /// Returns `None` when both fail.
    async fn synthesize(
        &self,
        report: &str,
        evidence: Option<&str>,
        ctx: &RoundContext,
        observer: &dyn PipelineObserver,
    ) -> Option<String> {
        let phase = ResearchPhase::for_round(ctx.round, ctx.max_rounds);
        let system = prompt::synthesis_system_prompt(&ctx.topic, phase);
        let user = prompt::synthesis_prompt(
            ctx.round,
            ctx.max_rounds,
            &ctx.prior_questions,
            report,
            evidence,
            &self.limits,
        );

        observer.progress("Synthesizing", self.backend_b.name());
        let primary = complete_with_timeout(
            self.backend_b.as_ref(),
            CompletionRequest::new(&user)
                .system(&system)
                .conversation(&ctx.conversation_key),
            self.limits.backend_timeout,
        )
        .await;
        observer.backend_called(BackendRole::Synthesis);

        let result = match primary {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!("synthesis on {} failed: {e}", self.backend_b.name());
                observer.progress(
                    "Synthesis fallback",
                    &format!("{} failed ({e}), retrying on {}", self.backend_b.name(), self.backend_a.name()),
                );
                let fallback = complete_with_timeout(
                    self.backend_a.as_ref(),
                    CompletionRequest::new(&user).system(&system),
                    self.limits.backend_timeout,
                )
                .await;
                observer.backend_called(BackendRole::Extraction);
                fallback
            }
        };

        match result {
            Ok(text) => {
                observer.progress(
                    "Synthesis complete",
                    &format!("{} chars", char_len(&text)),
                );
                Some(text)
            }
            Err(e) => {
                warn!("synthesis failed on both backends: {e}");
                observer.progress("Synthesis failed", &e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendFuture;
    use crate::backend::search::{NoSearch, SearchFuture};
    use crate::session::NO_SEARCH_RESULTS;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        name: &'static str,
        replies: Mutex<Vec<Result<String, String>>>,
        prompts: Mutex<Vec<(String, Option<String>, Option<String>)>>,
    }

    impl Scripted {
        fn new(name: &'static str, replies: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                replies: Mutex::new(replies.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl ReasoningBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn complete<'a>(&'a self, request: CompletionRequest<'a>) -> BackendFuture<'a> {
            self.prompts.lock().unwrap().push((
                request.prompt.to_string(),
                request.system_prompt.map(str::to_string),
                request.conversation.map(str::to_string),
            ));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("script exhausted".into()));
            Box::pin(async move { reply })
        }
    }

    struct FixedSearch(Vec<SearchResult>, Mutex<Vec<String>>);

    impl SearchBackend for FixedSearch {
        fn name(&self) -> &str {
            "fixed"
        }

        fn search<'a>(&'a self, query: &'a str, count: usize) -> SearchFuture<'a> {
            self.1.lock().unwrap().push(query.to_string());
            let hits: Vec<_> = self.0.iter().take(count).cloned().collect();
            Box::pin(async move { hits })
        }
    }

    #[derive(Default)]
    struct Recorder {
        steps: Mutex<Vec<String>>,
        calls: Mutex<Vec<BackendRole>>,
    }

    impl PipelineObserver for Recorder {
        fn progress(&self, step: &str, _detail: &str) {
            self.steps.lock().unwrap().push(step.to_string());
        }

        fn backend_called(&self, role: BackendRole) {
            self.calls.lock().unwrap().push(role);
        }
    }

    fn ctx() -> RoundContext {
        RoundContext {
            topic: "sodium-ion batteries".into(),
            round: 2,
            max_rounds: 5,
            prior_questions: vec!["What limits energy density?".into()],
            conversation_key: "rl-test".into(),
        }
    }

    fn hit(n: usize) -> SearchResult {
        SearchResult {
            title: format!("t{n}"),
            url: format!("https://example.com/{n}"),
            description: "desc".into(),
        }
    }

    const SYNTH: &str = "### Self-Assessment\nStaying on cathodes.\n### Synthesis\nConsistent.\n### Follow-up Question\nHow does hard carbon anode capacity fade over cycles?";

    #[tokio::test(start_paused = true)]
    async fn full_pipeline_happy_path() {
        let a = Scripted::new(
            "A",
            vec![Ok("1. Claim number one\n2. Claim number two\n3. Claim number three\n4. Claim number four".into())],
        );
        let b = Scripted::new("B", vec![Ok(SYNTH.into())]);
        let search = Arc::new(FixedSearch(vec![hit(1), hit(2), hit(3)], Mutex::new(vec![])));
        let pipeline = AnalysisPipeline::new(a.clone(), b.clone(), search.clone(), PipelineLimits::default());
        let rec = Recorder::default();

        let entry = pipeline.analyze("report body", &ctx(), &rec).await;

        assert_eq!(entry.round, 2);
        assert_eq!(entry.claims.len(), 4);
        // 3 claims searched, 2 hits each, capped at 5.
        assert_eq!(entry.search_evidence.len(), 5);
        assert_eq!(search.1.lock().unwrap()[0], "Claim number one");
        assert_eq!(search.1.lock().unwrap().len(), 3);
        assert_eq!(entry.synthesis, "Consistent.");
        assert_eq!(entry.self_assessment, "Staying on cathodes.");
        assert_eq!(
            entry.follow_up_question,
            "How does hard carbon anode capacity fade over cycles?"
        );
        assert!(entry.enriched_question.contains("https://example.com/1"));
        assert!(!entry.synthesis_failed);
        assert_eq!(
            *rec.calls.lock().unwrap(),
            vec![BackendRole::Extraction, BackendRole::Synthesis]
        );
        assert!(rec.steps.lock().unwrap().contains(&"Strategy adjusted".to_string()));

        let (_, system, conversation) = b.prompts.lock().unwrap()[0].clone();
        assert!(system.unwrap().contains("sodium-ion batteries"));
        assert_eq!(conversation.as_deref(), Some("rl-test"));
    }

    #[tokio::test(start_paused = true)]
    async fn synthesis_falls_back_to_backend_a() {
        let a = Scripted::new(
            "A",
            vec![Ok("Claim number one".into()), Ok(SYNTH.into())],
        );
        let b = Scripted::new("B", vec![Err("HTTP 502".into())]);
        let pipeline = AnalysisPipeline::new(a.clone(), b.clone(), Arc::new(NoSearch), PipelineLimits::default());
        let rec = Recorder::default();

        let entry = pipeline.analyze("report", &ctx(), &rec).await;

        assert!(!entry.synthesis_failed);
        assert_eq!(entry.synthesis, "Consistent.");
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 1);
        let prompts = a.prompts.lock().unwrap();
        let b_prompt = b.prompts.lock().unwrap()[0].0.clone();
        assert_eq!(prompts[1].0, b_prompt);
        assert!(rec.steps.lock().unwrap().contains(&"Synthesis fallback".to_string()));
        assert_eq!(
            *rec.calls.lock().unwrap(),
            vec![BackendRole::Extraction, BackendRole::Synthesis, BackendRole::Extraction]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn both_backends_failing_yields_placeholder() {
        let a = Scripted::new("A", vec![Err("down".into()), Err("down".into())]);
        let b = Scripted::new("B", vec![Err("down".into())]);
        let pipeline = AnalysisPipeline::new(a, b, Arc::new(NoSearch), PipelineLimits::default());
        let rec = Recorder::default();

        let entry = pipeline.analyze("report", &ctx(), &rec).await;

        assert!(entry.synthesis_failed);
        assert!(entry.claims.is_empty());
        assert!(!entry.follow_up_question.is_empty());
        assert_eq!(entry.follow_up_question, SYNTHESIS_FAILED_FOLLOW_UP);
        assert_eq!(entry.enriched_question, SYNTHESIS_FAILED_FOLLOW_UP);
        assert!(rec.steps.lock().unwrap().contains(&"Synthesis failed".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn no_search_credential_skips_search() {
        let a = Scripted::new("A", vec![Ok("A verifiable claim".into())]);
        let b = Scripted::new("B", vec![Ok(SYNTH.into())]);
        let pipeline = AnalysisPipeline::new(a, b, Arc::new(NoSearch), PipelineLimits::default());
        let rec = Recorder::default();

        let entry = pipeline.analyze("report", &ctx(), &rec).await;

        assert!(entry.search_evidence.is_empty());
        assert_eq!(entry.evidence_markdown(150), NO_SEARCH_RESULTS);
        assert!(rec.steps.lock().unwrap().contains(&"Search skipped".to_string()));
        assert!(!entry.enriched_question.contains(NO_SEARCH_RESULTS));
    }

    /// Ignores `count` and always returns everything it holds.
    struct Flooding(Vec<SearchResult>);

    impl SearchBackend for Flooding {
        fn name(&self) -> &str {
            "flooding"
        }

        fn search<'a>(&'a self, _query: &'a str, _count: usize) -> SearchFuture<'a> {
            let hits = self.0.clone();
            Box::pin(async move { hits })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn per_claim_cap_holds_when_backend_overshoots() {
        let a = Scripted::new(
            "A",
            vec![Ok("Claim number one\nClaim number two\nClaim number three".into())],
        );
        let b = Scripted::new("B", vec![Ok(SYNTH.into())]);
        let search = Arc::new(Flooding((1..=6).map(hit).collect()));
        let pipeline = AnalysisPipeline::new(a, b, search, PipelineLimits::default());

        let entry = pipeline.analyze("report", &ctx(), &NullObserver).await;

        // 2 + 2 + 1, not six hits from the first claim
        let urls: Vec<_> = entry.search_evidence.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/1",
                "https://example.com/2",
                "https://example.com/1",
                "https://example.com/2",
                "https://example.com/1",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn search_delay_only_after_hits() {
        let a = Scripted::new("A", vec![Ok("claim one here\nclaim two here".into())]);
        let b = Scripted::new("B", vec![Ok(SYNTH.into())]);
        let limits = PipelineLimits {
            search_delay: Duration::from_secs(30),
            ..PipelineLimits::default()
        };
        let empty = Arc::new(FixedSearch(vec![], Mutex::new(vec![])));
        let pipeline = AnalysisPipeline::new(a, b, empty, limits);

        let start = tokio::time::Instant::now();
        pipeline.analyze("report", &ctx(), &NullObserver).await;
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}
