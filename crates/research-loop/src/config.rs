//! Loop timing, growth heuristic, pipeline limits, and backend endpoints.
//!
//! Every knob has a default matching production behaviour; builders override
//! individual values. Backend endpoints are read from the environment by
//! [`BackendConfig::from_env`].

use crate::analysis::AnalysisPipeline;
use crate::backend::search::{BraveSearch, NoSearch, SearchBackend};
use crate::backend::{BackendRole, ChatBackend, ReasoningBackend};
use crate::{DEFAULT_BACKEND_TIMEOUT, DEFAULT_MAX_TOKENS};
use std::sync::Arc;
use std::time::Duration;

// ── Growth heuristic ───────────────────────────────────────────────

/// Detects "acknowledgement" responses that the host surface later expands
/// in place into the real report.
///
/// A response shorter than `min_content_len` is not treated as a report.
/// Instead its length becomes the baseline, and a later candidate is only
/// accepted once it reaches both `growth_factor × baseline` and
/// `min_content_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    pub min_content_len: usize,
    pub growth_factor: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            min_content_len: 200,
            growth_factor: 2,
        }
    }
}

impl GrowthPolicy {
    /// Whether a freshly observed response is too short to be a report.
    pub fn is_too_short(&self, len: usize) -> bool {
        len < self.min_content_len
    }

    /// Whether `candidate_len` has grown enough past `baseline_len`.
    pub fn accepts(&self, baseline_len: usize, candidate_len: usize) -> bool {
        candidate_len >= self.min_content_len
            && candidate_len >= baseline_len.saturating_mul(self.growth_factor)
    }
}

// ── Loop timing ────────────────────────────────────────────────────

/// Timing configuration for the session controller and poller.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Interval between host surface polls.
    pub poll_interval: Duration,
    /// How long to wait for the host's final summary before falling back
    /// to an internally generated report.
    pub final_report_timeout: Duration,
    /// Optional ceiling on a single round's WAITING_RESEARCH phase. `None`
    /// waits indefinitely.
    pub research_timeout: Option<Duration>,
    /// Heartbeat period while analysis or final-report waits are pending.
    pub keep_alive_interval: Duration,
    /// Delay between a completed session and the conversation reset.
    pub reset_delay: Duration,
    pub growth: GrowthPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            final_report_timeout: Duration::from_secs(180),
            research_timeout: None,
            keep_alive_interval: Duration::from_secs(25),
            reset_delay: Duration::from_secs(1),
            growth: GrowthPolicy::default(),
        }
    }
}

impl LoopConfig {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn final_report_timeout(mut self, timeout: Duration) -> Self {
        self.final_report_timeout = timeout;
        self
    }

    pub fn research_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.research_timeout = timeout;
        self
    }

    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    pub fn growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = growth;
        self
    }
}

// ── Pipeline limits ────────────────────────────────────────────────

/// Truncation and fan-out limits for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct PipelineLimits {
    /// Characters of the report passed to claim extraction.
    pub extraction_chars: usize,
    /// Characters of the report passed to synthesis.
    pub synthesis_chars: usize,
    pub max_claims: usize,
    /// How many of the extracted claims are searched.
    pub searched_claims: usize,
    pub results_per_claim: usize,
    pub max_results: usize,
    /// Pause after a search that returned results.
    pub search_delay: Duration,
    pub max_query_chars: usize,
    pub max_description_chars: usize,
    /// Characters of synthesis appended to the enriched question.
    pub enrich_synthesis_chars: usize,
    /// Characters of evidence appended to the enriched question.
    pub enrich_evidence_chars: usize,
    pub backend_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            extraction_chars: 4000,
            synthesis_chars: 6000,
            max_claims: 5,
            searched_claims: 3,
            results_per_claim: 2,
            max_results: 5,
            search_delay: Duration::from_millis(500),
            max_query_chars: 200,
            max_description_chars: 150,
            enrich_synthesis_chars: 2000,
            enrich_evidence_chars: 1000,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }
}

// ── Backend endpoints ──────────────────────────────────────────────

/// One OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// Endpoints for both reasoning backends plus the optional search key.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub backend_a: EndpointConfig,
    pub backend_b: EndpointConfig,
    pub search_api_key: Option<String>,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn endpoint_from_env(prefix: &str) -> Result<EndpointConfig, String> {
    let url = env_nonempty(&format!("{prefix}_URL"))
        .ok_or_else(|| format!("{prefix}_URL environment variable not set"))?;
    let model = env_nonempty(&format!("{prefix}_MODEL"))
        .ok_or_else(|| format!("{prefix}_MODEL environment variable not set"))?;
    Ok(EndpointConfig {
        url,
        api_key: env_nonempty(&format!("{prefix}_KEY")),
        model,
    })
}

impl BackendConfig {
    /// Read endpoints from the environment.
    ///
    /// Backend A (fast extraction, fallback) reads `RESEARCH_BACKEND_A_URL`,
    /// `RESEARCH_BACKEND_A_KEY`, `RESEARCH_BACKEND_A_MODEL`; backend B
    /// (synthesis) reads the same names with `_B_`. `BRAVE_SEARCH_KEY` is
    /// optional: without it evidence gathering is skipped.
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            backend_a: endpoint_from_env("RESEARCH_BACKEND_A")?,
            backend_b: endpoint_from_env("RESEARCH_BACKEND_B")?,
            search_api_key: env_nonempty("BRAVE_SEARCH_KEY"),
        })
    }

    /// Build the analysis pipeline for these endpoints.
    pub fn build_pipeline(&self, limits: PipelineLimits) -> Result<AnalysisPipeline, String> {
        let backend_a: Arc<dyn ReasoningBackend> = Arc::new(ChatBackend::new(
            BackendRole::Extraction,
            &self.backend_a.url,
            self.backend_a.api_key.clone(),
            &self.backend_a.model,
            DEFAULT_MAX_TOKENS,
            limits.backend_timeout,
        )?);
        let backend_b: Arc<dyn ReasoningBackend> = Arc::new(ChatBackend::new(
            BackendRole::Synthesis,
            &self.backend_b.url,
            self.backend_b.api_key.clone(),
            &self.backend_b.model,
            DEFAULT_MAX_TOKENS,
            limits.backend_timeout,
        )?);
        let search: Arc<dyn SearchBackend> = match &self.search_api_key {
            Some(key) => Arc::new(BraveSearch::new(key.clone())?),
            None => Arc::new(NoSearch),
        };
        Ok(AnalysisPipeline::new(backend_a, backend_b, search, limits))
    }
}
