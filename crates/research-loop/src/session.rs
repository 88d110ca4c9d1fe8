//! Research session data model.
//!
//! A [`ResearchSession`] is owned exclusively by the controller. Readers get
//! a [`SessionSnapshot`], a cloned, serializable projection that is safe to
//! hand to subscribers and the relay.

use crate::backend::BackendRole;
use crate::backend::search::SearchResult;
use crate::progress::{ProgressEntry, ProgressLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::debug;

/// Marker used when a round gathered no web evidence.
pub const NO_SEARCH_RESULTS: &str = "(no search results)";

/// Generate a unique session id.
pub fn generate_session_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("rs-{ts:x}-{count:04x}")
}

/// Conversation key handed to backend B so it keeps one context per session.
pub fn conversation_key(session_id: &str) -> String {
    format!("rl-{session_id}")
}

// ── State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    WaitingResearch,
    Analyzing,
    InsertingQuestion,
    WaitingConfirm,
    AutoSubmit,
    WaitingFinalReport,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::WaitingResearch => "WAITING_RESEARCH",
            Self::Analyzing => "ANALYZING",
            Self::InsertingQuestion => "INSERTING_QUESTION",
            Self::WaitingConfirm => "WAITING_CONFIRM",
            Self::AutoSubmit => "AUTO_SUBMIT",
            Self::WaitingFinalReport => "WAITING_FINAL_REPORT",
        }
    }

    /// States in which the poller watches the host surface.
    pub fn is_polling(&self) -> bool {
        matches!(self, Self::WaitingResearch | Self::WaitingFinalReport)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Entries ────────────────────────────────────────────────────────

/// Raw text captured from the host surface for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub round: u32,
    pub content: String,
    pub extracted_at: DateTime<Utc>,
}

/// Output of the analysis pipeline for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEntry {
    pub round: u32,
    pub claims: Vec<String>,
    pub search_evidence: Vec<SearchResult>,
    pub synthesis: String,
    pub self_assessment: String,
    pub follow_up_question: String,
    pub enriched_question: String,
    /// Both synthesis backends failed; the follow-up is a placeholder.
    #[serde(default)]
    pub synthesis_failed: bool,
    pub created_at: DateTime<Utc>,
}

impl AnalysisEntry {
    /// Evidence as markdown bullets, or [`NO_SEARCH_RESULTS`].
    pub fn evidence_markdown(&self, max_description_chars: usize) -> String {
        format_evidence(&self.search_evidence, max_description_chars)
    }
}

/// Render search results as markdown bullets, or [`NO_SEARCH_RESULTS`].
pub fn format_evidence(results: &[SearchResult], max_description_chars: usize) -> String {
    if results.is_empty() {
        return NO_SEARCH_RESULTS.to_string();
    }
    results
        .iter()
        .map(|r| r.to_markdown(max_description_chars))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Why a session ended without the host's own summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingReason {
    Cancelled,
    FinalReportTimeout,
    ResearchTimeout,
    StopFailed,
}

impl fmt::Display for ClosingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cancelled => "cancelled by user",
            Self::FinalReportTimeout => "final summary did not arrive in time",
            Self::ResearchTimeout => "host surface did not answer in time",
            Self::StopFailed => "final summary could not be requested",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum FinalReportSource {
    /// Written by the host surface in answer to the summary prompt.
    HostSurface,
    /// Synthesized locally from completed rounds.
    Internal(ClosingReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub source: FinalReportSource,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl FinalReport {
    pub fn is_internal(&self) -> bool {
        matches!(self.source, FinalReportSource::Internal(_))
    }
}

/// Backend call counters, reset per session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounters {
    pub backend_a_calls: u32,
    pub backend_b_calls: u32,
}

impl UsageCounters {
    pub fn record(&mut self, role: BackendRole) {
        match role {
            BackendRole::Extraction => self.backend_a_calls += 1,
            BackendRole::Synthesis => self.backend_b_calls += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.backend_a_calls + self.backend_b_calls
    }
}

// ── ResearchSession ────────────────────────────────────────────────

/// The single active research session.
///
/// Invariants maintained by the mutators:
/// - `1 <= round <= max_rounds + 1`
/// - at most one report and one analysis per round, in increasing round order
/// - every analysis has a report for the same round
/// - reports, analyses and progress entries are never edited once appended
#[derive(Debug, Clone)]
pub struct ResearchSession {
    id: String,
    topic: String,
    state: SessionState,
    round: u32,
    max_rounds: u32,
    auto_mode: bool,
    reports: Vec<ReportEntry>,
    analyses: Vec<AnalysisEntry>,
    progress: ProgressLog,
    final_report: Option<FinalReport>,
    usage: UsageCounters,
    created_at: DateTime<Utc>,
    waiting_for_growth: bool,
    growth_baseline: usize,
    stop_requested: bool,
    surface_unreachable: bool,
    state_entered_at: Instant,
}

impl ResearchSession {
    pub fn new(id: impl Into<String>, topic: impl Into<String>, max_rounds: u32, auto_mode: bool) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            state: SessionState::Idle,
            round: 1,
            max_rounds: max_rounds.max(1),
            auto_mode,
            reports: Vec::new(),
            analyses: Vec::new(),
            progress: ProgressLog::new(),
            final_report: None,
            usage: UsageCounters::default(),
            created_at: Utc::now(),
            waiting_for_growth: false,
            growth_baseline: 0,
            stop_requested: false,
            surface_unreachable: false,
            state_entered_at: Instant::now(),
        }
    }

    // ── Accessors ──

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn reports(&self) -> &[ReportEntry] {
        &self.reports
    }

    pub fn analyses(&self) -> &[AnalysisEntry] {
        &self.analyses
    }

    pub fn progress(&self) -> &ProgressLog {
        &self.progress
    }

    pub fn final_report(&self) -> Option<&FinalReport> {
        self.final_report.as_ref()
    }

    pub fn usage(&self) -> UsageCounters {
        self.usage
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn waiting_for_growth(&self) -> bool {
        self.waiting_for_growth
    }

    pub fn growth_baseline(&self) -> usize {
        self.growth_baseline
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Time since the current state was entered.
    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    pub fn is_last_round(&self) -> bool {
        self.round >= self.max_rounds
    }

    pub fn report_for_round(&self, round: u32) -> Option<&ReportEntry> {
        self.reports.iter().find(|r| r.round == round)
    }

    /// Follow-up questions asked so far, oldest first.
    pub fn prior_questions(&self) -> Vec<String> {
        self.analyses
            .iter()
            .map(|a| a.follow_up_question.clone())
            .filter(|q| !q.is_empty())
            .collect()
    }

    /// The enriched question waiting for human confirmation.
    pub fn pending_question(&self) -> Option<&str> {
        if self.state != SessionState::WaitingConfirm {
            return None;
        }
        self.analyses
            .iter()
            .rev()
            .find(|a| a.round == self.round)
            .map(|a| a.enriched_question.as_str())
    }

    // ── Mutators ──

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(session = %self.id, "state {} -> {}", self.state, state);
        }
        self.state = state;
        self.state_entered_at = Instant::now();
    }

    pub(crate) fn progress_mut(&mut self) -> &mut ProgressLog {
        &mut self.progress
    }

    /// Record the report for the current round. Returns `false` if one was
    /// already recorded.
    pub(crate) fn record_report(&mut self, content: String) -> bool {
        if self.report_for_round(self.round).is_some() {
            return false;
        }
        self.reports.push(ReportEntry {
            round: self.round,
            content,
            extracted_at: Utc::now(),
        });
        true
    }

    /// Record an analysis. Rejected unless its round has a report and is
    /// newer than every existing analysis.
    pub(crate) fn record_analysis(&mut self, analysis: AnalysisEntry) -> bool {
        let newer = self
            .analyses
            .last()
            .is_none_or(|last| analysis.round > last.round);
        if !newer || self.report_for_round(analysis.round).is_none() {
            return false;
        }
        self.analyses.push(analysis);
        true
    }

    /// Move to the next round. Never goes past `max_rounds + 1`.
    pub(crate) fn advance_round(&mut self) {
        self.round = self
            .round
            .saturating_add(1)
            .min(self.max_rounds.saturating_add(1));
    }

    /// Latch the stop request. Returns `false` if it was already set.
    pub(crate) fn request_stop(&mut self) -> bool {
        !std::mem::replace(&mut self.stop_requested, true)
    }

    /// Record whether the host surface is failing. Returns `true` when the
    /// value changed.
    pub(crate) fn set_surface_unreachable(&mut self, unreachable: bool) -> bool {
        std::mem::replace(&mut self.surface_unreachable, unreachable) != unreachable
    }

    pub(crate) fn begin_growth_wait(&mut self, baseline: usize) {
        self.waiting_for_growth = true;
        self.growth_baseline = baseline;
    }

    pub(crate) fn clear_growth_wait(&mut self) {
        self.waiting_for_growth = false;
        self.growth_baseline = 0;
    }

    pub(crate) fn set_final_report(&mut self, source: FinalReportSource, text: String) {
        self.final_report = Some(FinalReport {
            source,
            text,
            received_at: Utc::now(),
        });
    }

    pub(crate) fn record_backend_call(&mut self, role: BackendRole) {
        self.usage.record(role);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            topic: self.topic.clone(),
            state: self.state,
            round: self.round,
            max_rounds: self.max_rounds,
            auto_mode: self.auto_mode,
            waiting_for_growth: self.waiting_for_growth,
            created_at: self.created_at,
            progress_log: self.progress.entries().to_vec(),
            reports: self.reports.clone(),
            analyses: self.analyses.clone(),
            final_report: self.final_report.clone(),
            usage: self.usage,
        }
    }
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Serializable view of a session, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub topic: String,
    pub state: SessionState,
    pub round: u32,
    pub max_rounds: u32,
    pub auto_mode: bool,
    pub waiting_for_growth: bool,
    pub created_at: DateTime<Utc>,
    pub progress_log: Vec<ProgressEntry>,
    pub reports: Vec<ReportEntry>,
    pub analyses: Vec<AnalysisEntry>,
    pub final_report: Option<FinalReport>,
    pub usage: UsageCounters,
}

impl SessionSnapshot {
    /// The most recent progress entry.
    pub fn last_progress(&self) -> Option<&ProgressEntry> {
        self.progress_log.last()
    }
}
