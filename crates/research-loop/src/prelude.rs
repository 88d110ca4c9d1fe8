//! Convenience re-exports for common `research-loop` types.
//!
//! ```ignore
//! use research_loop::prelude::*;
//! ```
//!
//! Covers what a host program needs to wire up and drive a session: the
//! controller and its options, configuration, the backend and surface
//! seams, event handlers, and the session snapshot. Prompt builders and
//! section parsing live in [`analysis`](crate::analysis); import them
//! directly when needed.

// ── Controller ──────────────────────────────────────────────────────
pub use crate::controller::{ControllerError, MAX_ROUNDS_LIMIT, SessionController, StartOptions};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{BackendConfig, EndpointConfig, GrowthPolicy, LoopConfig, PipelineLimits};

// ── Analysis and backends ───────────────────────────────────────────
pub use crate::analysis::{AnalysisPipeline, NullObserver, PipelineObserver, RoundContext};
pub use crate::backend::search::{BraveSearch, NoSearch, SearchBackend, SearchFuture, SearchResult};
pub use crate::backend::{BackendFuture, BackendRole, ChatBackend, CompletionRequest, ReasoningBackend};

// ── Host surface ────────────────────────────────────────────────────
pub use crate::surface::{HostSurface, HttpSurface, SurfaceFuture};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    SessionEvent, SubscriptionId,
};

// ── Session data ────────────────────────────────────────────────────
pub use crate::progress::{ProgressEntry, ProgressLog};
pub use crate::report::render_report;
pub use crate::session::{
    AnalysisEntry, ClosingReason, FinalReport, FinalReportSource, ReportEntry, ResearchSession,
    SessionSnapshot, SessionState, UsageCounters,
};
