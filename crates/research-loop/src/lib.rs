//! Multi-round research orchestrator.
//!
//! `research-loop` drives an external interactive text surface (a chat page,
//! a deep-research product, anything that answers one question at a time)
//! through a bounded number of research rounds. Each round's answer is run
//! through an [`AnalysisPipeline`](analysis::AnalysisPipeline) that extracts
//! verifiable claims, cross-checks them against web search, asks a reasoning
//! backend for a critique plus a sharper follow-up question, and feeds that
//! question back into the surface.
//!
//! The core abstraction is the [`SessionController`](controller::SessionController):
//! a long-lived state machine that owns the single active
//! [`ResearchSession`](session::ResearchSession), polls the host surface via
//! the [`Poller`](poller::Poller), and can always render a coherent report
//! with [`render_report`](report::render_report), even when cancelled mid-round.
//!
//! # Getting started
//!
//! ```ignore
//! use research_loop::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let backends = BackendConfig::from_env()?;
//!     let pipeline = backends.build_pipeline(PipelineLimits::default())?;
//!     let surface = Arc::new(HttpSurface::new("http://127.0.0.1:3900")?);
//!
//!     let controller = SessionController::new(surface, pipeline, LoopConfig::default());
//!     controller.subscribe(Arc::new(LoggingHandler));
//!
//!     controller
//!         .start("How do solid-state batteries fail?", StartOptions::default(), None)
//!         .await
//!         .map_err(|e| e.to_string())?;
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`controller`] | [`SessionController`](controller::SessionController): start / stop / cancel / confirm, round progression |
//! | [`poller`] | Timer loop against the host surface, keep-alive heartbeat |
//! | [`analysis`] | Claim extraction, evidence search, synthesis with fallback, enrichment |
//! | [`backend`] | [`ReasoningBackend`](backend::ReasoningBackend) and [`SearchBackend`](backend::search::SearchBackend) seams |
//! | [`surface`] | [`HostSurface`](surface::HostSurface) capability trait and an HTTP adapter |
//! | [`session`] | Session data model and its serializable snapshot |
//! | [`progress`] | Append-only progress log |
//! | [`events`] | State-change subscription ([`EventHandler`](events::EventHandler)) |
//! | [`report`] | Deterministic report assembly |
//! | [`config`] | Timing, growth heuristic, pipeline limits, backend endpoints |

pub mod analysis;
pub mod backend;
pub mod config;
pub mod controller;
pub mod events;
pub mod poller;
pub mod prelude;
pub mod progress;
pub mod report;
pub mod session;
pub mod surface;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

/// Default per-call ceiling for reasoning backends.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(120);

/// Default completion budget for reasoning calls.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// ── Text helpers ───────────────────────────────────────────────────

/// Truncate `s` to at most `max` characters, respecting char boundaries.
///
/// ```
/// use research_loop::truncate_chars;
///
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// assert_eq!(truncate_chars("short", 10), "short");
/// ```
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s.get(..idx).unwrap_or(s),
        None => s,
    }
}

/// Number of characters (not bytes) in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body for OpenAI-compatible endpoints.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Conversation key. Stateful proxies map this onto a persistent
    /// session so context survives across calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from [`ChatClient::chat()`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions endpoint.
///
/// Works against hosted APIs (bearer key) and local proxies (no key).
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ChatClient {
    /// Create a client for `endpoint` (the full `/chat/completions` URL).
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("research-loop/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    /// The endpoint this client posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: endpoint={}, model={}, messages={}, max_tokens={:?}",
            self.endpoint,
            body.model,
            body.messages.len(),
            body.max_tokens,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let mut req = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("HTTP {status}: {}", truncate_chars(&text, 500)));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;

        if let Some(err) = parsed.error {
            return Err(format!("API error: {}", err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        Ok(match choice {
            Some(c) => ChatCompletion {
                content: c.message.content,
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            },
            None => ChatCompletion {
                content: None,
                usage: parsed.usage,
                finish_reason: None,
            },
        })
    }
}
