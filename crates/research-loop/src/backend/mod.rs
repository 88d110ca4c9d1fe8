//! Reasoning backend seam.
//!
//! The analysis pipeline talks to two text-generation services through the
//! [`ReasoningBackend`] trait: backend A handles fast claim extraction and
//! acts as the synthesis fallback, backend B handles synthesis and keeps a
//! per-session conversation. [`ChatBackend`] is the production adapter over
//! an OpenAI-compatible endpoint; tests substitute scripted fakes.

pub mod search;

use crate::{ChatClient, ChatRequest, Message};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Boxed future returned by [`ReasoningBackend::complete`].
pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

/// Which slot a backend fills in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendRole {
    /// Backend A: claim extraction, synthesis fallback.
    Extraction,
    /// Backend B: synthesis.
    Synthesis,
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraction => f.write_str("backend A"),
            Self::Synthesis => f.write_str("backend B"),
        }
    }
}

/// A single completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub system_prompt: Option<&'a str>,
    /// Conversation key for backends that keep server-side context.
    pub conversation: Option<&'a str>,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            system_prompt: None,
            conversation: None,
        }
    }

    pub fn system(mut self, system_prompt: &'a str) -> Self {
        self.system_prompt = Some(system_prompt);
        self
    }

    pub fn conversation(mut self, key: &'a str) -> Self {
        self.conversation = Some(key);
        self
    }
}

/// A text-generation service.
///
/// Implementations return `Err` for transport failures, non-success status,
/// and empty completions. They must not panic. Uses a boxed future so the
/// trait stays dyn-compatible.
pub trait ReasoningBackend: Send + Sync {
    /// Human-readable name used in logs and progress entries.
    fn name(&self) -> &str;

    fn complete<'a>(&'a self, request: CompletionRequest<'a>) -> BackendFuture<'a>;
}

/// Run `backend.complete` under a hard deadline.
///
/// The deadline applies on top of whatever transport timeout the backend
/// already has, so a stalled fake or proxy cannot hang a round.
pub async fn complete_with_timeout(
    backend: &dyn ReasoningBackend,
    request: CompletionRequest<'_>,
    timeout: Duration,
) -> Result<String, String> {
    match tokio::time::timeout(timeout, backend.complete(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "{} did not answer within {}s",
                backend.name(),
                timeout.as_secs()
            );
            Err(format!("timed out after {}s", timeout.as_secs()))
        }
    }
}

// ── ChatBackend ────────────────────────────────────────────────────

/// [`ReasoningBackend`] over an OpenAI-compatible chat completions endpoint.
pub struct ChatBackend {
    name: String,
    client: ChatClient,
    model: String,
    max_tokens: u32,
}

impl ChatBackend {
    pub fn new(
        role: BackendRole,
        endpoint: &str,
        api_key: Option<String>,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, String> {
        Ok(Self {
            name: format!("{role} ({model})"),
            client: ChatClient::new(endpoint, api_key, timeout)?,
            model: model.to_string(),
            max_tokens,
        })
    }

    fn build_request(&self, request: &CompletionRequest<'_>) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(request.prompt));
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(self.max_tokens),
            temperature: None,
            user: request.conversation.map(str::to_string),
        }
    }
}

impl ReasoningBackend for ChatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete<'a>(&'a self, request: CompletionRequest<'a>) -> BackendFuture<'a> {
        let body = self.build_request(&request);
        Box::pin(async move {
            let completion = self.client.chat(&body).await?;
            let text = completion.content.unwrap_or_default();
            if text.trim().is_empty() {
                return Err(format!(
                    "empty completion (finish_reason={:?})",
                    completion.finish_reason
                ));
            }
            debug!("{} returned {} chars", self.name, text.len());
            Ok(text)
        })
    }
}
