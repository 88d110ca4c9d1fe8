//! Host surface capability.
//!
//! The host surface is the interactive text product being driven: it accepts
//! a question, produces a long response over time, and can be asked whether
//! it is still writing. The controller only ever sees it through the
//! [`HostSurface`] trait, so the loop is testable without a browser.
//!
//! [`HttpSurface`] is the production adapter: a thin JSON client for a
//! companion process (extension bridge, automation driver) that exposes the
//! capability over HTTP.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Boxed future returned by [`HostSurface`] operations.
pub type SurfaceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

pub trait HostSurface: Send + Sync {
    /// Place `text` in the input. When `auto_submit` is true the surface
    /// submits it; otherwise it waits for a human to press send.
    fn submit_question<'a>(&'a self, text: &'a str, auto_submit: bool) -> SurfaceFuture<'a, ()>;

    /// Whether the surface is still generating output.
    fn is_producing_output(&self) -> SurfaceFuture<'_, bool>;

    /// The most recent response, if it has not been marked as seen.
    fn check_for_new_content(&self) -> SurfaceFuture<'_, Option<String>>;

    /// The current response, only if it is at least `min_length` characters.
    fn check_for_content_growth(&self, min_length: usize) -> SurfaceFuture<'_, Option<String>>;

    /// Record the current response as already consumed so
    /// [`check_for_new_content`](Self::check_for_new_content) ignores it.
    fn mark_current_content_as_seen(&self) -> SurfaceFuture<'_, ()>;

    /// Start a fresh conversation.
    fn reset_conversation(&self) -> SurfaceFuture<'_, ()>;
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    pub text: String,
    pub auto_submit: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StatusBody {
    pub producing: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ContentBody {
    #[serde(default)]
    pub content: Option<String>,
}

// ── HttpSurface ────────────────────────────────────────────────────

/// [`HostSurface`] backed by a JSON-over-HTTP bridge.
///
/// | Operation | Request |
/// |-----------|---------|
/// | submit | `POST /submit` `{text, autoSubmit}` |
/// | producing | `GET /status` → `{producing}` |
/// | new content | `GET /latest` → `{content}` |
/// | growth | `GET /growth?min_length=N` → `{content}` |
/// | mark seen | `POST /mark-seen` |
/// | reset | `POST /reset` |
pub struct HttpSurface {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSurface {
    pub fn new(base_url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| e.to_string())?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, String> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(format!("HTTP {status}: {body}"))
        }
    }

    async fn post_empty(&self, path: &str) -> Result<(), String> {
        let resp = self
            .client
            .post(self.url(path))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::check(resp).await.map(|_| ())
    }

    async fn get_content(
        &self,
        path: &str,
        min_length: Option<usize>,
    ) -> Result<Option<String>, String> {
        let mut req = self.client.get(self.url(path));
        if let Some(min) = min_length {
            req = req.query(&[("min_length", min)]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let body: ContentBody = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e: reqwest::Error| e.to_string())?;
        Ok(body.content.filter(|c| !c.trim().is_empty()))
    }
}

impl HostSurface for HttpSurface {
    fn submit_question<'a>(&'a self, text: &'a str, auto_submit: bool) -> SurfaceFuture<'a, ()> {
        Box::pin(async move {
            debug!("surface submit ({} chars, auto={auto_submit})", text.len());
            let resp = self
                .client
                .post(self.url("/submit"))
                .json(&SubmitBody {
                    text: text.to_string(),
                    auto_submit,
                })
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Self::check(resp).await.map(|_| ())
        })
    }

    fn is_producing_output(&self) -> SurfaceFuture<'_, bool> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.url("/status"))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let body: StatusBody = Self::check(resp)
                .await?
                .json()
                .await
                .map_err(|e: reqwest::Error| e.to_string())?;
            Ok(body.producing)
        })
    }

    fn check_for_new_content(&self) -> SurfaceFuture<'_, Option<String>> {
        Box::pin(self.get_content("/latest", None))
    }

    fn check_for_content_growth(&self, min_length: usize) -> SurfaceFuture<'_, Option<String>> {
        Box::pin(self.get_content("/growth", Some(min_length)))
    }

    fn mark_current_content_as_seen(&self) -> SurfaceFuture<'_, ()> {
        Box::pin(self.post_empty("/mark-seen"))
    }

    fn reset_conversation(&self) -> SurfaceFuture<'_, ()> {
        Box::pin(self.post_empty("/reset"))
    }
}
