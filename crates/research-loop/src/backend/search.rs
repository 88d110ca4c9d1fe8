//! Web search backend used to cross-check extracted claims.
//!
//! Search is best-effort: every failure (network, quota, parse) degrades to
//! an empty result list and a warning, never an error that could break a
//! round.

use crate::truncate_chars;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Boxed future returned by [`SearchBackend::search`].
pub type SearchFuture<'a> = Pin<Box<dyn Future<Output = Vec<SearchResult>> + Send + 'a>>;

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

/// One web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

impl SearchResult {
    /// Render as a markdown bullet, clipping the description.
    pub fn to_markdown(&self, max_description_chars: usize) -> String {
        format!(
            "- [{}]({}): {}",
            self.title,
            self.url,
            truncate_chars(&self.description, max_description_chars)
        )
    }
}

pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this backend can return results at all. The pipeline skips
    /// the search step entirely when this is `false`.
    fn is_available(&self) -> bool {
        true
    }

    fn search<'a>(&'a self, query: &'a str, count: usize) -> SearchFuture<'a>;
}

// ── NoSearch ───────────────────────────────────────────────────────

/// Search backend used when no credential is configured.
pub struct NoSearch;

impl SearchBackend for NoSearch {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn search<'a>(&'a self, _query: &'a str, _count: usize) -> SearchFuture<'a> {
        Box::pin(async { Vec::new() })
    }
}

// ── BraveSearch ────────────────────────────────────────────────────

/// Brave Search API client.
///
/// Requires a subscription token (free tier at <https://brave.com/search/api/>).
pub struct BraveSearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl BraveSearch {
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: BRAVE_ENDPOINT.to_string(),
        })
    }

    /// Point the client at a different endpoint (local mocks).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn query(&self, query: &str, count: usize) -> Result<Vec<SearchResult>, String> {
        let count = count.to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("count", count.as_str())])
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {}", truncate_chars(&body, 300)));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e: reqwest::Error| e.to_string())?;
        Ok(parse_brave_results(&body))
    }
}

impl SearchBackend for BraveSearch {
    fn name(&self) -> &str {
        "brave"
    }

    fn search<'a>(&'a self, query: &'a str, count: usize) -> SearchFuture<'a> {
        Box::pin(async move {
            match self.query(query, count).await {
                Ok(results) => {
                    debug!("search '{}' returned {} results", query, results.len());
                    results
                }
                Err(e) => {
                    warn!("search '{}' failed: {e}", truncate_chars(query, 80));
                    Vec::new()
                }
            }
        })
    }
}

/// Pull `web.results[*].{title,url,description}` out of a Brave response.
fn parse_brave_results(body: &serde_json::Value) -> Vec<SearchResult> {
    body["web"]["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .filter_map(|r| {
                    let url = r["url"].as_str()?;
                    Some(SearchResult {
                        title: r["title"].as_str().unwrap_or("").to_string(),
                        url: url.to_string(),
                        description: r["description"].as_str().unwrap_or("").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
