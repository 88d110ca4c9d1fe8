//! Append-only, timestamped progress log.
//!
//! Every notable step of a session (question sent, report received, claims
//! extracted, fallback used) lands here. The log is what the relay and the
//! final report show as "what happened", so entries are never edited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One progress entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub time: DateTime<Utc>,
    pub step: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressLog {
    entries: Vec<ProgressEntry>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry stamped with the current time and return it.
    pub fn push(&mut self, step: impl Into<String>, detail: impl Into<String>) -> &ProgressEntry {
        let entry = ProgressEntry {
            time: Utc::now(),
            step: step.into(),
            detail: detail.into(),
        };
        info!(step = %entry.step, "{}", entry.detail);
        let idx = self.entries.len();
        self.entries.push(entry);
        &self.entries[idx]
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ProgressEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose step matches `step`.
    pub fn with_step<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a ProgressEntry> + 'a {
        self.entries.iter().filter(move |e| e.step == step)
    }
}
