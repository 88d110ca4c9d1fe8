//! Host surface polling and keep-alive heartbeat.
//!
//! A [`Poller`] is one tokio task bound to one session id. Each tick awaits
//! the target's [`PollTarget::tick`] inline, so ticks never overlap: while a
//! round is being analyzed the timer simply falls behind
//! ([`MissedTickBehavior::Delay`]) instead of stacking up work. The loop
//! ends when a tick returns [`TickOutcome::Stop`], which the controller does
//! once the session leaves its polling states or is replaced.
//!
//! Tick errors and panics are logged and swallowed; the next tick runs
//! normally.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

pub type TickFuture<'a> = Pin<Box<dyn Future<Output = Result<TickOutcome, String>> + Send + 'a>>;

/// Something the poller drives.
pub trait PollTarget: Send + Sync + 'static {
    fn tick<'a>(&'a self, session_id: &'a str) -> TickFuture<'a>;
}

// ── Poller ─────────────────────────────────────────────────────────

pub struct Poller {
    session_id: String,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Start polling. The first tick fires one `interval` from now.
    pub fn spawn<T: PollTarget>(target: T, session_id: impl Into<String>, interval: Duration) -> Self {
        let session_id: String = session_id.into();
        let id = session_id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("[{id}] poller started ({}ms)", interval.as_millis());
            loop {
                ticker.tick().await;
                match AssertUnwindSafe(target.tick(&id)).catch_unwind().await {
                    Ok(Ok(TickOutcome::Continue)) => {}
                    Ok(Ok(TickOutcome::Stop)) => break,
                    Ok(Err(e)) => warn!("[{id}] poll tick failed: {e}"),
                    Err(_) => error!("[{id}] poll tick panicked, continuing"),
                }
            }
            debug!("[{id}] poller stopped");
        });
        Self { session_id, handle }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the loop immediately, dropping any tick in flight.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

// ── KeepAlive ──────────────────────────────────────────────────────

/// Periodic heartbeat held while a long wait is pending.
///
/// The host runtime may suspend idle workers; the heartbeat keeps the
/// process visibly busy. It stops when the guard is dropped.
pub struct KeepAlive {
    handle: JoinHandle<()>,
    pings: Arc<AtomicU64>,
}

impl KeepAlive {
    pub fn start(label: impl Into<String>, period: Duration) -> Self {
        let label: String = label.into();
        let pings = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&pings);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("keep-alive ping #{n} ({label})");
            }
        });
        Self { handle, pings }
    }

    /// Heartbeats sent so far.
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
