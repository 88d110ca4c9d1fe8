//! Session events and subscription.
//!
//! The controller emits a [`SessionEvent`] after every state transition,
//! progress entry, and usage change. Subscribers implement [`EventHandler`]
//! and register through [`Subscribers`] (exposed as
//! [`SessionController::subscribe`](crate::controller::SessionController::subscribe)).
//!
//! Handlers run synchronously on the controller's task, outside any session
//! lock, so they may call back into the controller's read operations. Keep
//! them fast: forward to a channel if work is heavy.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Default, ignores everything |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::progress::ProgressEntry;
use crate::session::{SessionSnapshot, SessionState};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// The session moved to a new state.
    StateChanged {
        from: SessionState,
        to: SessionState,
        snapshot: &'a SessionSnapshot,
    },
    /// A progress entry was appended.
    Progress {
        entry: &'a ProgressEntry,
        snapshot: &'a SessionSnapshot,
    },
    /// A backend call was counted.
    UsageChanged { snapshot: &'a SessionSnapshot },
    /// The session ended and was cleared from the active slot.
    Finished { snapshot: &'a SessionSnapshot },
}

impl SessionEvent<'_> {
    /// The session state after the event.
    pub fn snapshot(&self) -> &SessionSnapshot {
        match self {
            Self::StateChanged { snapshot, .. }
            | Self::Progress { snapshot, .. }
            | Self::UsageChanged { snapshot }
            | Self::Finished { snapshot } => snapshot,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.snapshot().session_id
    }
}

// ── EventHandler trait ─────────────────────────────────────────────

pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &SessionEvent<'_>);
}

/// A no-op event handler.
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &SessionEvent<'_>) {}
}

/// Closure-based event handler.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event: &SessionEvent<'_>| {
///     if let SessionEvent::Finished { snapshot } = event {
///         println!("done after {} rounds", snapshot.analyses.len());
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&SessionEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&SessionEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&SessionEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent<'_>) {
        (self.0)(event);
    }
}

/// Dispatches each event to every handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(my_relay);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &SessionEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs session events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &SessionEvent<'_>) {
        match event {
            SessionEvent::StateChanged { from, to, snapshot } => {
                info!(
                    "[{}] {} -> {} (round {}/{})",
                    snapshot.session_id, from, to, snapshot.round, snapshot.max_rounds
                );
            }
            SessionEvent::Progress { .. } => {
                // Already logged by ProgressLog::push.
            }
            SessionEvent::UsageChanged { snapshot } => {
                debug!(
                    "[{}] backend calls: A={} B={}",
                    snapshot.session_id,
                    snapshot.usage.backend_a_calls,
                    snapshot.usage.backend_b_calls
                );
            }
            SessionEvent::Finished { snapshot } => {
                info!(
                    "[{}] session finished after {} round(s)",
                    snapshot.session_id,
                    snapshot.analyses.len()
                );
            }
        }
    }
}

// ── Subscribers ────────────────────────────────────────────────────

/// Handle returned by [`Subscribers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registry of event handlers.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Arc<dyn EventHandler>)>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every handler. The registry lock is released
    /// before handlers run, so a handler may subscribe or unsubscribe.
    pub fn notify(&self, event: &SessionEvent<'_>) {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler.on_event(event);
        }
    }
}
