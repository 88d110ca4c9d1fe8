//! [`EventHandler`] that relays session events to WebSocket clients.
//!
//! [`RelayHandler`] turns each [`SessionEvent`] into a [`RelayMessage`] and
//! broadcasts it over a `tokio::sync::broadcast` channel. Every message
//! carries the full session snapshot, so a client never has to merge
//! deltas.

use research_loop::events::{EventHandler, SessionEvent};
use research_loop::session::SessionSnapshot;
use serde::Serialize;
use tokio::sync::broadcast;

/// A message sent from the server to WebSocket clients.
///
/// Serialized as `{"type": "...", "payload": ...}`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayMessage {
    /// Current session, or `null` when idle. Sent on connect and after a
    /// client falls behind.
    Snapshot(Option<SessionSnapshot>),
    /// State transition, progress entry, or usage change.
    ProgressUpdate(SessionSnapshot),
    /// The session ended. The snapshot includes the final report.
    SessionFinished(SessionSnapshot),
    /// A command sent by this client was rejected.
    CommandError(String),
}

/// Event handler that broadcasts session events to WebSocket clients.
///
/// ```ignore
/// let (tx, _) = tokio::sync::broadcast::channel(256);
/// controller.subscribe(Arc::new(RelayHandler::new(tx.clone())));
/// ```
pub struct RelayHandler {
    sender: broadcast::Sender<RelayMessage>,
}

impl RelayHandler {
    pub fn new(sender: broadcast::Sender<RelayMessage>) -> Self {
        Self { sender }
    }
}

impl EventHandler for RelayHandler {
    fn on_event(&self, event: &SessionEvent<'_>) {
        let msg = match event {
            SessionEvent::Finished { snapshot } => {
                RelayMessage::SessionFinished((*snapshot).clone())
            }
            other => RelayMessage::ProgressUpdate(other.snapshot().clone()),
        };
        // No subscribers is fine.
        let _ = self.sender.send(msg);
    }
}
