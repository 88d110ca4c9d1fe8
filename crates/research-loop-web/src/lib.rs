//! HTTP control surface and live progress relay for `research-loop`.
//!
//! `research-loop-web` wraps a [`SessionController`] in an axum server: a
//! REST API for the control operations and a WebSocket endpoint that pushes
//! a `{"type": "PROGRESS_UPDATE", "payload": <snapshot>}` message on every
//! session event.
//!
//! # Quick start
//!
//! ```ignore
//! use research_loop_web::{WebConfig, spawn_web};
//!
//! let addr = spawn_web(controller.clone(), WebConfig::default()).await?;
//! println!("Control API: http://{addr}/api/session");
//! ```
//!
//! # Architecture
//!
//! ```text
//! SessionController ──SessionEvent──▶ RelayHandler ──RelayMessage──▶ WebSocket clients
//!        ▲                                                                 │
//!        └──── /api/session, /api/stop, /api/cancel, /api/confirm ◀────────┘
//! ```
//!
//! | Route | Method | Result |
//! |-------|--------|--------|
//! | `/api/session` | `POST` | 201 snapshot, 409 if a session is active |
//! | `/api/session` | `GET` | snapshot, 404 when idle |
//! | `/api/stop` | `POST` | 204 |
//! | `/api/cancel` | `POST` | `{"report": "..."}` |
//! | `/api/confirm` | `POST` | 204, 409 unless awaiting confirmation |
//! | `/api/report` | `GET` | markdown report |
//! | `/ws` | `GET` | WebSocket relay |

mod api;
pub mod broadcast;
mod server;
mod ws;

pub use api::{CancelResponse, StartRequest};
pub use broadcast::{RelayHandler, RelayMessage};

use std::net::SocketAddr;
use std::sync::Arc;

use research_loop::controller::SessionController;

/// Configuration for the web server.
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// Broadcast channel capacity. Default: 256.
    ///
    /// Clients that fall behind by this many messages receive a fresh
    /// snapshot to resynchronize.
    pub broadcast_capacity: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            broadcast_capacity: 256,
        }
    }
}

/// Subscribe a [`RelayHandler`] to `controller` and spawn the web server on
/// a Tokio task.
///
/// Returns the bound address. The server runs until the Tokio runtime shuts
/// down.
pub async fn spawn_web(controller: SessionController, config: WebConfig) -> Result<SocketAddr, String> {
    let (broadcast_tx, _) = tokio::sync::broadcast::channel(config.broadcast_capacity.max(1));
    controller.subscribe(Arc::new(RelayHandler::new(broadcast_tx.clone())));
    let router = server::build_router(controller, broadcast_tx);
    server::start_server(router, config.bind_addr).await
}
