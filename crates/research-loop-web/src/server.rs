//! Axum server setup and router construction.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use research_loop::controller::SessionController;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::api::{self, AppState};
use crate::broadcast::RelayMessage;
use crate::ws::{self, WsState};

/// Build the full axum router.
///
/// The router serves:
/// - WebSocket at `/ws`
/// - REST API at `/api/*`
pub fn build_router(
    controller: SessionController,
    broadcast_tx: broadcast::Sender<RelayMessage>,
) -> Router {
    let app_state = AppState {
        controller: controller.clone(),
    };
    let ws_state = WsState {
        controller,
        broadcast_tx,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .with_state(ws_state);

    let api_routes = Router::new()
        .route("/api/session", get(api::get_session).post(api::post_session))
        .route("/api/stop", post(api::post_stop))
        .route("/api/cancel", post(api::post_cancel))
        .route("/api/confirm", post(api::post_confirm))
        .route("/api/report", get(api::get_report))
        .with_state(app_state);

    Router::new().merge(ws_routes).merge(api_routes).layer(cors)
}

/// Bind `bind_addr`, serve `router` on a background task, and return the
/// bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> Result<SocketAddr, String> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("failed to bind {bind_addr}: {e}"))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("failed to read bound address: {e}"))?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("web server stopped: {e}");
        }
    });

    Ok(addr)
}
