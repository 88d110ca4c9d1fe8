//! REST API endpoint handlers.
//!
//! Every mutating call goes through the [`SessionController`]; policy
//! violations come back synchronously as HTTP errors with a JSON body
//! `{"error": "..."}`.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use research_loop::controller::{ControllerError, SessionController, StartOptions};
use research_loop::session::SessionSnapshot;
use serde::{Deserialize, Serialize};

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
}

// ── Errors ──────────────────────────────────────────────────────────

/// [`ControllerError`] mapped onto an HTTP status.
pub struct ApiError(pub ControllerError);

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            ControllerError::SessionAlreadyActive { .. } | ControllerError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            ControllerError::NoActiveSession => StatusCode::NOT_FOUND,
            ControllerError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            ControllerError::Surface(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Request body for POST /api/session.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub topic: String,
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub auto_mode: Option<bool>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl StartRequest {
    pub fn options(&self) -> StartOptions {
        let defaults = StartOptions::default();
        StartOptions {
            max_rounds: self.max_rounds.unwrap_or(defaults.max_rounds),
            auto_mode: self.auto_mode.unwrap_or(defaults.auto_mode),
        }
    }
}

/// POST /api/session: Start a session.
///
/// Returns 201 with the new snapshot, 409 if a session is already active.
pub async fn post_session(
    State(app): State<AppState>,
    Json(body): Json<StartRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let snapshot = app
        .controller
        .start(&body.topic, body.options(), body.session_id.clone())
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/session: Snapshot of the active session, 404 when idle.
pub async fn get_session(State(app): State<AppState>) -> Result<Json<SessionSnapshot>, ApiError> {
    app.controller
        .get_session()
        .map(Json)
        .ok_or(ApiError(ControllerError::NoActiveSession))
}

// ── Control ─────────────────────────────────────────────────────────

/// POST /api/stop: Ask the host for its final summary.
pub async fn post_stop(State(app): State<AppState>) -> Result<StatusCode, ApiError> {
    app.controller.stop().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Response body for POST /api/cancel.
#[derive(Serialize, Deserialize, Debug)]
pub struct CancelResponse {
    pub report: String,
}

/// POST /api/cancel: End the session now and return its report.
pub async fn post_cancel(State(app): State<AppState>) -> Result<Json<CancelResponse>, ApiError> {
    let report = app.controller.cancel().await?;
    Ok(Json(CancelResponse { report }))
}

/// POST /api/confirm: Submit the follow-up waiting for review.
pub async fn post_confirm(State(app): State<AppState>) -> Result<StatusCode, ApiError> {
    app.controller.confirm_and_proceed().await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Report ──────────────────────────────────────────────────────────

/// GET /api/report: Markdown report for the active or last session.
///
/// Returns 404 if no session has run yet.
pub async fn get_report(State(app): State<AppState>) -> Response {
    let report = app.controller.generate_report();
    if report.is_empty() {
        return ApiError(ControllerError::NoActiveSession).into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        report,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_loop::session::SessionState;

    #[test]
    fn start_request_defaults() {
        let req: StartRequest = serde_json::from_str(r#"{"topic":"t"}"#).unwrap();
        let opts = req.options();
        assert_eq!(opts.max_rounds, 5);
        assert!(opts.auto_mode);
        assert!(req.session_id.is_none());
    }

    #[test]
    fn start_request_camel_case() {
        let req: StartRequest = serde_json::from_str(
            r#"{"topic":"t","maxRounds":2,"autoMode":false,"sessionId":"ext-1"}"#,
        )
        .unwrap();
        let opts = req.options();
        assert_eq!(opts.max_rounds, 2);
        assert!(!opts.auto_mode);
        assert_eq!(req.session_id.as_deref(), Some("ext-1"));
    }

    #[test]
    fn errors_map_to_status() {
        let cases = [
            (
                ControllerError::SessionAlreadyActive {
                    session_id: "a".into(),
                    topic: "b".into(),
                },
                StatusCode::CONFLICT,
            ),
            (ControllerError::NoActiveSession, StatusCode::NOT_FOUND),
            (
                ControllerError::InvalidState {
                    expected: SessionState::WaitingConfirm,
                    actual: SessionState::Analyzing,
                },
                StatusCode::CONFLICT,
            ),
            (ControllerError::InvalidConfig("x".into()), StatusCode::BAD_REQUEST),
            (ControllerError::Surface("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
