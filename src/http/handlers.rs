use super::state::AppState;
use crate::error::{CaptureError, EngineError};
use crate::session::SessionState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::InvalidState(_) => StatusCode::CONFLICT,
        EngineError::Capture(CaptureError::PermissionDenied(_)) => StatusCode::FORBIDDEN,
        EngineError::Capture(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::Transport(_) => StatusCode::BAD_GATEWAY,
        EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        EngineError::EngineClosed => StatusCode::SERVICE_UNAVAILABLE,
    };

    if status.is_server_error() {
        error!("Request failed: {}", err);
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Push-to-talk pressed: open a session and start streaming the microphone
pub async fn start_session(State(state): State<AppState>) -> Response {
    info!("Start requested");

    match state.engine.start().await {
        Ok(session_state) => (
            StatusCode::ACCEPTED,
            Json(SessionResponse {
                state: session_state,
                message: "Session starting".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/stop
/// Push-to-talk released: flush audio and close the session
pub async fn stop_session(State(state): State<AppState>) -> Response {
    info!("Stop requested");

    match state.engine.stop().await {
        Ok(session_state) => (
            StatusCode::ACCEPTED,
            Json(SessionResponse {
                state: session_state,
                message: "Session stopping".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /session/status
pub async fn get_session_status(State(state): State<AppState>) -> Response {
    match state.engine.status().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /transcript
/// Finalized turns of the current conversation
pub async fn get_transcript(State(state): State<AppState>) -> Response {
    match state.engine.transcript().await {
        Ok(turns) => (StatusCode::OK, Json(turns)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
