//! HTTP API server for push-to-talk control
//!
//! This module provides a small local REST API:
//! - POST /session/start - Start streaming the microphone
//! - POST /session/stop - Stop streaming and close the session
//! - GET /session/status - Query session status
//! - GET /transcript - Get finalized turns
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
