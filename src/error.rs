//! Error taxonomy for the engine core
//!
//! Each error kind maps to one recovery path in the session lifecycle:
//! - `CaptureError::PermissionDenied` aborts a start and returns to idle
//! - `TransportError` moves the session to the error state
//! - `ProtocolError` drops a single inbound message
//! - `EngineError::Timeout` is reported when the stop handshake was forced

use thiserror::Error;

use crate::session::SessionState;

/// Failures opening or running an audio capture source
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio capture unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the duplex channel
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("failed to send: {0}")]
    Send(String),

    #[error("connection error: {0}")]
    Io(String),

    #[error("connection closed")]
    Closed,
}

/// A single inbound message that could not be understood
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

/// Errors surfaced to engine callers
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no SessionStopped within {0} ms, connection closed")]
    Timeout(u64),

    #[error("not allowed while {0}")]
    InvalidState(SessionState),

    #[error("engine has shut down")]
    EngineClosed,
}
