//! Voice session lifecycle
//!
//! This module provides:
//! - `SessionStateMachine`: pure transition logic over `SessionState`
//! - `SessionConfig`: options sent with SessionStart and the shutdown deadline
//! - `SessionStats`: status snapshot exposed by the engine

mod config;
mod machine;
mod stats;

pub use config::SessionConfig;
pub use machine::{
    Effect, SessionEvent, SessionState, SessionStateMachine, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use stats::SessionStats;
