use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::machine::SessionState;

/// Snapshot of the voice session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current lifecycle state
    pub state: SessionState,

    /// Server-assigned session id, once SessionStarted arrived
    pub session_id: Option<String>,

    /// When the current session attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// Audio frames sent during the current session
    pub frames_sent: usize,

    /// Audio frames received from the server during the current session
    pub frames_received: usize,

    /// Finalized turns in the transcript
    pub turns_count: usize,

    /// Most recent surfaced error, if any
    pub last_error: Option<String>,
}

impl SessionStats {
    /// Seconds since the session attempt started
    pub fn duration_secs(&self) -> f64 {
        self.started_at
            .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}
