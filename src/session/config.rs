use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::protocol::SessionStartPayload;

/// Options negotiated with the server when a session starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for SessionStopped before force-closing
    /// Default: 5000 ms
    pub shutdown_timeout_ms: u64,

    /// Speech recognition vendor (e.g., "paraformer")
    pub asr_vendor: String,

    /// Recognition language
    pub asr_language: String,

    /// Speech synthesis vendor (e.g., "cosyvoice")
    pub tts_vendor: String,

    /// Synthesis voice
    pub tts_voice: String,

    /// Let the assistant answer with tool calls
    pub enable_tool_call: bool,

    /// Extra dialog parameters passed through verbatim
    pub parameters: Map<String, Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 5000,
            asr_vendor: "paraformer".to_string(),
            asr_language: "zh-CN".to_string(),
            tts_vendor: "cosyvoice".to_string(),
            tts_voice: "longxiaochun".to_string(),
            enable_tool_call: false,
            parameters: Map::new(),
        }
    }
}

impl SessionConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Payload of the SessionStart directive
    pub fn start_payload(&self) -> SessionStartPayload {
        let mut upstream = Map::new();
        upstream.insert("asr_vendor".to_string(), json!(self.asr_vendor));
        upstream.insert(
            "asr_options".to_string(),
            json!({ "language": self.asr_language }),
        );

        let mut downstream = Map::new();
        downstream.insert("tts_vendor".to_string(), json!(self.tts_vendor));
        downstream.insert(
            "tts_options".to_string(),
            json!({ "voice": self.tts_voice }),
        );

        // Explicit extra parameters override the flag
        let mut parameters = Map::new();
        parameters.insert("enable_tool_call".to_string(), json!(self.enable_tool_call));
        parameters.extend(self.parameters.clone());

        SessionStartPayload {
            upstream,
            downstream,
            parameters,
        }
    }
}
