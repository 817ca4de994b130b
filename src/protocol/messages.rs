use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conversation::ToolCallDelta;
use crate::error::ProtocolError;

/// Control message sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", content = "payload")]
pub enum Directive {
    SessionStart(SessionStartPayload),
    SessionStop(EmptyPayload),
}

impl Directive {
    pub fn stop() -> Self {
        Directive::SessionStop(EmptyPayload {})
    }

    pub fn name(&self) -> &'static str {
        match self {
            Directive::SessionStart(_) => "SessionStart",
            Directive::SessionStop(_) => "SessionStop",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStartPayload {
    /// Speech recognition options (vendor, language)
    pub upstream: Map<String, Value>,
    /// Speech synthesis options (vendor, voice)
    pub downstream: Map<String, Value>,
    /// Dialog parameters (tool calling, knowledge bases, ...)
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// Event received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    SessionStarted(SessionPayload),
    SessionStopped(SessionPayload),
    AudioTranscript(AudioTranscriptPayload),
    ResponseText(ResponseTextPayload),
    ResponseAudioStarted(SessionPayload),
    ResponseAudioEnded(SessionPayload),
}

const KNOWN_EVENTS: &[&str] = &[
    "SessionStarted",
    "SessionStopped",
    "AudioTranscript",
    "ResponseText",
    "ResponseAudioStarted",
    "ResponseAudioEnded",
];

#[derive(Deserialize)]
struct Envelope {
    event: String,
}

impl ServerEvent {
    /// Parse one JSON text message
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if !KNOWN_EVENTS.contains(&envelope.event.as_str()) {
            return Err(ProtocolError::UnknownEvent(envelope.event));
        }

        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SessionStarted(_) => "SessionStarted",
            ServerEvent::SessionStopped(_) => "SessionStopped",
            ServerEvent::AudioTranscript(_) => "AudioTranscript",
            ServerEvent::ResponseText(_) => "ResponseText",
            ServerEvent::ResponseAudioStarted(_) => "ResponseAudioStarted",
            ServerEvent::ResponseAudioEnded(_) => "ResponseAudioEnded",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    #[serde(default)]
    pub session_id: String,
}

/// Recognized user speech (partial while `finished` is false)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTranscriptPayload {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub text: String,
    pub finished: bool,
}

/// Assistant response text and tool calls (partial while `finished` is false)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTextPayload {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finished: bool,
}

impl ResponseTextPayload {
    /// Tool calls of this frame as deltas (empty when absent)
    pub fn deltas(&self) -> Vec<ToolCallDelta> {
        self.tool_calls
            .iter()
            .flatten()
            .map(ToolCall::to_delta)
            .collect()
    }
}

/// One tool-call fragment as carried on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: FunctionCall,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ToolCall {
    pub fn to_delta(&self) -> ToolCallDelta {
        ToolCallDelta {
            index: self.index,
            id_fragment: self.id.clone().unwrap_or_default(),
            name_fragment: self.function.name.clone(),
            arguments_fragment: self.function.arguments.clone().unwrap_or_default(),
            kind: self.kind.clone(),
        }
    }
}
