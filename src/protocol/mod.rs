pub mod messages;

pub use messages::{
    AudioTranscriptPayload, Directive, EmptyPayload, FunctionCall, ResponseTextPayload,
    ServerEvent, SessionPayload, SessionStartPayload, ToolCall,
};
