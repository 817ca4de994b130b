pub mod audio;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{
    AudioCapture, AudioFrame, AudioFramer, CaptureChunk, CaptureFactory, CaptureSink,
    CaptureSource, ClosingSilence, FrameBuffer, FramerConfig, ResponseRecorder,
};
pub use config::Config;
pub use conversation::{
    AccumulatedToolCall, ChatTurn, DeltaAccumulator, Speaker, StreamAggregator, ToolCallDelta,
};
pub use engine::{Engine, EngineConfig, EngineHandle, Notification};
pub use error::{CaptureError, EngineError, ProtocolError, TransportError};
pub use http::{create_router, AppState};
pub use protocol::{Directive, ServerEvent};
pub use session::{
    SessionConfig, SessionEvent, SessionState, SessionStateMachine, SessionStats,
};
pub use transport::{Inbound, InboundSink, Transport, TransportConnector, WebSocketConnector};
