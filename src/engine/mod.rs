//! Voice session engine
//!
//! One tokio task owns all mutable session state (`SessionContext`): the
//! state machine, the framer, the aggregator, the transport and the capture
//! source. Everything that wants to touch that state posts into the engine's
//! queue instead:
//! - user commands from `EngineHandle`
//! - captured audio chunks
//! - inbound transport messages
//! - the shutdown timer
//!
//! Observers follow the session through `Notification`s.

mod context;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use crate::audio::{AudioFrame, CaptureFactory, ClosingSilence, FramerConfig};
use crate::conversation::{AccumulatedToolCall, ChatTurn, Speaker};
use crate::error::EngineError;
use crate::session::{SessionConfig, SessionState, SessionStats};
use crate::transport::TransportConnector;

use context::SessionContext;

const NOTIFICATION_CAPACITY: usize = 256;

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Frame size and target sample rate of outbound audio
    pub framer: FramerConfig,
    /// End-of-speech silence policy when capture stops
    pub closing_silence: ClosingSilence,
    /// SessionStart options and shutdown deadline
    pub session: SessionConfig,
    /// Directory for response recordings; disabled when None
    pub recordings_dir: Option<PathBuf>,
}

/// Something observers may want to know about
#[derive(Debug, Clone)]
pub enum Notification {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Text accumulated so far for an open turn
    Partial { speaker: Speaker, text: String },
    /// Merged tool-call view of the open assistant turn
    ToolCalls(Vec<AccumulatedToolCall>),
    /// A finalized turn was appended to the transcript
    Turn(ChatTurn),
    ResponseAudioStarted,
    ResponseAudioEnded,
    /// Audio received from the server
    ResponseAudio(AudioFrame),
    /// Surfaced error (permission, transport, timeout)
    Error(String),
}

/// Everything the engine task reacts to, apart from transport and capture data
pub(crate) enum EngineEvent {
    Start(oneshot::Sender<Result<SessionState, EngineError>>),
    Stop(oneshot::Sender<Result<SessionState, EngineError>>),
    Status(oneshot::Sender<SessionStats>),
    Transcript(oneshot::Sender<Vec<ChatTurn>>),
    Shutdown(oneshot::Sender<()>),
    ShutdownTimeout { generation: u64 },
}

pub struct Engine;

impl Engine {
    /// Spawn the engine task on the current tokio runtime
    pub fn spawn(
        config: EngineConfig,
        connector: Arc<dyn TransportConnector>,
        capture: Arc<dyn CaptureFactory>,
    ) -> EngineHandle {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let context = SessionContext::new(
            config,
            connector,
            capture,
            events.downgrade(),
            notifications.clone(),
        );

        info!("Starting voice engine");
        tokio::spawn(context.run(events_rx));

        EngineHandle {
            events,
            notifications,
        }
    }
}

/// Cloneable control handle
///
/// The engine task stops once `shutdown` is called or every handle is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::UnboundedSender<EngineEvent>,
    notifications: broadcast::Sender<Notification>,
}

impl EngineHandle {
    /// Push-to-talk pressed
    ///
    /// Resolves once the start sequence has run as far as it can without the
    /// server: returns `Connecting` while waiting for SessionStarted, or the
    /// error that aborted the attempt.
    pub async fn start(&self) -> Result<SessionState, EngineError> {
        self.request(EngineEvent::Start).await?
    }

    /// Push-to-talk released
    pub async fn stop(&self) -> Result<SessionState, EngineError> {
        self.request(EngineEvent::Stop).await?
    }

    pub async fn status(&self) -> Result<SessionStats, EngineError> {
        self.request(EngineEvent::Status).await
    }

    /// Finalized turns, oldest first
    pub async fn transcript(&self) -> Result<Vec<ChatTurn>, EngineError> {
        self.request(EngineEvent::Transcript).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Close any open session and stop the engine task
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(EngineEvent::Shutdown).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineEvent,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(make(reply))
            .map_err(|_| EngineError::EngineClosed)?;

        response.await.map_err(|_| EngineError::EngineClosed)
    }
}
