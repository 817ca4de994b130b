use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{EngineConfig, EngineEvent, Notification};
use crate::audio::{
    AudioCapture, AudioFrame, AudioFramer, CaptureChunk, CaptureFactory, RecorderConfig,
    ResponseRecorder,
};
use crate::conversation::{ChatTurn, Speaker, StreamAggregator, ToolCallDelta};
use crate::error::{CaptureError, EngineError, TransportError};
use crate::protocol::{Directive, ServerEvent};
use crate::session::{Effect, SessionEvent, SessionState, SessionStateMachine, SessionStats};
use crate::transport::{Inbound, Transport, TransportConnector};

/// All mutable state of one engine, owned by the engine task
pub(crate) struct SessionContext {
    config: EngineConfig,
    machine: SessionStateMachine,
    framer: AudioFramer,
    aggregator: StreamAggregator,
    stats: SessionStats,

    connector: Arc<dyn TransportConnector>,
    capture_factory: Arc<dyn CaptureFactory>,

    transport: Option<Box<dyn Transport>>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Inbound>>,
    capture: Option<Box<dyn AudioCapture>>,
    capture_rx: Option<mpsc::UnboundedReceiver<CaptureChunk>>,
    recorder: Option<ResponseRecorder>,
    shutdown_timer: Option<JoinHandle<()>>,

    /// Weak so that dropping every handle still ends the engine
    events: mpsc::WeakUnboundedSender<EngineEvent>,
    notifications: broadcast::Sender<Notification>,

    /// Error that aborted the command being processed
    failure: Option<EngineError>,
}

impl SessionContext {
    pub(crate) fn new(
        config: EngineConfig,
        connector: Arc<dyn TransportConnector>,
        capture_factory: Arc<dyn CaptureFactory>,
        events: mpsc::WeakUnboundedSender<EngineEvent>,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Self {
            machine: SessionStateMachine::new(config.session.shutdown_timeout()),
            framer: AudioFramer::new(config.framer.clone()),
            aggregator: StreamAggregator::new(),
            stats: SessionStats::default(),
            config,
            connector,
            capture_factory,
            transport: None,
            inbound_rx: None,
            capture: None,
            capture_rx: None,
            recorder: None,
            shutdown_timer: None,
            events,
            notifications,
            failure: None,
        }
    }

    /// Engine loop: one event at a time until shutdown
    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(EngineEvent::Shutdown(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(event) => self.handle_event(event).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },

                message = recv_or_pending(&mut self.inbound_rx) => match message {
                    Some(message) => self.handle_inbound(message).await,
                    None => self.inbound_rx = None,
                },

                chunk = recv_or_pending(&mut self.capture_rx) => match chunk {
                    Some(chunk) => self.handle_capture(chunk).await,
                    None => {
                        debug!("Capture source finished");
                        self.capture_rx = None;
                    }
                },
            }
        }

        info!("Voice engine stopped");
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Start(reply) => {
                let result = if self.machine.can_start() {
                    self.failure = None;
                    self.dispatch(SessionEvent::UserStart).await;
                    match self.failure.take() {
                        Some(error) => Err(error),
                        None => Ok(self.machine.state()),
                    }
                } else {
                    Err(EngineError::InvalidState(self.machine.state()))
                };
                let _ = reply.send(result);
            }

            EngineEvent::Stop(reply) => {
                let result = if self.machine.can_stop() {
                    self.failure = None;
                    self.dispatch(SessionEvent::UserStop).await;
                    match self.failure.take() {
                        Some(error) => Err(error),
                        None => Ok(self.machine.state()),
                    }
                } else {
                    Err(EngineError::InvalidState(self.machine.state()))
                };
                let _ = reply.send(result);
            }

            EngineEvent::Status(reply) => {
                let _ = reply.send(self.snapshot());
            }

            EngineEvent::Transcript(reply) => {
                let _ = reply.send(self.aggregator.transcript().to_vec());
            }

            EngineEvent::ShutdownTimeout { generation } => {
                self.dispatch(SessionEvent::ShutdownTimeout { generation })
                    .await;
            }

            // Handled by the loop
            EngineEvent::Shutdown(_) => {}
        }
    }

    /// Feed an event to the state machine and run the resulting effects
    ///
    /// An effect that fails produces a follow-up event; the rest of its batch
    /// is skipped and the follow-up is dispatched next.
    async fn dispatch(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let from = self.machine.state();
            let Some(effects) = self.machine.handle(event) else {
                continue;
            };
            let to = self.machine.state();

            if from != to {
                info!("Session state: {} -> {}", from, to);
                self.notify(Notification::StateChanged { from, to });
            }

            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                    break;
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::ResetConversation => {
                self.aggregator.clear();
                self.framer.reset();
                self.recorder = None;
                self.stats = SessionStats {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                };
                None
            }

            Effect::RequestMicrophone => match self.capture_factory.open() {
                Ok(capture) => {
                    debug!("Capture source ready: {}", capture.name());
                    self.capture = Some(capture);
                    Some(SessionEvent::MicrophoneGranted)
                }
                Err(e) => {
                    self.fail(EngineError::Capture(e));
                    Some(SessionEvent::MicrophoneDenied)
                }
            },

            Effect::OpenTransport => {
                let (inbound, inbound_rx) = mpsc::unbounded_channel();
                let connector = Arc::clone(&self.connector);

                match connector.connect(inbound).await {
                    Ok(transport) => {
                        self.transport = Some(transport);
                        self.inbound_rx = Some(inbound_rx);
                        None
                    }
                    Err(e) => Some(self.transport_failed(e)),
                }
            }

            Effect::SendSessionStart => {
                let directive = Directive::SessionStart(self.config.session.start_payload());
                self.send_directive(&directive)
            }

            Effect::StartCapture => {
                self.framer.reset();
                let (sink, capture_rx) = mpsc::unbounded_channel();

                let Some(capture) = self.capture.as_mut() else {
                    return Some(self.capture_failed(CaptureError::Unavailable(
                        "no capture source open".to_string(),
                    )));
                };

                match capture.start(sink).await {
                    Ok(()) => {
                        info!("Capturing audio from {}", capture.name());
                        self.capture_rx = Some(capture_rx);
                        None
                    }
                    Err(e) => Some(self.capture_failed(e)),
                }
            }

            Effect::StopCapture { flush } => {
                if let Some(capture) = self.capture.as_mut() {
                    capture.stop().await;
                }
                let capture_rx = self.capture_rx.take();

                if !flush {
                    return None;
                }

                // Chunks captured before stop still belong to the utterance
                let mut frames = Vec::new();
                if let Some(mut capture_rx) = capture_rx {
                    while let Ok(chunk) = capture_rx.try_recv() {
                        frames.extend(self.framer.ingest(&chunk.samples, chunk.sample_rate));
                    }
                }
                frames.extend(self.framer.finish(self.config.closing_silence));

                debug!(
                    "Flushing {} final frames ({} sent this session)",
                    frames.len(),
                    self.stats.frames_sent
                );
                self.send_frames(frames)
            }

            Effect::SendSessionStop => self.send_directive(&Directive::stop()),

            Effect::ArmShutdownTimer { generation, after } => {
                self.cancel_timer();

                let events = self.events.clone();
                self.shutdown_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    if let Some(events) = events.upgrade() {
                        let _ = events.send(EngineEvent::ShutdownTimeout { generation });
                    }
                }));
                debug!("Shutdown timer {} armed for {:?}", generation, after);
                None
            }

            Effect::CancelShutdownTimer => {
                self.cancel_timer();
                None
            }

            Effect::CloseTransport => {
                self.inbound_rx = None;
                if let Some(mut transport) = self.transport.take() {
                    if let Err(e) = transport.close().await {
                        warn!("Failed to close transport cleanly: {}", e);
                    }
                }
                None
            }

            Effect::ClearTransient => {
                self.aggregator.reset();
                self.framer.reset();
                self.capture_rx = None;
                if let Some(mut capture) = self.capture.take() {
                    if capture.is_capturing() {
                        capture.stop().await;
                    }
                }
                self.end_recording_round();
                None
            }

            Effect::ReportTimeout => {
                let timeout_ms = self.machine.shutdown_timeout().as_millis() as u64;
                self.fail(EngineError::Timeout(timeout_ms));
                None
            }
        }
    }

    async fn handle_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Text(text) => {
                if let Some(event) = self.handle_server_event(&text) {
                    self.dispatch(event).await;
                }
            }

            Inbound::Binary(bytes) => self.handle_response_audio(&bytes),

            Inbound::Closed => {
                info!("Voice server closed the connection");
                self.inbound_rx = None;
                self.dispatch(SessionEvent::TransportClosed).await;
            }

            Inbound::Error(reason) => {
                self.inbound_rx = None;
                let event = self.transport_failed(TransportError::Io(reason));
                self.dispatch(event).await;
            }
        }
    }

    /// Apply one JSON event; lifecycle events are returned for dispatch
    fn handle_server_event(&mut self, text: &str) -> Option<SessionEvent> {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping inbound message: {}", e);
                return None;
            }
        };

        debug!("Received {}", event.name());

        match event {
            ServerEvent::SessionStarted(payload) => {
                info!("Session started: {}", payload.session_id);
                if !payload.session_id.is_empty() {
                    self.stats.session_id = Some(payload.session_id);
                }
                Some(SessionEvent::SessionStarted)
            }

            ServerEvent::SessionStopped(payload) => {
                info!("Session stopped: {}", payload.session_id);
                Some(SessionEvent::SessionStopped)
            }

            ServerEvent::AudioTranscript(payload) => {
                self.aggregate(Speaker::User, &payload.text, &[], payload.finished);
                None
            }

            ServerEvent::ResponseText(payload) => {
                let deltas = payload.deltas();
                let text = payload.text.as_deref().unwrap_or_default();
                self.aggregate(Speaker::Assistant, text, &deltas, payload.finished);
                None
            }

            ServerEvent::ResponseAudioStarted(_) => {
                self.begin_recording_round();
                self.notify(Notification::ResponseAudioStarted);
                None
            }

            ServerEvent::ResponseAudioEnded(_) => {
                self.end_recording_round();
                self.notify(Notification::ResponseAudioEnded);
                None
            }
        }
    }

    fn aggregate(&mut self, speaker: Speaker, text: &str, deltas: &[ToolCallDelta], finished: bool) {
        if finished {
            if let Some(turn) = self.aggregator.on_final(speaker, text, deltas) {
                self.log_turn(&turn);
                self.notify(Notification::Turn(turn));
            }
            return;
        }

        let view = self.aggregator.on_partial(speaker, text, deltas);

        if !text.is_empty() {
            let text = self
                .aggregator
                .pending_text(speaker)
                .unwrap_or_default()
                .to_string();
            self.notify(Notification::Partial { speaker, text });
        }
        if let Some(view) = view {
            self.notify(Notification::ToolCalls(view));
        }
    }

    fn log_turn(&self, turn: &ChatTurn) {
        if turn.tool_calls.is_empty() {
            info!("{:?}: {}", turn.speaker, turn.content);
        } else {
            info!(
                "{:?}: {} ({} tool calls)",
                turn.speaker,
                turn.content,
                turn.tool_calls.len()
            );
        }
    }

    async fn handle_capture(&mut self, chunk: CaptureChunk) {
        if self.machine.state() != SessionState::Connected {
            debug!("Dropping {} captured samples", chunk.samples.len());
            return;
        }

        let frames = self.framer.ingest(&chunk.samples, chunk.sample_rate);
        if let Some(event) = self.send_frames(frames) {
            self.dispatch(event).await;
        }
    }

    fn handle_response_audio(&mut self, bytes: &[u8]) {
        let frame = AudioFrame::from_pcm_bytes(bytes, self.framer.sample_rate());
        self.stats.frames_received += 1;

        if let Some(recorder) = &mut self.recorder {
            if let Err(e) = recorder.write(&frame.samples) {
                warn!("Failed to record response audio: {}", e);
            }
        }

        self.notify(Notification::ResponseAudio(frame));
    }

    fn begin_recording_round(&mut self) {
        let Some(output_dir) = self.config.recordings_dir.clone() else {
            return;
        };

        if self.recorder.is_none() {
            let prefix = self
                .stats
                .session_id
                .clone()
                .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4()));

            let config = RecorderConfig {
                output_dir,
                prefix,
                sample_rate: self.framer.sample_rate(),
            };
            match ResponseRecorder::new(config) {
                Ok(recorder) => self.recorder = Some(recorder),
                Err(e) => {
                    warn!("Response recording disabled: {:#}", e);
                    return;
                }
            }
        }

        if let Some(recorder) = &mut self.recorder {
            if let Err(e) = recorder.begin_round() {
                warn!("Failed to start response recording: {:#}", e);
            }
        }
    }

    fn end_recording_round(&mut self) {
        if let Some(recorder) = &mut self.recorder {
            if let Err(e) = recorder.end_round() {
                warn!("Failed to finish response recording: {:#}", e);
            }
        }
    }

    /// Queue frames on the transport without waiting for delivery
    fn send_frames(&mut self, frames: Vec<AudioFrame>) -> Option<SessionEvent> {
        let Some(transport) = self.transport.as_mut() else {
            if !frames.is_empty() {
                debug!("No transport, dropping {} frames", frames.len());
            }
            return None;
        };

        for frame in &frames {
            if let Err(e) = transport.send_audio(frame) {
                return Some(self.transport_failed(e));
            }
            self.stats.frames_sent += 1;
        }

        None
    }

    fn send_directive(&mut self, directive: &Directive) -> Option<SessionEvent> {
        let result = match self.transport.as_mut() {
            Some(transport) => transport.send_directive(directive),
            None => Err(TransportError::Closed),
        };

        match result {
            Ok(()) => {
                info!("Sent {}", directive.name());
                None
            }
            Err(e) => Some(self.transport_failed(e)),
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.shutdown_timer.take() {
            timer.abort();
        }
    }

    fn transport_failed(&mut self, error: TransportError) -> SessionEvent {
        self.fail(EngineError::Transport(error));
        SessionEvent::TransportError
    }

    fn capture_failed(&mut self, error: CaptureError) -> SessionEvent {
        self.fail(EngineError::Capture(error));
        SessionEvent::CaptureFailed
    }

    /// Record and surface an error
    fn fail(&mut self, error: EngineError) {
        match &error {
            EngineError::Timeout(_) => warn!("{}", error),
            _ => error!("{}", error),
        }

        let message = error.to_string();
        self.stats.last_error = Some(message.clone());
        self.failure = Some(error);
        self.notify(Notification::Error(message));
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            state: self.machine.state(),
            turns_count: self.aggregator.transcript().len(),
            ..self.stats.clone()
        }
    }

    async fn shutdown(&mut self) {
        if self.machine.state().is_active() {
            info!("Closing session on shutdown");
        }

        self.cancel_timer();
        self.execute(Effect::StopCapture { flush: false }).await;
        self.execute(Effect::CloseTransport).await;
        self.execute(Effect::ClearTransient).await;
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
