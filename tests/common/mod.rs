// In-memory voice server and microphone for engine tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use talkie::protocol::Directive;
use talkie::{
    AudioCapture, AudioFrame, CaptureChunk, CaptureError, CaptureFactory, CaptureSink, Inbound,
    InboundSink, Notification, SessionState, Transport, TransportConnector, TransportError,
};
use tokio::sync::broadcast;

#[derive(Default)]
struct ServerLog {
    directives: Vec<Directive>,
    frames: Vec<AudioFrame>,
    connects: usize,
    closes: usize,
    inbound: Option<InboundSink>,
}

/// Records everything the engine sends and lets tests push server messages
#[derive(Clone, Default)]
pub struct FakeServer {
    log: Arc<Mutex<ServerLog>>,
    refuse: bool,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A server that refuses every connection
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Deliver a message on the open connection; false if there is none
    pub fn push(&self, message: Inbound) -> bool {
        let log = self.log.lock().unwrap();
        match &log.inbound {
            Some(inbound) => inbound.send(message).is_ok(),
            None => false,
        }
    }

    pub fn push_event(&self, event: serde_json::Value) -> bool {
        self.push(Inbound::Text(event.to_string()))
    }

    pub fn directive_names(&self) -> Vec<&'static str> {
        let log = self.log.lock().unwrap();
        log.directives.iter().map(Directive::name).collect()
    }

    pub fn frames(&self) -> Vec<AudioFrame> {
        self.log.lock().unwrap().frames.clone()
    }

    pub fn connects(&self) -> usize {
        self.log.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }
}

#[async_trait]
impl TransportConnector for FakeServer {
    async fn connect(&self, inbound: InboundSink) -> Result<Box<dyn Transport>, TransportError> {
        if self.refuse {
            return Err(TransportError::Connect {
                url: "fake://server".to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let mut log = self.log.lock().unwrap();
        log.connects += 1;
        log.inbound = Some(inbound);

        Ok(Box::new(FakeTransport {
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeTransport {
    log: Arc<Mutex<ServerLog>>,
}

#[async_trait]
impl Transport for FakeTransport {
    fn send_directive(&mut self, directive: &Directive) -> Result<(), TransportError> {
        self.log.lock().unwrap().directives.push(directive.clone());
        Ok(())
    }

    fn send_audio(&mut self, frame: &AudioFrame) -> Result<(), TransportError> {
        self.log.lock().unwrap().frames.push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap();
        log.closes += 1;
        log.inbound = None;
        Ok(())
    }
}

#[derive(Default)]
struct MicState {
    sink: Option<CaptureSink>,
    capturing: bool,
    starts: usize,
}

/// Capture source that delivers scripted chunks as soon as it starts
#[derive(Clone, Default)]
pub struct FakeMicrophone {
    deny: bool,
    chunks: Vec<CaptureChunk>,
    state: Arc<Mutex<MicState>>,
}

impl FakeMicrophone {
    pub fn new(chunks: Vec<CaptureChunk>) -> Self {
        Self {
            chunks,
            ..Self::default()
        }
    }

    /// A microphone the user refuses access to
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().unwrap().capturing
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    /// Deliver more audio while capturing; false when stopped
    pub fn push(&self, samples: Vec<i16>, sample_rate: u32) -> bool {
        let state = self.state.lock().unwrap();
        match &state.sink {
            Some(sink) => sink
                .send(CaptureChunk {
                    samples,
                    sample_rate,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl CaptureFactory for FakeMicrophone {
    fn open(&self) -> Result<Box<dyn AudioCapture>, CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied("denied by user".to_string()));
        }

        Ok(Box::new(FakeCapture {
            chunks: self.chunks.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeCapture {
    chunks: Vec<CaptureChunk>,
    state: Arc<Mutex<MicState>>,
}

#[async_trait]
impl AudioCapture for FakeCapture {
    async fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError> {
        for chunk in &self.chunks {
            let _ = sink.send(chunk.clone());
        }

        let mut state = self.state.lock().unwrap();
        state.sink = Some(sink);
        state.capturing = true;
        state.starts += 1;
        Ok(())
    }

    async fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.sink = None;
        state.capturing = false;
    }

    fn is_capturing(&self) -> bool {
        self.state.lock().unwrap().capturing
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

/// Wait for the first notification matching `pred`
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<Notification>, pred: F) -> Notification
where
    F: Fn(&Notification) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Ok(notification) if pred(&notification) => return notification,
                Ok(_) => continue,
                Err(e) => panic!("notification channel failed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for notification")
}

/// Wait until the session enters `state`
pub async fn wait_for_state(rx: &mut broadcast::Receiver<Notification>, state: SessionState) {
    wait_for(rx, |n| matches!(n, Notification::StateChanged { to, .. } if *to == state)).await;
}

pub fn session_started(session_id: &str) -> serde_json::Value {
    serde_json::json!({"event": "SessionStarted", "payload": {"session_id": session_id}})
}

pub fn session_stopped(session_id: &str) -> serde_json::Value {
    serde_json::json!({"event": "SessionStopped", "payload": {"session_id": session_id}})
}
