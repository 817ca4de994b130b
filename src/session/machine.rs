use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default grace period for the server to acknowledge SessionStop
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lifecycle state of the voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

impl SessionState {
    /// A transport may be open in this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Disconnecting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Push-to-talk pressed
    UserStart,
    /// Push-to-talk released
    UserStop,
    MicrophoneGranted,
    MicrophoneDenied,
    /// Server acknowledged SessionStart
    SessionStarted,
    /// Server acknowledged SessionStop (or ended the session itself)
    SessionStopped,
    /// The shutdown timer armed with this generation fired
    ShutdownTimeout { generation: u64 },
    /// Transport closed by the peer
    TransportClosed,
    /// Connect or send failure
    TransportError,
    /// Capture device failed to start
    CaptureFailed,
}

/// Side effects requested by a transition, executed in order by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Clear pending turns and the transcript
    ResetConversation,
    RequestMicrophone,
    OpenTransport,
    SendSessionStart,
    StartCapture,
    /// Stop capturing; with `flush`, send the remaining audio first
    StopCapture { flush: bool },
    SendSessionStop,
    ArmShutdownTimer { generation: u64, after: Duration },
    CancelShutdownTimer,
    CloseTransport,
    /// Drop pending turns, framer residue and the capture device
    ClearTransient,
    /// Stop handshake was forced by the timer
    ReportTimeout,
}

/// Push-to-talk session lifecycle
///
/// Pure transition logic: `handle` updates the state and returns the effects
/// to perform, or `None` when the event has no transition in the current
/// state. Timer events carry the generation they were armed with, so a
/// timeout that lost the race against SessionStopped is ignored.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    shutdown_timeout: Duration,
    timer_generation: u64,
    armed_timer: Option<u64>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

impl SessionStateMachine {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            shutdown_timeout,
            timer_generation: 0,
            armed_timer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Generation of the currently armed shutdown timer
    pub fn armed_timer(&self) -> Option<u64> {
        self.armed_timer
    }

    pub fn can_start(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::Error)
    }

    pub fn can_stop(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Apply one event
    pub fn handle(&mut self, event: SessionEvent) -> Option<Vec<Effect>> {
        use SessionEvent as E;
        use SessionState as S;

        let (next, effects) = match (self.state, &event) {
            (S::Idle | S::Error, E::UserStart) => (
                S::Connecting,
                vec![Effect::ResetConversation, Effect::RequestMicrophone],
            ),

            (S::Connecting, E::MicrophoneDenied) => (S::Idle, vec![Effect::ClearTransient]),

            (S::Connecting, E::MicrophoneGranted) => (
                S::Connecting,
                vec![Effect::OpenTransport, Effect::SendSessionStart],
            ),

            (S::Connecting, E::SessionStarted) => (S::Connected, vec![Effect::StartCapture]),

            (S::Connected, E::UserStop) => {
                let arm = self.arm_timer();
                (
                    S::Disconnecting,
                    vec![Effect::StopCapture { flush: true }, Effect::SendSessionStop, arm],
                )
            }

            // Server ended the session on its own
            (S::Connected, E::SessionStopped) => (
                S::Idle,
                vec![
                    Effect::StopCapture { flush: false },
                    Effect::CloseTransport,
                    Effect::ClearTransient,
                ],
            ),

            (S::Disconnecting, E::SessionStopped | E::TransportClosed) => {
                self.armed_timer = None;
                (
                    S::Idle,
                    vec![
                        Effect::CancelShutdownTimer,
                        Effect::CloseTransport,
                        Effect::ClearTransient,
                    ],
                )
            }

            (S::Disconnecting, E::ShutdownTimeout { generation })
                if self.armed_timer == Some(*generation) =>
            {
                self.armed_timer = None;
                (
                    S::Idle,
                    vec![
                        Effect::ReportTimeout,
                        Effect::CloseTransport,
                        Effect::ClearTransient,
                    ],
                )
            }

            (
                S::Connecting | S::Connected | S::Disconnecting,
                E::TransportError | E::TransportClosed | E::CaptureFailed,
            ) => {
                let mut effects = Vec::new();
                if self.state == S::Connected {
                    effects.push(Effect::StopCapture { flush: false });
                }
                if self.armed_timer.take().is_some() {
                    effects.push(Effect::CancelShutdownTimer);
                }
                effects.push(Effect::CloseTransport);
                effects.push(Effect::ClearTransient);
                (S::Error, effects)
            }

            (state, event) => {
                debug!("Ignoring {:?} while {}", event, state);
                return None;
            }
        };

        if next != self.state {
            debug!("Session {} -> {} on {:?}", self.state, next, event);
        }
        self.state = next;

        Some(effects)
    }

    /// Arming a new timer supersedes any previous one
    fn arm_timer(&mut self) -> Effect {
        self.timer_generation += 1;
        self.armed_timer = Some(self.timer_generation);

        Effect::ArmShutdownTimer {
            generation: self.timer_generation,
            after: self.shutdown_timeout,
        }
    }
}
