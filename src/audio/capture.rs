use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::CaptureError;

/// Raw audio handed over by a capture source (mono i16 at the device rate)
#[derive(Debug, Clone)]
pub struct CaptureChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Where capture sources deliver their chunks
///
/// Sending never blocks, so it is safe to call from a realtime audio callback.
pub type CaptureSink = mpsc::UnboundedSender<CaptureChunk>;

/// Audio capture source
///
/// Implementations:
/// - Microphone: default input device via cpal
/// - File: WAV file replayed in real time (testing/demo)
#[async_trait::async_trait]
pub trait AudioCapture: Send {
    /// Start delivering chunks into `sink`
    async fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError>;

    /// Stop capturing; no chunk is delivered after this returns
    async fn stop(&mut self);

    /// Check if the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Grants access to a capture source
///
/// Opening is where microphone permission is requested; an error here
/// aborts the session start.
pub trait CaptureFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioCapture>, CaptureError>;
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Default input device
    Microphone,
    /// WAV file replayed at real time, followed by trailing silence
    File {
        path: PathBuf,
        packet: Duration,
        tail_silence: Duration,
    },
}

impl CaptureSource {
    /// File source with 100ms packets and a 5s silence tail
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            packet: Duration::from_millis(100),
            tail_silence: Duration::from_secs(5),
        }
    }
}

impl CaptureFactory for CaptureSource {
    fn open(&self) -> Result<Box<dyn AudioCapture>, CaptureError> {
        match self {
            CaptureSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    let capture = super::microphone::MicrophoneCapture::open()?;
                    Ok(Box::new(capture))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    Err(CaptureError::Unavailable(
                        "built without the `microphone` feature".to_string(),
                    ))
                }
            }

            CaptureSource::File {
                path,
                packet,
                tail_silence,
            } => {
                let capture = super::file::FileCapture::open(path, *packet, *tail_silence)?;
                Ok(Box::new(capture))
            }
        }
    }
}
