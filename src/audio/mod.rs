pub mod buffer;
pub mod capture;
pub mod file;
pub mod frame;
pub mod framer;
pub mod recorder;
pub mod resample;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use buffer::FrameBuffer;
pub use capture::{AudioCapture, CaptureChunk, CaptureFactory, CaptureSink, CaptureSource};
pub use file::{AudioFile, FileCapture};
pub use frame::{frame_len, AudioFrame};
pub use framer::{AudioFramer, ClosingSilence, FramerConfig};
pub use recorder::{RecorderConfig, ResponseRecorder, RoundMetadata};
pub use resample::LinearResampler;
