use std::path::Path;
use std::time::Duration;

use hound::WavReader;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::capture::{AudioCapture, CaptureChunk, CaptureSink};
use crate::error::CaptureError;

/// A WAV file decoded to mono i16 samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono samples (multi-channel files are downmixed by averaging)
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).map_err(|e| {
            CaptureError::Device(format!("failed to open {}: {}", path.display(), e))
        })?;

        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(CaptureError::Device(format!(
                "{} is not 16-bit PCM ({:?}, {} bits)",
                path.display(),
                spec.sample_format,
                spec.bits_per_sample
            )));
        }

        let interleaved: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CaptureError::Device(format!("failed to read samples: {}", e)))?;

        let samples = downmix(&interleaved, spec.channels);
        let duration_seconds = samples.len() as f64 / spec.sample_rate.max(1) as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Average interleaved channels into one
pub fn downmix(interleaved: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Replays a WAV file as if it were captured live
///
/// Packets are paced at real time; after the file ends, silence packets
/// keep flowing for `tail_silence` so the server detects end of speech.
pub struct FileCapture {
    file: AudioFile,
    packet: Duration,
    tail_silence: Duration,
    task: Option<JoinHandle<()>>,
}

impl FileCapture {
    pub fn open(
        path: impl AsRef<Path>,
        packet: Duration,
        tail_silence: Duration,
    ) -> Result<Self, CaptureError> {
        Ok(Self {
            file: AudioFile::open(path)?,
            packet,
            tail_silence,
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioCapture for FileCapture {
    async fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError> {
        if self.task.is_some() {
            return Err(CaptureError::Device("already capturing".to_string()));
        }

        let sample_rate = self.file.sample_rate;
        let packet_len = ((sample_rate as u128 * self.packet.as_millis()) / 1000).max(1) as usize;
        let silence_packets = (self.tail_silence.as_millis() / self.packet.as_millis().max(1)) as usize;
        let samples = self.file.samples.clone();
        let packet = self.packet;

        info!(
            "Replaying {} ({} samples, {} silence packets)",
            self.file.path,
            samples.len(),
            silence_packets
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(packet);
            let silence = vec![0i16; packet_len];
            let packets = samples
                .chunks(packet_len)
                .chain(std::iter::repeat(&silence[..]).take(silence_packets));

            for (count, chunk) in packets.enumerate() {
                ticker.tick().await;
                let sent = sink.send(CaptureChunk {
                    samples: chunk.to_vec(),
                    sample_rate,
                });
                if sent.is_err() {
                    debug!("Capture sink closed after {} packets", count);
                    return;
                }
            }

            debug!("File replay complete");
        }));

        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File replay stopped: {}", self.file.path);
        }
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "file"
    }
}
