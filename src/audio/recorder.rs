use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Output directory for response recordings
    pub output_dir: PathBuf,
    /// Prefix for file names (usually the session id)
    pub prefix: String,
    /// Sample rate of the server audio
    pub sample_rate: u32,
}

/// Metadata for one recorded response round
#[derive(Debug, Clone)]
pub struct RoundMetadata {
    /// Round number (0-indexed)
    pub round_index: usize,
    /// File path of the recording
    pub file_path: PathBuf,
    /// Sample rate
    pub sample_rate: u32,
    /// Number of samples written
    pub sample_count: usize,
}

impl RoundMetadata {
    pub fn duration_secs(&self) -> f64 {
        self.sample_count as f64 / self.sample_rate.max(1) as f64
    }
}

/// Saves the server's spoken replies, one WAV file per response round
///
/// A round spans ResponseAudioStarted .. ResponseAudioEnded; audio arriving
/// outside a round is not recorded.
pub struct ResponseRecorder {
    config: RecorderConfig,
    current_round: Option<RoundWriter>,
    round_index: usize,
}

impl ResponseRecorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir)
            .with_context(|| format!("Failed to create output directory: {:?}", config.output_dir))?;

        info!(
            "Response recorder initialized: {} ({})",
            config.prefix,
            config.output_dir.display()
        );

        Ok(Self {
            config,
            current_round: None,
            round_index: 0,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.current_round.is_some()
    }

    /// Open a new round, finishing any round left open
    pub fn begin_round(&mut self) -> Result<Option<RoundMetadata>> {
        let previous = self.end_round()?;

        let path = self.config.output_dir.join(format!(
            "{}-response-{:03}.wav",
            self.config.prefix, self.round_index
        ));

        self.current_round = Some(RoundWriter::new(
            path,
            self.round_index,
            self.config.sample_rate,
        )?);
        self.round_index += 1;

        Ok(previous)
    }

    /// Append server audio to the open round
    pub fn write(&mut self, samples: &[i16]) -> Result<()> {
        match &mut self.current_round {
            Some(round) => round.write_samples(samples),
            None => {
                debug!("Dropping {} samples outside a response round", samples.len());
                Ok(())
            }
        }
    }

    /// Finish the open round, if any
    pub fn end_round(&mut self) -> Result<Option<RoundMetadata>> {
        let Some(round) = self.current_round.take() else {
            return Ok(None);
        };

        let meta = round.finish()?;
        info!(
            "Response round {} saved: {:.1}s ({} samples) -> {}",
            meta.round_index,
            meta.duration_secs(),
            meta.sample_count,
            meta.file_path.display()
        );

        Ok(Some(meta))
    }
}

/// Writes a single round to disk as WAV file
struct RoundWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    metadata: RoundMetadata,
}

impl RoundWriter {
    fn new(file_path: PathBuf, round_index: usize, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&file_path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", file_path))?;

        Ok(Self {
            writer: Some(writer),
            metadata: RoundMetadata {
                round_index,
                file_path,
                sample_rate,
                sample_count: 0,
            },
        })
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
            self.metadata.sample_count += samples.len();
        }

        Ok(())
    }

    fn finish(mut self) -> Result<RoundMetadata> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        Ok(self.metadata.clone())
    }
}

impl Drop for RoundWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
