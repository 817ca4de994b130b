use serde::{Deserialize, Serialize};
use tracing::debug;

use super::buffer::FrameBuffer;
use super::frame::{frame_len, AudioFrame};
use super::resample::LinearResampler;

/// Length of the synthetic closing silence when no frame was ever emitted
pub const DEFAULT_CLOSING_SILENCE_MS: u64 = 50;

/// Framer configuration
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Sample rate of emitted frames (default: 16000)
    pub sample_rate: u32,
    /// Duration of each frame in milliseconds (default: 100)
    pub frame_duration_ms: u64,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_duration_ms: 100,
        }
    }
}

/// When to follow the final flush with a synthetic end-of-speech silence frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingSilence {
    /// Always send it when the flush produced nothing
    #[default]
    Always,
    /// Only if at least one frame was sent during the capture
    AfterSpeech,
    /// Never send it
    Never,
}

/// Turns captured audio into fixed-size frames at the target rate
///
/// Lives for one capture session; call `reset()` before reusing it.
pub struct AudioFramer {
    config: FramerConfig,
    buffer: FrameBuffer,
    resampler: Option<LinearResampler>,
    last_frame_len: Option<usize>,
    frames_emitted: usize,
}

impl AudioFramer {
    pub fn new(config: FramerConfig) -> Self {
        let buffer = FrameBuffer::new(frame_len(config.sample_rate, config.frame_duration_ms));

        Self {
            config,
            buffer,
            resampler: None,
            last_frame_len: None,
            frames_emitted: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn frame_len(&self) -> usize {
        self.buffer.frame_len()
    }

    pub fn residual_len(&self) -> usize {
        self.buffer.residual_len()
    }

    /// Frames emitted since the last reset, closing silence included
    pub fn frames_emitted(&self) -> usize {
        self.frames_emitted
    }

    /// Buffer captured samples and return every frame that became complete
    pub fn ingest(&mut self, samples: &[i16], source_rate: u32) -> Vec<AudioFrame> {
        let resampled;
        let samples = if source_rate != self.config.sample_rate && source_rate > 0 {
            let target_rate = self.config.sample_rate;
            if self.resampler.as_ref().map(LinearResampler::source_rate) != Some(source_rate) {
                debug!("Resampling capture {}Hz -> {}Hz", source_rate, target_rate);
                self.resampler = Some(LinearResampler::new(source_rate, target_rate));
            }
            resampled = self
                .resampler
                .get_or_insert_with(|| LinearResampler::new(source_rate, target_rate))
                .process(samples);
            &resampled[..]
        } else {
            samples
        };

        self.buffer.push(samples);

        self.buffer
            .drain_frames()
            .into_iter()
            .map(|samples| self.emit(samples))
            .collect()
    }

    /// Final flush: the residual zero-padded to a full frame, if any
    pub fn close(&mut self) -> Vec<AudioFrame> {
        match self.buffer.flush_padded() {
            Some(samples) => vec![self.emit(samples)],
            None => Vec::new(),
        }
    }

    /// Silence frame signalling end of speech downstream
    ///
    /// Matches the length of the last emitted frame, or 50 ms if none was emitted.
    pub fn closing_silence(&mut self) -> AudioFrame {
        let len = self.last_frame_len.unwrap_or_else(|| {
            (self.config.sample_rate as f64 / 1000.0 * DEFAULT_CLOSING_SILENCE_MS as f64).round()
                as usize
        });

        self.emit(vec![0; len])
    }

    /// Frames to send when capture stops, following the closing-silence policy
    pub fn finish(&mut self, policy: ClosingSilence) -> Vec<AudioFrame> {
        let had_speech = self.frames_emitted > 0 || self.buffer.residual_len() > 0;
        let mut frames = self.close();

        if frames.is_empty() {
            let send_silence = match policy {
                ClosingSilence::Always => true,
                ClosingSilence::AfterSpeech => had_speech,
                ClosingSilence::Never => false,
            };
            if send_silence {
                frames.push(self.closing_silence());
            }
        }

        frames
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
        self.last_frame_len = None;
        self.frames_emitted = 0;
    }

    fn emit(&mut self, samples: Vec<i16>) -> AudioFrame {
        self.last_frame_len = Some(samples.len());
        self.frames_emitted += 1;
        AudioFrame::new(samples, self.config.sample_rate)
    }
}
