use std::collections::VecDeque;

/// Accumulates samples and slices them into fixed-length frames
///
/// Samples that don't yet fill a whole frame stay in the residual buffer
/// until more audio arrives or the buffer is flushed.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    residual: VecDeque<i16>,
    frame_len: usize,
}

impl FrameBuffer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            residual: VecDeque::with_capacity(frame_len * 2),
            frame_len: frame_len.max(1),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Samples waiting for a full frame
    pub fn residual_len(&self) -> usize {
        self.residual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residual.is_empty()
    }

    pub fn push(&mut self, samples: &[i16]) {
        self.residual.extend(samples.iter().copied());
    }

    /// Take the next full frame from the front, if one is available
    pub fn pop_frame(&mut self) -> Option<Vec<i16>> {
        if self.residual.len() < self.frame_len {
            return None;
        }

        Some(self.residual.drain(..self.frame_len).collect())
    }

    /// Drain every full frame currently buffered
    pub fn drain_frames(&mut self) -> Vec<Vec<i16>> {
        let mut frames = Vec::with_capacity(self.residual.len() / self.frame_len);
        while let Some(frame) = self.pop_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Take the residual zero-padded to a full frame; None if nothing is buffered
    pub fn flush_padded(&mut self) -> Option<Vec<i16>> {
        if self.residual.is_empty() {
            return None;
        }

        let mut frame: Vec<i16> = self.residual.drain(..).collect();
        frame.resize(self.frame_len.max(frame.len()), 0);
        Some(frame)
    }

    pub fn clear(&mut self) {
        self.residual.clear();
    }
}
