// Streaming linear resampler
//
// Keeps the fractional read position and the last input sample across
// calls, so chunk boundaries don't introduce clicks or drift.

/// Linear-interpolation resampler for mono i16 audio
#[derive(Debug, Clone)]
pub struct LinearResampler {
    source_rate: u32,
    target_rate: u32,
    /// Input samples advanced per output sample
    step: f64,
    /// Read position relative to the start of the next input chunk.
    /// Values in [-1, 0) interpolate between `last` and the chunk's first sample.
    position: f64,
    last: Option<i16>,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate,
            step: source_rate as f64 / target_rate.max(1) as f64,
            position: 0.0,
            last: None,
        }
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }

        if self.source_rate == self.target_rate {
            return input.to_vec();
        }

        let estimated = (input.len() as f64 / self.step) as usize + 2;
        let mut output = Vec::with_capacity(estimated);
        let last_index = (input.len() - 1) as f64;

        while self.position <= last_index {
            let floor = self.position.floor();
            let frac = self.position - floor;

            let (a, b) = if floor < 0.0 {
                // Between the previous chunk's tail and this chunk's head
                (self.last.unwrap_or(input[0]), input[0])
            } else {
                let idx = floor as usize;
                let a = input[idx];
                (a, input.get(idx + 1).copied().unwrap_or(a))
            };

            let interpolated = a as f64 + frac * (b as f64 - a as f64);
            output.push(interpolated.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);

            self.position += self.step;
        }

        self.position -= input.len() as f64;
        self.last = input.last().copied();

        output
    }

    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }
}
