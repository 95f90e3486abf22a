//! Typed audio chunk passed between capture, DSP, and transcription stages.

/// A contiguous block of mono PCM samples at a known sample rate (§3 Audio frame).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Replaces any non-finite sample (NaN/Inf from a misbehaving driver)
    /// with silence rather than propagating it into DSP/inference (§4.2).
    pub fn sanitize(&mut self) -> usize {
        let mut replaced = 0;
        for s in self.samples.iter_mut() {
            if !s.is_finite() {
                *s = 0.0;
                replaced += 1;
            }
        }
        replaced
    }
}
