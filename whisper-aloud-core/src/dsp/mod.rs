//! Real-time DSP chain: noise gate → AGC → denoise → peak limiter (§4.3).
//!
//! Each stage is a small stateful struct processed in place, one chunk at a
//! time, mirroring the per-chunk stateful processing idiom the dispatcher
//! loop uses elsewhere in this crate (attack/release smoothing instead of
//! instantaneous switching, so consecutive chunks don't click).

pub mod meter;

use crate::config::AudioProcessingConfig;

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-10).log10()
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// One-pole smoothing coefficient for a given time constant at `sample_rate`.
fn smoothing_coeff(time_ms: f32, sample_rate: u32) -> f32 {
    if time_ms <= 0.0 {
        return 0.0;
    }
    (-1.0 / (time_ms / 1000.0 * sample_rate as f32)).exp()
}

/// Attenuates audio below `threshold_db`, with separate attack/release time
/// constants so the gate doesn't chatter on noise near the threshold.
struct NoiseGate {
    threshold_linear: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl NoiseGate {
    fn new(cfg: &AudioProcessingConfig, sample_rate: u32) -> Self {
        Self {
            threshold_linear: db_to_linear(cfg.noise_gate_threshold_db),
            attack_coeff: smoothing_coeff(cfg.noise_gate_attack_ms, sample_rate),
            release_coeff: smoothing_coeff(cfg.noise_gate_release_ms, sample_rate),
            envelope: 0.0,
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let level = s.abs();
            let target = if level >= self.threshold_linear { 1.0 } else { 0.0 };
            let coeff = if target > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = target + coeff * (self.envelope - target);
            *s *= self.envelope;
        }
    }
}

/// Automatic gain control: drives the running RMS toward `target_db`,
/// bounded to `[min_gain_db, max_gain_db]`.
struct Agc {
    target_linear: f32,
    max_gain: f32,
    min_gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
    window_samples: usize,
    window: std::collections::VecDeque<f32>,
    current_gain: f32,
}

impl Agc {
    fn new(cfg: &AudioProcessingConfig, sample_rate: u32) -> Self {
        let window_samples =
            ((cfg.agc_window_ms / 1000.0) * sample_rate as f32).max(1.0) as usize;
        Self {
            target_linear: db_to_linear(cfg.agc_target_db),
            max_gain: db_to_linear(cfg.agc_max_gain_db),
            min_gain: db_to_linear(cfg.agc_min_gain_db),
            attack_coeff: smoothing_coeff(cfg.agc_attack_ms, sample_rate),
            release_coeff: smoothing_coeff(cfg.agc_release_ms, sample_rate),
            window_samples,
            window: std::collections::VecDeque::with_capacity(window_samples),
            current_gain: 1.0,
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            if self.window.len() == self.window_samples {
                self.window.pop_front();
            }
            self.window.push_back(*s);

            let level_raw = rms(self.window.make_contiguous());
            let desired_gain = if level_raw < 1e-8 {
                1.0
            } else {
                (self.target_linear / level_raw).clamp(self.min_gain, self.max_gain)
            };

            let coeff = if desired_gain < self.current_gain {
                self.attack_coeff // gain reduction reacts fast
            } else {
                self.release_coeff
            };
            self.current_gain = desired_gain + coeff * (self.current_gain - desired_gain);
            *s = (*s * self.current_gain).clamp(-1.0, 1.0);
        }
    }
}

/// Denoising backend boundary. The default implementation is a safe no-op
/// (§4.3 explicitly allows this); a real spectral-subtraction or learned
/// backend can implement this trait without touching the chain.
pub trait DenoiseStrategy: Send {
    fn process(&mut self, samples: &mut [f32], strength: f32);
}

/// No-op denoiser: passes audio through unchanged regardless of `strength`.
pub struct NoopDenoiser;

impl DenoiseStrategy for NoopDenoiser {
    fn process(&mut self, _samples: &mut [f32], _strength: f32) {}
}

/// Hard-knee peak limiter: clamps each sample independently to
/// `±ceiling_db`, matching only what it has to.
struct Limiter {
    ceiling_linear: f32,
}

impl Limiter {
    fn new(cfg: &AudioProcessingConfig) -> Self {
        Self {
            ceiling_linear: db_to_linear(cfg.limiter_ceiling_db),
        }
    }

    fn process(&self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = s.clamp(-self.ceiling_linear, self.ceiling_linear);
        }
    }
}

/// The chained DSP pipeline: noise gate → AGC → denoise → limiter.
///
/// Each stage can be independently disabled via config; disabled stages are
/// skipped entirely rather than run as a passthrough, to avoid spending
/// cycles on state nobody wants updated.
pub struct DspPipeline {
    cfg: AudioProcessingConfig,
    gate: NoiseGate,
    agc: Agc,
    denoiser: Box<dyn DenoiseStrategy>,
    limiter: Limiter,
}

impl DspPipeline {
    pub fn new(cfg: AudioProcessingConfig, sample_rate: u32) -> Self {
        Self {
            gate: NoiseGate::new(&cfg, sample_rate),
            agc: Agc::new(&cfg, sample_rate),
            denoiser: Box::new(NoopDenoiser),
            limiter: Limiter::new(&cfg),
            cfg,
        }
    }

    pub fn with_denoiser(mut self, denoiser: Box<dyn DenoiseStrategy>) -> Self {
        self.denoiser = denoiser;
        self
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        if self.cfg.noise_gate_enabled {
            self.gate.process(samples);
        }
        if self.cfg.agc_enabled {
            self.agc.process(samples);
        }
        if self.cfg.denoise_enabled {
            self.denoiser.process(samples, self.cfg.denoise_strength);
        }
        if self.cfg.limiter_enabled {
            self.limiter.process(samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AudioProcessingConfig {
        AudioProcessingConfig::default()
    }

    #[test]
    fn noise_gate_attenuates_quiet_signal() {
        let mut gate = NoiseGate::new(&cfg(), 16_000);
        let mut samples = vec![0.0001f32; 4000]; // well below -40 dB threshold
        gate.process(&mut samples);
        assert!(samples.iter().all(|s| s.abs() < 0.0001));
    }

    #[test]
    fn noise_gate_passes_loud_signal() {
        let mut gate = NoiseGate::new(&cfg(), 16_000);
        let mut samples = vec![0.5f32; 4000];
        gate.process(&mut samples);
        // After attack ramps up, later samples should be near full level.
        assert!(samples.last().unwrap().abs() > 0.3);
    }

    #[test]
    fn agc_boosts_quiet_signal_toward_target() {
        let mut agc = Agc::new(&cfg(), 16_000);
        let mut samples = vec![0.01f32; 8000];
        agc.process(&mut samples);
        let out_rms = rms(&samples[4000..]);
        let in_rms = 0.01f32;
        assert!(out_rms > in_rms, "expected AGC to raise level");
    }

    #[test]
    fn limiter_clamps_peaks_under_ceiling() {
        let limiter = Limiter::new(&cfg());
        let mut samples = vec![1.0f32, -1.0, 0.5];
        limiter.process(&mut samples);
        let ceiling = db_to_linear(cfg().limiter_ceiling_db);
        assert!(samples.iter().all(|s| s.abs() <= ceiling + 1e-4));
    }

    #[test]
    fn limiter_clamps_independently_per_sample() {
        let limiter = Limiter::new(&cfg());
        let mut samples = vec![1.0f32, -1.0, 0.5];
        limiter.process(&mut samples);
        let ceiling = db_to_linear(cfg().limiter_ceiling_db);
        assert_eq!(samples[0], ceiling);
        assert_eq!(samples[1], -ceiling);
        assert_eq!(samples[2], 0.5, "samples already under the ceiling must pass through untouched");
    }

    #[test]
    fn limiter_no_op_under_ceiling() {
        let limiter = Limiter::new(&cfg());
        let mut samples = vec![0.1f32, -0.05];
        let before = samples.clone();
        limiter.process(&mut samples);
        assert_eq!(samples, before);
    }

    #[test]
    fn disabled_stages_are_skipped() {
        let mut c = cfg();
        c.noise_gate_enabled = false;
        c.agc_enabled = false;
        c.denoise_enabled = false;
        c.limiter_enabled = false;
        let mut pipeline = DspPipeline::new(c, 16_000);
        let mut samples = vec![2.0f32; 10]; // would be clamped by limiter if enabled
        pipeline.process(&mut samples);
        assert!(samples.iter().all(|s| *s == 2.0));
    }
}
