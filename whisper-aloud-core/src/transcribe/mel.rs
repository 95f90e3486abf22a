//! Log-mel spectrogram frontend matching Whisper's training preprocessing.
//!
//! | Parameter       | Value          |
//! |-----------------|----------------|
//! | Hann window     | 400 samples    |
//! | FFT size        | 400            |
//! | Frequency bins  | 201 (400/2+1)  |
//! | Hop length      | 160 (10 ms)    |
//! | Mel bands       | 80             |
//! | Mel range       | 0–8 000 Hz     |
//! | Max frames      | 3 000 (30 s)   |

use ndarray::Array3;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

pub const N_FFT: usize = 400;
pub const HOP: usize = 160;
pub const N_MELS: usize = 80;
pub const N_FREQS: usize = N_FFT / 2 + 1;
pub const N_FRAMES: usize = 3000;
pub const MEL_SAMPLES: usize = N_FRAMES * HOP;

pub struct MelExtractor {
    mel_filters: Vec<Vec<f32>>,
    hann_window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl MelExtractor {
    pub fn new() -> Self {
        Self {
            mel_filters: build_mel_filters(N_FFT, 16_000, N_MELS, 0.0, 8_000.0),
            hann_window: build_hann_window(N_FFT),
            fft: Arc::from(FftPlanner::<f32>::new().plan_fft_forward(N_FFT)),
        }
    }

    /// Computes a `[1, N_MELS, N_FRAMES]` log-mel spectrogram, zero-padded or
    /// truncated to 30 s as the Whisper encoder expects.
    pub fn compute(&self, samples: &[f32]) -> Array3<f32> {
        let mut normalized = samples.to_vec();
        normalize_rms_in_place(&mut normalized, 0.10);
        let centered = reflect_pad(&normalized, N_FFT / 2);

        let active_samples = samples.len().min(MEL_SAMPLES);
        let active_frames = ((active_samples + N_FFT + HOP - 1) / HOP).clamp(1, N_FRAMES);

        let mut mel = Array3::<f32>::zeros((1, N_MELS, N_FRAMES));
        let mut fft_buf = vec![Complex::new(0.0f32, 0.0); N_FFT];

        for frame in 0..active_frames {
            let start = frame * HOP;
            for v in fft_buf.iter_mut() {
                *v = Complex::new(0.0, 0.0);
            }
            for i in 0..N_FFT {
                let s = centered.get(start + i).copied().unwrap_or(0.0);
                fft_buf[i] = Complex::new(s * self.hann_window[i], 0.0);
            }
            self.fft.process(&mut fft_buf);

            for m in 0..N_MELS {
                let mut energy = 0.0f32;
                for k in 0..N_FREQS {
                    energy += self.mel_filters[m][k] * fft_buf[k].norm_sqr();
                }
                mel[[0, m, frame]] = energy;
            }
        }

        mel.mapv_inplace(|v| v.max(1e-10).log10());
        let max_val = mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        mel.mapv_inplace(|v| v.max(max_val - 8.0));
        mel.mapv_inplace(|v| (v + 4.0) / 4.0);
        mel
    }
}

impl Default for MelExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

fn hz_to_mel_slaney(hz: f32) -> f32 {
    let f_min = 0.0f32;
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0f32;
    let min_log_mel = (min_log_hz - f_min) / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if hz < min_log_hz {
        (hz - f_min) / f_sp
    } else {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    }
}

fn mel_to_hz_slaney(mel: f32) -> f32 {
    let f_min = 0.0f32;
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0f32;
    let min_log_mel = (min_log_hz - f_min) / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if mel < min_log_mel {
        f_min + f_sp * mel
    } else {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    }
}

fn build_mel_filters(fft_size: usize, sr: u32, n_mels: usize, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
    let n_freqs = fft_size / 2 + 1;
    let mel_min = hz_to_mel_slaney(fmin);
    let mel_max = hz_to_mel_slaney(fmax);

    let mel_pts: Vec<f32> = (0..=(n_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .collect();
    let hz_pts: Vec<f32> = mel_pts.iter().map(|&m| mel_to_hz_slaney(m)).collect();
    let fft_freqs: Vec<f32> = (0..n_freqs).map(|k| k as f32 * sr as f32 / fft_size as f32).collect();

    let mut filters = vec![vec![0f32; n_freqs]; n_mels];
    for m in 0..n_mels {
        let lower = hz_pts[m];
        let center = hz_pts[m + 1];
        let upper = hz_pts[m + 2];
        let down_denom = (center - lower).max(1e-10);
        let up_denom = (upper - center).max(1e-10);
        let enorm = 2.0 / (upper - lower).max(1e-10);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let w = if freq >= lower && freq <= center {
                (freq - lower) / down_denom
            } else if freq > center && freq <= upper {
                (upper - freq) / up_denom
            } else {
                0.0
            };
            filters[m][k] = (w * enorm).max(0.0);
        }
    }
    filters
}

fn normalize_rms_in_place(samples: &mut [f32], target_rms: f32) {
    if samples.is_empty() {
        return;
    }
    let sum_sq = samples.iter().map(|s| s * s).sum::<f32>();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    if rms <= 1e-6 {
        return;
    }
    let gain = (target_rms / rms).clamp(0.8, 15.0);
    if (gain - 1.0).abs() < 1e-3 {
        return;
    }
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    if pad == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return vec![0.0; pad * 2];
    }
    if samples.len() == 1 {
        return vec![samples[0]; samples.len() + pad * 2];
    }
    let n = samples.len() as isize;
    let mut out = Vec::with_capacity(samples.len() + 2 * pad);
    for i in -(pad as isize)..(n + pad as isize) {
        out.push(samples[reflect_index(i, samples.len())]);
    }
    out
}

fn reflect_index(mut i: isize, len: usize) -> usize {
    let max = len as isize - 1;
    while i < 0 || i > max {
        i = if i < 0 { -i } else { 2 * max - i };
    }
    i as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shape_is_fixed() {
        let extractor = MelExtractor::new();
        let mel = extractor.compute(&vec![0.1f32; 16_000]);
        assert_eq!(mel.shape(), &[1, N_MELS, N_FRAMES]);
    }

    #[test]
    fn silence_produces_finite_values() {
        let extractor = MelExtractor::new();
        let mel = extractor.compute(&vec![0.0f32; 16_000]);
        assert!(mel.iter().all(|v| v.is_finite()));
    }
}
