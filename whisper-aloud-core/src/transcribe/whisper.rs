//! Whisper ONNX backend via the `ort` crate (§4.5, `onnx` feature).
//!
//! Targets the HuggingFace `optimum` separate encoder + decoder export:
//! - `encoder_model.onnx` — `[1,80,3000]` → `last_hidden_state [1,1500,384]`
//! - `decoder_model.onnx` — `input_ids [1,seq]` + `encoder_hidden_states`
//!   → `logits [1,seq,vocab]`
//! - `tokenizer.json`     — HuggingFace fast tokenizer
//!
//! Greedy (argmax) decode, stopping at the end-of-transcript token or a step
//! budget. No streaming/partial decoding — batch-only per §4.5.

use std::path::{Path, PathBuf};

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::buffering::chunk::AudioChunk;
use crate::config::ComputeDevice;
use crate::error::{CoreError, Result};
use crate::transcribe::mel::{MelExtractor, N_FRAMES, N_MELS};
use crate::transcribe::{TranscriptSegment, Transcriber, TranscriptionResult};

const SOT: i64 = 50258;
const EOT: i64 = 50257;
const TRANSCRIBE_TASK: i64 = 50359;
const NO_TIMESTAMPS: i64 = 50363;
const MAX_DECODE_STEPS: usize = 224;

/// First of the 99 contiguous language tokens, in the canonical Whisper
/// `LANGUAGES` dict order.
const LANGUAGE_TOKEN_BASE: i64 = 50259;
const N_LANGUAGES: usize = 99;

const LANGUAGE_CODES: [&str; N_LANGUAGES] = [
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv", "it",
    "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no", "th", "ur",
    "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr", "az", "sl", "kn",
    "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw", "gl", "mr", "pa", "si",
    "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu", "am", "yi", "lo", "uz", "fo",
    "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl", "mg", "as", "tt", "haw", "ln", "ha",
    "ba", "jw", "su",
];

fn language_token_for_code(code: &str) -> Option<i64> {
    LANGUAGE_CODES
        .iter()
        .position(|&c| c == code)
        .map(|idx| LANGUAGE_TOKEN_BASE + idx as i64)
}

fn code_for_language_token(token: i64) -> Option<String> {
    let idx = token - LANGUAGE_TOKEN_BASE;
    if idx < 0 || idx as usize >= N_LANGUAGES {
        return None;
    }
    Some(LANGUAGE_CODES[idx as usize].to_string())
}

/// Log-softmax over `logits`, returning `(argmax_index, logprob_of_argmax)`.
fn argmax_logprob(logits: &[f32]) -> (i64, f32) {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let sum_exp: f32 = logits.iter().map(|&l| (l - max).exp()).sum();
    let log_sum_exp = sum_exp.ln();
    let (idx, &best) = logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .expect("logits is non-empty");
    (idx as i64, (best - max) - log_sum_exp)
}

#[derive(Debug, Clone)]
pub struct WhisperModelConfig {
    pub encoder_path: PathBuf,
    pub decoder_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub compute_device: ComputeDevice,
}

impl WhisperModelConfig {
    pub fn from_model_dir(dir: &Path, compute_device: ComputeDevice) -> Self {
        Self {
            encoder_path: dir.join("encoder_model.onnx"),
            decoder_path: dir.join("decoder_model.onnx"),
            tokenizer_path: dir.join("tokenizer.json"),
            compute_device,
        }
    }
}

fn create_session(model_path: &Path, compute_device: ComputeDevice) -> Result<Session> {
    if !model_path.exists() {
        return Err(CoreError::ModelNotFound(model_path.display().to_string()));
    }

    let logical_cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let builder = SessionBuilder::new()
        .and_then(|b| b.with_intra_threads(logical_cores.clamp(1, 12)))
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::All))
        .map_err(|e| CoreError::ModelLoadFailed(e.to_string()))?;

    // Attempt a GPU execution provider when requested, falling back to CPU
    // silently in `Auto` mode and with a warning in `Gpu` mode.
    let builder = match compute_device {
        ComputeDevice::Cpu => builder,
        ComputeDevice::Gpu | ComputeDevice::Auto => {
            match builder.with_execution_providers([ort::ep::CUDA::default().build()]) {
                Ok(b) => b,
                Err(e) => {
                    if compute_device == ComputeDevice::Gpu {
                        warn!(error = %e, "GPU execution provider unavailable, falling back to CPU");
                    }
                    SessionBuilder::new().map_err(|e| CoreError::ModelLoadFailed(e.to_string()))?
                }
            }
        }
    };

    builder
        .commit_from_file(model_path)
        .map_err(|e| CoreError::ModelLoadFailed(e.to_string()))
}

/// Lazy-loaded ONNX Whisper backend with `auto|cpu|gpu` compute selection
/// and CPU fallback (§4.5).
pub struct WhisperTranscriber {
    config: WhisperModelConfig,
    encoder: Option<Session>,
    decoder: Option<Session>,
    tokenizer: Option<Tokenizer>,
    mel: MelExtractor,
}

impl WhisperTranscriber {
    pub fn new(config: WhisperModelConfig) -> Self {
        Self {
            config,
            encoder: None,
            decoder: None,
            tokenizer: None,
            mel: MelExtractor::new(),
        }
    }

    fn run_encoder(&mut self, chunk: &AudioChunk) -> Result<(Vec<f32>, usize, usize)> {
        let mel = self.mel.compute(&chunk.samples);
        let mel_contig = mel.as_standard_layout();
        let encoder = self.encoder.as_mut().expect("ensure_loaded called");

        let input = Value::from_array(([1usize, N_MELS, N_FRAMES], mel_contig.as_slice().unwrap().to_vec()))
            .map_err(|e| CoreError::Transcription(e.to_string()))?;
        let outputs = encoder
            .run(ort::inputs![input])
            .map_err(|e| CoreError::Transcription(e.to_string()))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| CoreError::Transcription(e.to_string()))?;
        let n_frames = shape[1] as usize;
        let d_model = shape[2] as usize;
        Ok((data.to_vec(), n_frames, d_model))
    }

    fn run_decoder_step(&mut self, tokens: &[i64], enc_data: &[f32], n_frames: usize, d_model: usize) -> Result<Vec<f32>> {
        let decoder = self.decoder.as_mut().expect("ensure_loaded called");
        let seq = tokens.len();
        let input_ids = Value::from_array(([1usize, seq], tokens.to_vec()))
            .map_err(|e| CoreError::Transcription(e.to_string()))?;
        let enc_hidden = Value::from_array(([1usize, n_frames, d_model], enc_data.to_vec()))
            .map_err(|e| CoreError::Transcription(e.to_string()))?;

        let outputs = decoder
            .run(ort::inputs![input_ids, enc_hidden])
            .map_err(|e| CoreError::Transcription(e.to_string()))?;
        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| CoreError::Transcription(e.to_string()))?;

        let vocab = shape[2] as usize;
        let last_step_start = (seq - 1) * vocab;
        Ok(logits[last_step_start..last_step_start + vocab].to_vec())
    }

    /// One decode step from `[SOT]`, argmax'd over the 99 language tokens.
    /// Returns the detected language token and its probability.
    fn detect_language(&mut self, enc_data: &[f32], n_frames: usize, d_model: usize) -> Result<(i64, f32)> {
        let logits = self.run_decoder_step(&[SOT], enc_data, n_frames, d_model)?;
        let base = LANGUAGE_TOKEN_BASE as usize;
        let lang_logits = &logits[base..base + N_LANGUAGES];
        let (idx, logprob) = argmax_logprob(lang_logits);
        Ok((LANGUAGE_TOKEN_BASE + idx, logprob.exp()))
    }

    /// Greedy decode from a 4-token prompt `[SOT, language, transcribe,
    /// no_timestamps]`. Returns the full token sequence (prompt included)
    /// plus the mean per-step log-probability of the tokens actually chosen.
    fn greedy_decode(
        &mut self,
        enc_data: &[f32],
        n_frames: usize,
        d_model: usize,
        language_token: i64,
    ) -> Result<(Vec<i64>, f32)> {
        let mut tokens = vec![SOT, language_token, TRANSCRIBE_TASK, NO_TIMESTAMPS];
        let mut logprob_sum = 0.0f32;
        let mut logprob_count = 0usize;

        for _ in 0..MAX_DECODE_STEPS {
            let logits = self.run_decoder_step(&tokens, enc_data, n_frames, d_model)?;
            let (next, logprob) = argmax_logprob(&logits);

            if next == EOT {
                break;
            }
            tokens.push(next);
            logprob_sum += logprob;
            logprob_count += 1;
        }

        let avg_logprob = if logprob_count > 0 { logprob_sum / logprob_count as f32 } else { 0.0 };
        Ok((tokens, avg_logprob))
    }
}

impl Transcriber for WhisperTranscriber {
    fn ensure_loaded(&mut self) -> Result<()> {
        if self.encoder.is_some() && self.decoder.is_some() && self.tokenizer.is_some() {
            return Ok(());
        }
        info!(path = ?self.config.encoder_path, "loading Whisper encoder");
        self.encoder = Some(create_session(&self.config.encoder_path, self.config.compute_device)?);
        self.decoder = Some(create_session(&self.config.decoder_path, self.config.compute_device)?);
        self.tokenizer = Some(
            Tokenizer::from_file(&self.config.tokenizer_path)
                .map_err(|e| CoreError::ModelLoadFailed(e.to_string()))?,
        );
        Ok(())
    }

    fn transcribe(
        &mut self,
        chunk: &AudioChunk,
        language_hint: Option<&str>,
    ) -> Result<TranscriptionResult> {
        self.ensure_loaded()?;
        if chunk.samples.is_empty() {
            return Ok(TranscriptionResult::empty());
        }

        let start = std::time::Instant::now();
        let (enc_data, n_frames, d_model) = self.run_encoder(chunk)?;

        let hinted_token = language_hint
            .filter(|&h| h != "auto")
            .and_then(language_token_for_code);
        let (language_token, language_probability) = match hinted_token {
            Some(token) => (token, None),
            None => {
                let (token, prob) = self.detect_language(&enc_data, n_frames, d_model)?;
                (token, Some(prob))
            }
        };

        let (tokens, avg_logprob) = self.greedy_decode(&enc_data, n_frames, d_model, language_token)?;

        let tokenizer = self.tokenizer.as_ref().expect("ensure_loaded called");
        let generated: Vec<u32> = tokens[4..].iter().map(|&t| t as u32).collect();
        let text = tokenizer
            .decode(&generated, true)
            .map_err(|e| CoreError::Transcription(e.to_string()))?
            .trim()
            .to_string();

        if text.is_empty() {
            return Ok(TranscriptionResult::empty());
        }

        let confidence = avg_logprob.exp();
        let duration = chunk.duration_secs() as f32;
        let processing_time_secs = start.elapsed().as_secs_f32();
        Ok(TranscriptionResult {
            text: text.clone(),
            segments: vec![TranscriptSegment {
                text,
                start_secs: 0.0,
                end_secs: duration,
                confidence: Some(confidence),
            }],
            language: code_for_language_token(language_token),
            confidence: Some(confidence),
            language_probability,
            processing_time_secs,
        })
    }

    fn is_loaded(&self) -> bool {
        self.encoder.is_some() && self.decoder.is_some() && self.tokenizer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_token_round_trips_through_code() {
        let token = language_token_for_code("fr").unwrap();
        assert_eq!(code_for_language_token(token).as_deref(), Some("fr"));
    }

    #[test]
    fn unknown_language_code_maps_to_none() {
        assert_eq!(language_token_for_code("xx"), None);
    }

    #[test]
    fn token_outside_language_range_maps_to_none() {
        assert_eq!(code_for_language_token(SOT), None);
        assert_eq!(code_for_language_token(LANGUAGE_TOKEN_BASE + N_LANGUAGES as i64), None);
    }

    #[test]
    fn argmax_logprob_picks_the_largest_logit() {
        let logits = vec![0.0f32, 5.0, 1.0];
        let (idx, logprob) = argmax_logprob(&logits);
        assert_eq!(idx, 1);
        assert!(logprob <= 0.0, "a log-probability is never positive");
        assert!(logprob.exp() > 0.9, "an isolated dominant logit should be near-certain");
    }
}
