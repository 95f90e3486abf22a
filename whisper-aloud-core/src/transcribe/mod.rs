//! Speech-to-text backend abstraction (§4.5 Transcriber).
//!
//! `Transcriber` decouples the Session Controller from any specific backend
//! (stub echo, ONNX Whisper). Lazy-loading and compute-device fallback live
//! in `WhisperTranscriber`; the trait itself only describes the batch
//! contract — streaming/partial transcripts are a Non-goal here.

pub mod mel;
pub mod stub;

#[cfg(feature = "onnx")]
pub mod whisper;

#[cfg(feature = "onnx")]
pub use whisper::{WhisperModelConfig, WhisperTranscriber};

pub use stub::StubTranscriber;

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::AudioChunk;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    pub start_secs: f32,
    pub end_secs: f32,
    pub confidence: Option<f32>,
}

/// Result of one batch transcription call (§3 Transcription result).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: Option<String>,
    pub confidence: Option<f32>,
    pub language_probability: Option<f32>,
    pub processing_time_secs: f32,
}

impl TranscriptionResult {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            segments: Vec::new(),
            language: None,
            confidence: Some(0.0),
            language_probability: None,
            processing_time_secs: 0.0,
        }
    }
}

/// Contract for batch speech recognition backends.
///
/// `&mut self` on `transcribe` reflects that decoders hold mutable state
/// (KV caches); callers serialize access through a single worker (§5).
pub trait Transcriber: Send {
    /// Loads model weights if not already loaded. Called lazily on first use
    /// rather than eagerly at startup, per §4.5.
    fn ensure_loaded(&mut self) -> Result<()>;

    /// Transcribes one complete utterance. Never called with a chunk still
    /// being recorded — batch-only, no streaming partials. `language_hint`
    /// pins decoding to a language (ISO 639-1 code); `None` or `"auto"`
    /// triggers language detection.
    fn transcribe(
        &mut self,
        chunk: &AudioChunk,
        language_hint: Option<&str>,
    ) -> Result<TranscriptionResult>;

    fn is_loaded(&self) -> bool;
}
