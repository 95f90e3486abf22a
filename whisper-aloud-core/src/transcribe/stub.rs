//! `StubTranscriber` — deterministic placeholder backend for tests and for
//! development before model files are installed.

use tracing::debug;

use crate::buffering::chunk::AudioChunk;
use crate::error::Result;
use crate::transcribe::{TranscriptSegment, Transcriber, TranscriptionResult};

pub struct StubTranscriber {
    call_count: u64,
}

impl StubTranscriber {
    pub fn new() -> Self {
        Self { call_count: 0 }
    }
}

impl Default for StubTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for StubTranscriber {
    fn ensure_loaded(&mut self) -> Result<()> {
        debug!("StubTranscriber::ensure_loaded — no-op");
        Ok(())
    }

    fn transcribe(
        &mut self,
        chunk: &AudioChunk,
        language_hint: Option<&str>,
    ) -> Result<TranscriptionResult> {
        self.call_count += 1;
        if chunk.samples.len() < 160 {
            return Ok(TranscriptionResult::empty());
        }

        let text = format!(
            "[stub transcript {}: {} samples @ {} Hz]",
            self.call_count,
            chunk.samples.len(),
            chunk.sample_rate
        );
        let language = match language_hint {
            Some(code) if code != "auto" => code.to_string(),
            _ => "en".to_string(),
        };
        Ok(TranscriptionResult {
            text: text.clone(),
            segments: vec![TranscriptSegment {
                text,
                start_secs: 0.0,
                end_secs: chunk.duration_secs() as f32,
                confidence: Some(1.0),
            }],
            language: Some(language),
            confidence: Some(1.0),
            language_probability: Some(1.0),
            processing_time_secs: 0.0,
        })
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_chunk_yields_empty_result() {
        let mut t = StubTranscriber::new();
        let result = t.transcribe(&AudioChunk::new(vec![0.0; 10], 16_000), None).unwrap();
        assert!(result.text.is_empty());
    }

    #[test]
    fn longer_chunk_yields_deterministic_text() {
        let mut t = StubTranscriber::new();
        let result = t
            .transcribe(&AudioChunk::new(vec![0.1; 1600], 16_000), None)
            .unwrap();
        assert!(result.text.contains("1600 samples"));
        assert_eq!(result.segments.len(), 1);
    }

    #[test]
    fn language_hint_is_echoed_back() {
        let mut t = StubTranscriber::new();
        let result = t
            .transcribe(&AudioChunk::new(vec![0.1; 1600], 16_000), Some("fr"))
            .unwrap();
        assert_eq!(result.language.as_deref(), Some("fr"));
    }
}
