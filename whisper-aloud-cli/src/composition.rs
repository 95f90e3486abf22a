//! Composition root helpers shared by the daemon and the one-shot
//! `transcribe <file>` command. Grounded on `dictum-app/src/main.rs`'s
//! model-selection logic: prefer the real backend when its files are
//! present on disk, fall back to the stub otherwise.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use whisper_aloud_core::audio::{CaptureSource, CpalCaptureSource};
use whisper_aloud_core::buffering::AudioProducer;
use whisper_aloud_core::config::{self, Config};
use whisper_aloud_core::controller::CaptureFactory;
use whisper_aloud_core::store::HistoryStore;
use whisper_aloud_core::transcribe::stub::StubTranscriber;
use whisper_aloud_core::transcribe::Transcriber;

#[cfg(feature = "onnx")]
use whisper_aloud_core::transcribe::{WhisperModelConfig, WhisperTranscriber};

fn model_dir(config: &Config) -> PathBuf {
    config::default_data_dir().join("models").join(&config.model.name)
}

/// Builds the configured transcriber, falling back to `StubTranscriber` when
/// the ONNX backend is unavailable (feature disabled) or its model files
/// aren't installed yet — mirroring the teacher's eager-degrade-to-stub
/// policy rather than failing the whole process at startup.
pub fn build_transcriber(config: &Config) -> Box<dyn Transcriber> {
    #[cfg(feature = "onnx")]
    {
        let dir = model_dir(config);
        let model_config = WhisperModelConfig::from_model_dir(&dir, config.model.compute_device.clone());
        if model_config.encoder_path.exists()
            && model_config.decoder_path.exists()
            && model_config.tokenizer_path.exists()
        {
            info!(model_dir = %dir.display(), "loading Whisper ONNX transcriber");
            return Box::new(WhisperTranscriber::new(model_config));
        }
        warn!(model_dir = %dir.display(), "model files not found, using stub transcriber");
    }
    Box::new(StubTranscriber::new())
}

/// Wraps `CpalCaptureSource::open` to match `CaptureFactory`'s argument
/// order. A real cpal stream must be created and dropped on the thread that
/// opens it; the processing thread owns it for the session's lifetime.
pub fn cpal_capture_factory() -> CaptureFactory {
    Box::new(
        |device_id: Option<&str>,
         rate: u32,
         channels: u16,
         chunk_duration: Duration,
         producer: AudioProducer,
         running: Arc<AtomicBool>| {
            let source = CpalCaptureSource::open(producer, running, device_id, rate, channels, chunk_duration)?;
            Ok(Box::new(source) as Box<dyn CaptureSource>)
        },
    )
}

pub fn open_history_store(config: &Config) -> Result<HistoryStore> {
    let data_dir = config::default_data_dir();
    let db_path = data_dir.join("history.db");
    let archive_dir = data_dir.join("audio");
    HistoryStore::open(db_path, archive_dir).context("opening history store")
}

pub fn load_or_default_config(path: &Path) -> Result<Config> {
    config::load_config(path).context("loading configuration")
}
