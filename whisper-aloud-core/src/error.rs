//! Domain error taxonomy for the core, matching the stable error-code set the
//! Control Surface publishes via `Error(code, message)`.

use thiserror::Error;

/// Stable error code published alongside `Error(code, message)` signals.
///
/// This set is the compatibility contract referenced by the control surface —
/// front-ends match on these strings, not on `CoreError`'s `Debug` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NoMicrophone,
    ModelLoadFailed,
    ModelNotFound,
    TranscriptionFailed,
    RecordingInProgress,
    NotRecording,
    ConfigInvalid,
    PermissionDenied,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoMicrophone => "no_microphone",
            ErrorCode::ModelLoadFailed => "model_load_failed",
            ErrorCode::ModelNotFound => "model_not_found",
            ErrorCode::TranscriptionFailed => "transcription_failed",
            ErrorCode::RecordingInProgress => "recording_in_progress",
            ErrorCode::NotRecording => "not_recording",
            ErrorCode::ConfigInvalid => "config_invalid",
            ErrorCode::PermissionDenied => "permission_denied",
        }
    }
}

/// All errors produced by whisper-aloud-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no microphone available")]
    NoMicrophone,

    #[error("audio device is busy")]
    DeviceBusy,

    #[error("audio device format unsupported: {0}")]
    DeviceFormatUnsupported(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("invalid audio format: {0}")]
    AudioFormatError(String),

    #[error("operation invalid in current state: {0}")]
    InvalidState(String),

    #[error("not recording")]
    NotRecording,

    #[error("recording already in progress")]
    RecordingInProgress,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("history store error: {0}")]
    Store(String),

    #[error("shutdown requested")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Maps this error onto the stable §4.7 error code, or `None` for errors
    /// that are purely internal state violations and not user-visible.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            CoreError::NoMicrophone | CoreError::DeviceBusy => Some(ErrorCode::NoMicrophone),
            CoreError::DeviceFormatUnsupported(_) => Some(ErrorCode::NoMicrophone),
            CoreError::PermissionDenied(_) => Some(ErrorCode::PermissionDenied),
            CoreError::ModelNotFound(_) => Some(ErrorCode::ModelNotFound),
            CoreError::ModelLoadFailed(_) => Some(ErrorCode::ModelLoadFailed),
            CoreError::Transcription(_) | CoreError::AudioFormatError(_) => {
                Some(ErrorCode::TranscriptionFailed)
            }
            CoreError::NotRecording => Some(ErrorCode::NotRecording),
            CoreError::RecordingInProgress => Some(ErrorCode::RecordingInProgress),
            CoreError::ConfigInvalid(_) => Some(ErrorCode::ConfigInvalid),
            CoreError::InvalidState(_)
            | CoreError::Store(_)
            | CoreError::Shutdown
            | CoreError::Io(_)
            | CoreError::Other(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
