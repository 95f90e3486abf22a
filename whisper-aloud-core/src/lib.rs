//! # whisper-aloud-core
//!
//! Recording/transcription engine powering the whisper_aloud background service.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureSource → SPSC ring buffer → DSP Pipeline (dispatcher thread)
//!                                                        │
//!                                              noise gate → AGC → denoise → limiter
//!                                                        │
//!                                                  Transcriber (worker)
//!                                                        │
//!                                                 History Store + Control Surface
//! ```
//!
//! The audio callback itself is zero-alloc; all DSP and inference happen off
//! the real-time thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod control;
pub mod controller;
pub mod dsp;
pub mod error;
pub mod store;
pub mod transcribe;

pub use config::Config;
pub use controller::{SessionController, SessionState};
pub use error::{CoreError, ErrorCode, Result};
pub use store::{HistoryEntry, HistoryStore};
pub use transcribe::{TranscriptionResult, Transcriber};
