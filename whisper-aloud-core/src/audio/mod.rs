//! Audio capture via the `cpal` backend (§4.2 Capture Source).
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate, block, or perform I/O. This module satisfies
//! that by writing directly into an SPSC ring buffer producer whose
//! `push_slice` is lock-free and allocation-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `CpalCaptureSource` must be created and dropped on the same
//! thread — the dispatcher does this inside `spawn_blocking`.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
use ringbuf::traits::Producer;

use crate::{
    buffering::AudioProducer,
    error::{CoreError, Result},
};

#[cfg(feature = "audio-cpal")]
use resample::RateConverter;

/// Boundary the Session Controller drives: open a stream that feeds an
/// `AudioProducer`, then stop it. Implemented by `CpalCaptureSource` for
/// real hardware and by a scripted test double in the controller's tests.
pub trait CaptureSource: Send {
    fn stop(&self);
    fn sample_rate(&self) -> u32;
}

/// Handle to an active cpal input stream.
///
/// **Not `Send`** on Windows/macOS — create and drop on one OS thread.
pub struct CpalCaptureSource {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    pub sample_rate: u32,
}

// cpal::Stream carries a `*mut ()` marker (COM/CoreAudio on Windows/macOS)
// that makes it `!Send` on every platform, even though nothing it owns is
// actually thread-affine here. We satisfy `CaptureSource: Send` so the
// controller can move it into `spawn_blocking`, per the threading note above.
unsafe impl Send for CpalCaptureSource {}

impl CaptureSource for CpalCaptureSource {
    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl CpalCaptureSource {
    /// Opens `device_id` (by device name) or falls back to the system
    /// default input, then the first available device, per §4.2.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        device_id: Option<&str>,
        target_rate: u32,
        target_channels: u16,
        chunk_duration: Duration,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut devices: Vec<(String, cpal::Device)> = host
            .input_devices()
            .map_err(|_| CoreError::DeviceBusy)?
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                (name, device)
            })
            .collect();

        if devices.is_empty() {
            return Err(CoreError::NoMicrophone);
        }

        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let selected_idx = device_id
            .and_then(|wanted| devices.iter().position(|(name, _)| name == wanted))
            .or_else(|| {
                default_name
                    .as_deref()
                    .and_then(|name| devices.iter().position(|(n, _)| n == name))
            })
            .unwrap_or(0);

        if let Some(wanted) = device_id {
            if !devices.iter().any(|(name, _)| name == wanted) {
                warn!(device_id = wanted, "requested input device not found, falling back");
            }
        }

        let (selected_name, device) = devices.swap_remove(selected_idx);
        info!(device = selected_name.as_str(), "opening input device");

        let supported = device
            .default_input_config()
            .map_err(|e| CoreError::DeviceFormatUnsupported(e.to_string()))?;

        let native_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(native_rate, channels, target_rate, "audio config selected");

        if target_channels != 1 {
            warn!(target_channels, "only mono output is supported; downmixing anyway");
        }

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(native_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let chunk_size = ((chunk_duration.as_secs_f32() * native_rate as f32).round() as usize).max(1);
        let mut converter = RateConverter::new(native_rate, target_rate, chunk_size)?;

        let running_cb = Arc::clone(&running);
        let ch = channels as usize;
        let mut mix_buf: Vec<f32> = Vec::new();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let mono = downmix_f32(data, ch, &mut mix_buf);
                    let resampled = converter.process(mono);
                    let written = producer.push_slice(&resampled);
                    if written < resampled.len() {
                        warn!("ring buffer full: dropped {} frames", resampled.len() - written);
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(CoreError::DeviceFormatUnsupported(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| CoreError::DeviceFormatUnsupported(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CoreError::DeviceFormatUnsupported(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate: target_rate,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _device_id: Option<&str>,
        _target_rate: u32,
        _target_channels: u16,
        _chunk_duration: Duration,
    ) -> Result<Self> {
        Err(CoreError::NoMicrophone)
    }
}

#[cfg(feature = "audio-cpal")]
fn downmix_f32<'a>(data: &'a [f32], channels: usize, scratch: &'a mut Vec<f32>) -> &'a [f32] {
    if channels <= 1 {
        return data;
    }
    let frames = data.len() / channels;
    scratch.resize(frames, 0.0);
    for f in 0..frames {
        let base = f * channels;
        let sum: f32 = data[base..base + channels].iter().sum();
        scratch[f] = sum / channels as f32;
    }
    scratch.as_slice()
}
