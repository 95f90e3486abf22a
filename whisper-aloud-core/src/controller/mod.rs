//! Session Controller (§4.1) — the single authoritative state machine.
//!
//! Structured after the teacher's `DictumEngine`: a cheaply-cloneable handle
//! wrapping `Arc`-shared state, `start`/`stop` returning `Result` instead of
//! panicking on misuse, and `tokio::sync::broadcast` channels carrying
//! lifecycle/data events to however many front-ends are listening. Unlike the
//! teacher, transcription runs on its own worker thread so `cancel` can reach
//! the dispatcher while a `stop()` call is still blocked waiting on it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::audio::CaptureSource;
use crate::buffering::chunk::AudioChunk;
use crate::buffering::{create_audio_ring, AudioProducer, Consumer};
use crate::config::Config;
use crate::dsp::meter::LevelMeter;
use crate::dsp::DspPipeline;
use crate::error::{CoreError, ErrorCode, Result};
use crate::store::{ExportFormat, HistoryEntry, HistoryFilters, HistoryStore, NewEntry};
use crate::transcribe::Transcriber;

const EVENT_BROADCAST_CAP: usize = 256;

/// Observable lifecycle state (§4.1). `Cancelled`/`Completed` are emitted as
/// transient events, not held as a resting state — the controller always
/// settles back into `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Recording,
    Transcribing,
}

/// Outcome of a `toggle` call, matching whichever op it mapped to.
#[derive(Debug, Clone)]
pub enum ToggleOutcome {
    Started,
    Stopped(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionMeta {
    pub duration_secs: f64,
    pub language: Option<String>,
    pub confidence: Option<f32>,
    pub language_probability: Option<f32>,
    pub processing_time_secs: f32,
    pub entry_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub uptime_secs: u64,
    pub model_id: String,
    pub device_id: Option<String>,
    pub hotkey_backend: String,
}

/// Events published on the core's broadcast bus, one-to-one with the §4.7
/// Control Surface signals.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    RecordingStarted,
    RecordingStopped,
    TranscriptionReady { text: String, meta: TranscriptionMeta },
    LevelUpdate { level: f32 },
    StatusChanged { state: SessionState },
    ConfigChanged { changed_keys: Vec<String> },
    Error { code: ErrorCode, message: String },
}

/// Boundary the controller drives to acquire input audio. Takes ownership of
/// the ring buffer's producer half and a running flag it must honor.
pub type CaptureFactory = Box<
    dyn Fn(Option<&str>, u32, u16, Duration, AudioProducer, Arc<AtomicBool>) -> Result<Box<dyn CaptureSource>>
        + Send
        + Sync,
>;

struct ActiveSession {
    capture: Box<dyn CaptureSource>,
    running: Arc<AtomicBool>,
    buffer: Arc<Mutex<Vec<f32>>>,
    processing_thread: Option<std::thread::JoinHandle<()>>,
    started_at: Instant,
    sample_rate: u32,
}

struct Inner {
    config: Mutex<Arc<Config>>,
    state: Mutex<SessionState>,
    session: Mutex<Option<ActiveSession>>,
    transcribing_cancelled: Mutex<Option<Arc<AtomicBool>>>,
    transcriber: Mutex<Box<dyn Transcriber>>,
    history: HistoryStore,
    capture_factory: CaptureFactory,
    events: broadcast::Sender<Event>,
    started_at: Instant,
    hotkey_backend: String,
    shutdown: tokio::sync::Notify,
}

/// Cheaply cloneable handle to the session state machine. Cloning shares the
/// same underlying state — every clone observes the same session.
#[derive(Clone)]
pub struct SessionController(Arc<Inner>);

impl SessionController {
    pub fn new(
        config: Config,
        transcriber: Box<dyn Transcriber>,
        history: HistoryStore,
        capture_factory: CaptureFactory,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAP);
        Self(Arc::new(Inner {
            config: Mutex::new(Arc::new(config)),
            state: Mutex::new(SessionState::Idle),
            session: Mutex::new(None),
            transcribing_cancelled: Mutex::new(None),
            transcriber: Mutex::new(transcriber),
            history,
            capture_factory,
            events,
            started_at: Instant::now(),
            hotkey_backend: "none".into(),
            shutdown: tokio::sync::Notify::new(),
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.0.events.subscribe()
    }

    /// Resolves once `quit()` has completed, for a daemon's main loop to
    /// await alongside its own interrupt handling.
    pub async fn wait_for_shutdown(&self) {
        self.0.shutdown.notified().await
    }

    fn emit(&self, event: Event) {
        let _ = self.0.events.send(event);
    }

    fn set_state(&self, state: SessionState) {
        *self.0.state.lock() = state;
        self.emit(Event::StatusChanged { state });
    }

    fn emit_error(&self, err: &CoreError) {
        if let Some(code) = err.code() {
            self.emit(Event::Error { code, message: err.to_string() });
        }
    }

    pub fn state(&self) -> SessionState {
        *self.0.state.lock()
    }

    // ── Operations (§4.1) ───────────────────────────────────────────────

    pub fn start(&self) -> Result<()> {
        {
            let state = self.0.state.lock();
            if *state != SessionState::Idle {
                let err = CoreError::RecordingInProgress;
                drop(state);
                self.emit_error(&err);
                return Err(err);
            }
        }

        let config = Arc::clone(&self.0.config.lock());
        let (producer, mut consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));

        let capture = match (self.0.capture_factory)(
            config.audio.device_id.as_deref(),
            config.audio.sample_rate_hz,
            config.audio.channels,
            Duration::from_millis(config.audio.chunk_duration_ms as u64),
            producer,
            Arc::clone(&running),
        ) {
            Ok(c) => c,
            Err(e) => {
                self.emit_error(&e);
                return Err(e);
            }
        };

        let sample_rate = capture.sample_rate();
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let max_samples = config.audio.max_recording_duration_secs as usize * sample_rate as usize;

        let thread_running = Arc::clone(&running);
        let thread_buffer = Arc::clone(&buffer);
        let thread_config = Arc::clone(&config);
        let self_for_thread = self.clone();

        let processing_thread = std::thread::spawn(move || {
            let mut pipeline = DspPipeline::new(thread_config.audio_processing.clone(), sample_rate);
            let mut meter = LevelMeter::default();
            let mut scratch = vec![0.0f32; 4096];
            let mut hit_max_duration = false;

            while thread_running.load(Ordering::Acquire) {
                let popped = consumer.pop_slice(&mut scratch);
                if popped == 0 {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    continue;
                }
                let mut chunk = AudioChunk::new(scratch[..popped].to_vec(), sample_rate);
                let replaced = chunk.sanitize();
                if replaced > 0 {
                    warn!(replaced, "replaced non-finite audio samples with silence");
                }
                pipeline.process(&mut chunk.samples);
                if let Some(level) = meter.update(&chunk.samples) {
                    self_for_thread.emit(Event::LevelUpdate { level });
                }

                let mut buf = thread_buffer.lock();
                buf.extend_from_slice(&chunk.samples);
                if max_samples > 0 && buf.len() >= max_samples {
                    hit_max_duration = true;
                    thread_running.store(false, Ordering::Release);
                }
            }

            // Drain whatever is left in the ring without blocking further.
            loop {
                let popped = consumer.pop_slice(&mut scratch);
                if popped == 0 {
                    break;
                }
                let mut chunk = AudioChunk::new(scratch[..popped].to_vec(), sample_rate);
                chunk.sanitize();
                pipeline.process(&mut chunk.samples);
                thread_buffer.lock().extend_from_slice(&chunk.samples);
            }

            if hit_max_duration {
                info!("max recording duration reached, issuing implicit stop");
                let _ = self_for_thread.stop();
            }
        });

        *self.0.session.lock() = Some(ActiveSession {
            capture,
            running,
            buffer,
            processing_thread: Some(processing_thread),
            started_at: Instant::now(),
            sample_rate,
        });

        self.set_state(SessionState::Recording);
        self.emit(Event::RecordingStarted);
        Ok(())
    }

    /// Blocking stop: closes capture, hands the buffer to the transcription
    /// worker, and blocks the caller until `TranscriptionReady` (or an error)
    /// is ready to report. `stop_async` offers the non-blocking counterpart —
    /// §4.7 requires both patterns to work.
    pub fn stop(&self) -> Result<String> {
        let (done_rx, _) = self.begin_stop()?;
        match done_rx.recv() {
            Ok(outcome) => self.finish_stop(outcome),
            Err(_) => Err(CoreError::Transcription("transcription worker died".into())),
        }
    }

    /// Non-blocking stop: transitions to `transcribing` and returns
    /// immediately; the result is reported only via `TranscriptionReady`.
    pub fn stop_async(&self) -> Result<()> {
        let (done_rx, controller) = self.begin_stop()?;
        std::thread::spawn(move || {
            if let Ok(outcome) = done_rx.recv() {
                let _ = controller.finish_stop(outcome);
            }
        });
        Ok(())
    }

    fn begin_stop(&self) -> Result<(std::sync::mpsc::Receiver<Result<(AudioChunk, crate::transcribe::TranscriptionResult)>>, SessionController)> {
        let mut session_slot = self.0.session.lock();
        if *self.0.state.lock() != SessionState::Recording {
            let err = CoreError::NotRecording;
            self.emit_error(&err);
            return Err(err);
        }
        let mut session = session_slot.take().expect("recording state implies a session");
        drop(session_slot);

        session.running.store(false, Ordering::Release);
        session.capture.stop();
        if let Some(handle) = session.processing_thread.take() {
            join_processing_thread(handle);
        }

        self.set_state(SessionState::Transcribing);
        self.emit(Event::RecordingStopped);

        let samples = std::mem::take(&mut *session.buffer.lock());
        let chunk = AudioChunk::new(samples, session.sample_rate);

        let cancelled = Arc::new(AtomicBool::new(false));
        *self.0.transcribing_cancelled.lock() = Some(Arc::clone(&cancelled));

        let config = Arc::clone(&self.0.config.lock());
        let language_hint = match config.transcription.language_hint.as_str() {
            "auto" => None,
            hint => Some(hint.to_string()),
        };

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let self_for_worker = self.clone();

        std::thread::spawn(move || {
            let result = self_for_worker
                .0
                .transcriber
                .lock()
                .transcribe(&chunk, language_hint.as_deref());
            let _ = done_tx.send(result.map(|r| (chunk, r)));
        });

        Ok((done_rx, self.clone()))
    }

    fn finish_stop(&self, outcome: Result<(AudioChunk, crate::transcribe::TranscriptionResult)>) -> Result<String> {
        let cancelled = self
            .0
            .transcribing_cancelled
            .lock()
            .take()
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(false);

        if cancelled {
            // §5 cancellation: the in-flight result is dropped silently.
            return Err(CoreError::InvalidState("transcription result discarded by cancel".into()));
        }

        let (chunk, result) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                self.set_state(SessionState::Idle);
                self.emit_error(&e);
                return Err(e);
            }
        };

        let duration_secs = chunk.duration_secs();
        let config = Arc::clone(&self.0.config.lock());

        let entry_id = if result.text.is_empty() && !config.persistence.save_empty {
            None
        } else {
            let audio = if config.persistence.archive_audio { Some(chunk.samples.clone()) } else { None };
            match self.0.history.add(NewEntry {
                text: result.text.clone(),
                language: result.language.clone(),
                model_id: config.model.name.clone(),
                duration_secs: duration_secs as f32,
                confidence: result.confidence,
                audio,
                sample_rate: chunk.sample_rate,
            }) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "failed to write history entry");
                    None
                }
            }
        };

        self.set_state(SessionState::Idle);
        self.emit(Event::TranscriptionReady {
            text: result.text.clone(),
            meta: TranscriptionMeta {
                duration_secs,
                language: result.language.clone(),
                confidence: result.confidence,
                language_probability: result.language_probability,
                processing_time_secs: result.processing_time_secs,
                entry_id,
            },
        });
        Ok(result.text)
    }

    /// Aborts the active session. During `recording`, capture is closed and
    /// the buffer discarded. During `transcribing`, the in-flight model call
    /// is allowed to finish but its result is dropped (§5) — the flag set
    /// here is observed by `finish_stop`.
    pub fn cancel(&self) -> Result<()> {
        let state = self.state();
        match state {
            SessionState::Recording => {
                let mut slot = self.0.session.lock();
                if let Some(mut session) = slot.take() {
                    session.running.store(false, Ordering::Release);
                    session.capture.stop();
                    if let Some(handle) = session.processing_thread.take() {
                        join_processing_thread(handle);
                    }
                }
                drop(slot);
                self.set_state(SessionState::Idle);
                Ok(())
            }
            SessionState::Transcribing => {
                if let Some(flag) = self.0.transcribing_cancelled.lock().as_ref() {
                    flag.store(true, Ordering::Release);
                }
                Ok(())
            }
            SessionState::Idle => Ok(()),
        }
    }

    pub fn toggle(&self) -> Result<ToggleOutcome> {
        match self.state() {
            SessionState::Idle => self.start().map(|_| ToggleOutcome::Started),
            SessionState::Recording => self.stop().map(ToggleOutcome::Stopped),
            SessionState::Transcribing => Err(CoreError::RecordingInProgress),
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let config = Arc::clone(&self.0.config.lock());
        StatusSnapshot {
            state: self.state(),
            uptime_secs: self.0.started_at.elapsed().as_secs(),
            model_id: config.model.name.clone(),
            device_id: config.audio.device_id.clone(),
            hotkey_backend: self.0.hotkey_backend.clone(),
        }
    }

    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.0.config.lock())
    }

    /// Applies `changes` over the current config, accepted only while idle
    /// (§4.1). Returns the top-level group keys that changed.
    pub fn set_config(&self, changes: &Value) -> Result<Vec<String>> {
        if self.state() != SessionState::Idle {
            return Err(CoreError::RecordingInProgress);
        }
        let current = self.0.config.lock().clone();
        let next = current.merged_with(changes)?;
        next.validate()?;

        let changed_keys = diff_top_level_keys(&current, &next);
        *self.0.config.lock() = Arc::new(next);
        self.emit(Event::ConfigChanged { changed_keys: changed_keys.clone() });
        Ok(changed_keys)
    }

    pub fn reload_config(&self, path: &Path) -> Result<()> {
        if self.state() != SessionState::Idle {
            return Err(CoreError::RecordingInProgress);
        }
        let next = crate::config::load_config(path)?;
        let current = self.0.config.lock().clone();
        let changed_keys = diff_top_level_keys(&current, &next);
        *self.0.config.lock() = Arc::new(next);
        self.emit(Event::ConfigChanged { changed_keys });
        Ok(())
    }

    pub fn get_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.0.history.list_recent(limit)
    }

    pub fn search_history(
        &self,
        query: &str,
        filters: &HistoryFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.0.history.search(query, filters, limit, offset)
    }

    pub fn export_history(&self, format: ExportFormat, filters: &HistoryFilters) -> Result<String> {
        self.0.history.export(format, filters)
    }

    /// Graceful shutdown (§4.1): cancels any active session, and — when
    /// `archive_audio` is on — flushes a partially-recorded buffer into
    /// history as a failed entry with no transcription text, tagged with
    /// the reason `"shutdown"` via its (currently untranscribed) empty text.
    pub fn quit(&self) -> Result<()> {
        if self.state() == SessionState::Recording {
            let config = Arc::clone(&self.0.config.lock());
            let mut slot = self.0.session.lock();
            if let Some(mut session) = slot.take() {
                session.running.store(false, Ordering::Release);
                session.capture.stop();
                if let Some(handle) = session.processing_thread.take() {
                    join_processing_thread(handle);
                }
                if config.persistence.archive_audio {
                    let samples = std::mem::take(&mut *session.buffer.lock());
                    let duration_secs = samples.len() as f32 / session.sample_rate as f32;
                    let _ = self.0.history.add(NewEntry {
                        text: String::new(),
                        language: None,
                        model_id: config.model.name.clone(),
                        duration_secs,
                        confidence: None,
                        audio: Some(samples),
                        sample_rate: session.sample_rate,
                    });
                }
            }
        } else {
            self.cancel()?;
        }
        self.set_state(SessionState::Idle);
        info!("session controller shutting down");
        self.0.shutdown.notify_waiters();
        Ok(())
    }
}

/// Joins the processing thread's handle, unless we're being called from
/// inside that very thread (the implicit max-duration stop runs as the last
/// action of the processing thread's own closure) — a thread can't join
/// itself, and it's about to return anyway.
fn join_processing_thread(handle: std::thread::JoinHandle<()>) {
    if handle.thread().id() != std::thread::current().id() {
        let _ = handle.join();
    }
}

fn diff_top_level_keys(old: &Config, new: &Config) -> Vec<String> {
    let old_value = serde_json::to_value(old).unwrap_or(Value::Null);
    let new_value = serde_json::to_value(new).unwrap_or(Value::Null);
    let mut keys = Vec::new();
    if let (Value::Object(old_map), Value::Object(new_map)) = (&old_value, &new_value) {
        let mut seen: BTreeMap<&str, ()> = BTreeMap::new();
        for key in old_map.keys().chain(new_map.keys()) {
            seen.insert(key.as_str(), ());
        }
        for key in seen.keys() {
            if old_map.get(*key) != new_map.get(*key) {
                keys.push(key.to_string());
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::StubTranscriber;
    use std::time::Duration;
    use tempfile::tempdir;

    /// A scripted capture source that pushes a fixed block of samples into
    /// the ring buffer once, then idles until `stop()` is called.
    struct ScriptedCapture {
        running: Arc<AtomicBool>,
        sample_rate: u32,
    }

    impl CaptureSource for ScriptedCapture {
        fn stop(&self) {
            self.running.store(false, Ordering::Release);
        }
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    fn scripted_factory(samples: Vec<f32>, sample_rate: u32) -> CaptureFactory {
        Box::new(move |_device_id, _rate, _channels, _chunk_duration, mut producer, running| {
            use crate::buffering::Producer as _;
            producer.push_slice(&samples);
            Ok(Box::new(ScriptedCapture { running, sample_rate }) as Box<dyn CaptureSource>)
        })
    }

    fn failing_factory(err: fn() -> CoreError) -> CaptureFactory {
        Box::new(move |_device_id, _rate, _channels, _chunk_duration, _producer, _running| Err(err()))
    }

    fn test_controller(factory: CaptureFactory) -> (SessionController, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let history = HistoryStore::open(dir.path().join("history.db"), dir.path().join("archive")).unwrap();
        let controller = SessionController::new(
            Config::default(),
            Box::new(StubTranscriber::new()),
            history,
            factory,
        );
        (controller, dir)
    }

    fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn start_then_stop_completes_one_cycle() {
        let (controller, _dir) = test_controller(scripted_factory(vec![0.2f32; 3200], 16_000));
        let mut events = controller.subscribe();

        controller.start().unwrap();
        assert_eq!(controller.state(), SessionState::Recording);
        std::thread::sleep(Duration::from_millis(30));

        let text = controller.stop().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(text.contains("stub transcript"));

        let events = drain_events(&mut events);
        assert!(events.iter().any(|e| matches!(e, Event::RecordingStarted)));
        assert!(events.iter().any(|e| matches!(e, Event::RecordingStopped)));
        assert!(events.iter().any(|e| matches!(e, Event::TranscriptionReady { .. })));
    }

    #[test]
    fn stop_when_idle_is_not_recording_error() {
        let (controller, _dir) = test_controller(scripted_factory(vec![], 16_000));
        let err = controller.stop().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotRecording));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn start_twice_reports_recording_in_progress() {
        let (controller, _dir) = test_controller(scripted_factory(vec![0.0f32; 160], 16_000));
        controller.start().unwrap();
        let err = controller.start().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RecordingInProgress));
        controller.cancel().unwrap();
    }

    #[test]
    fn cancel_during_recording_emits_no_transcription() {
        let (controller, _dir) = test_controller(scripted_factory(vec![0.1f32; 1600], 16_000));
        let mut events = controller.subscribe();

        controller.start().unwrap();
        controller.cancel().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);

        let events = drain_events(&mut events);
        assert!(events.iter().any(|e| matches!(e, Event::RecordingStarted)));
        assert!(!events.iter().any(|e| matches!(e, Event::RecordingStopped)));
        assert!(!events.iter().any(|e| matches!(e, Event::TranscriptionReady { .. })));
    }

    #[test]
    fn device_busy_on_start_keeps_state_idle() {
        let (controller, _dir) = test_controller(failing_factory(|| CoreError::DeviceBusy));
        let err = controller.start().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NoMicrophone));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn toggle_twice_returns_to_idle() {
        let (controller, _dir) = test_controller(scripted_factory(vec![0.1f32; 1600], 16_000));
        let first = controller.toggle().unwrap();
        assert!(matches!(first, ToggleOutcome::Started));
        std::thread::sleep(Duration::from_millis(20));
        let second = controller.toggle().unwrap();
        assert!(matches!(second, ToggleOutcome::Stopped(_)));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn set_config_rejected_while_recording() {
        let (controller, _dir) = test_controller(scripted_factory(vec![0.0f32; 160], 16_000));
        controller.start().unwrap();
        let err = controller.set_config(&serde_json::json!({"model": {"name": "tiny"}})).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RecordingInProgress));
        controller.cancel().unwrap();
    }

    #[test]
    fn set_config_reports_changed_top_level_keys() {
        let (controller, _dir) = test_controller(scripted_factory(vec![], 16_000));
        let changed = controller.set_config(&serde_json::json!({"model": {"name": "tiny"}})).unwrap();
        assert_eq!(changed, vec!["model".to_string()]);
        assert_eq!(controller.get_config().model.name, "tiny");
    }

    #[test]
    fn silence_only_session_writes_no_history_entry_by_default() {
        let (controller, _dir) = test_controller(scripted_factory(vec![0.0f32; 80], 16_000));
        controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let text = controller.stop().unwrap();
        assert!(text.is_empty() || text.trim().is_empty());
        assert!(controller.get_history(10).unwrap().is_empty());
    }
}
