//! End-to-end scenarios over the public `SessionController` API, adapted
//! from the six record→transcribe walkthroughs this crate is specified
//! against. Audio is fed through a scripted capture double rather than real
//! hardware, matching the teacher's `tests/pipeline_latency.rs` placement
//! (integration tests drive the public surface, not internals).
//!
//! Exact `LevelUpdate` counts depend on wall-clock pacing the scripted
//! double doesn't reproduce (it prefills the ring buffer instead of
//! streaming it in real time), so these tests check ordering and outcome
//! invariants instead of event counts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use whisper_aloud_core::audio::CaptureSource;
use whisper_aloud_core::buffering::{create_audio_ring, AudioProducer, Producer};
use whisper_aloud_core::config::Config;
use whisper_aloud_core::controller::{CaptureFactory, Event, SessionController};
use whisper_aloud_core::error::{CoreError, ErrorCode};
use whisper_aloud_core::store::HistoryStore;
use whisper_aloud_core::transcribe::StubTranscriber;

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
    Box::new(
        move |_device_id: Option<&str>,
              _rate: u32,
              _channels: u16,
              _chunk_duration: Duration,
              mut producer: AudioProducer,
              running: Arc<AtomicBool>| {
            producer.push_slice(&samples);
            Ok(Box::new(ScriptedCapture { running, sample_rate }) as Box<dyn CaptureSource>)
        },
    )
}

fn failing_factory(err: fn() -> CoreError) -> CaptureFactory {
    Box::new(
        move |_: Option<&str>, _: u32, _: u16, _: Duration, _: AudioProducer, _: Arc<AtomicBool>| Err(err()),
    )
}

fn test_controller(factory: CaptureFactory) -> (SessionController, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let history = HistoryStore::open(dir.path().join("history.sqlite3"), dir.path().join("archive")).unwrap();
    let controller = SessionController::new(Config::default(), Box::new(StubTranscriber::new()), history, factory);
    (controller, dir)
}

fn sine_wave(seconds: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let n = (seconds * sample_rate as f32) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
        .collect()
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Scenario 1 (clean utterance), adapted: a non-trivial utterance produces
/// exactly the lifecycle RecordingStarted → RecordingStopped →
/// TranscriptionReady, and one history entry.
#[test]
fn clean_utterance_produces_one_history_entry() {
    let samples = sine_wave(3.1, 16_000, 0.3);
    let (controller, _dir) = test_controller(scripted_factory(samples, 16_000));
    let mut events = controller.subscribe();

    controller.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let text = controller.stop().unwrap();
    assert!(text.contains("stub transcript"));

    let mut saw_started = false;
    let mut saw_stopped = false;
    let mut saw_ready = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::RecordingStarted => {
                assert!(!saw_stopped && !saw_ready, "RecordingStarted must precede terminal events");
                saw_started = true;
            }
            Event::RecordingStopped => {
                assert!(saw_started && !saw_ready, "RecordingStopped must follow start, precede TranscriptionReady");
                saw_stopped = true;
            }
            Event::TranscriptionReady { .. } => {
                assert!(saw_stopped, "TranscriptionReady must follow RecordingStopped");
                saw_ready = true;
            }
            _ => {}
        }
    }
    assert!(saw_started && saw_stopped && saw_ready);

    let history = controller.get_history(10).unwrap();
    assert_eq!(history.len(), 1);
}

/// Scenario 2: cancel mid-record produces no transcription and no history.
#[test]
fn cancel_mid_record_produces_no_transcript_or_history() {
    let samples = sine_wave(1.0, 16_000, 0.3);
    let (controller, _dir) = test_controller(scripted_factory(samples, 16_000));
    let mut events = controller.subscribe();

    controller.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    controller.cancel().unwrap();

    let mut saw_idle_status = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::RecordingStopped => panic!("cancel must not emit RecordingStopped"),
            Event::TranscriptionReady { .. } => panic!("cancel must not emit TranscriptionReady"),
            Event::StatusChanged { state } if format!("{state:?}") == "Idle" => saw_idle_status = true,
            _ => {}
        }
    }
    assert!(saw_idle_status);
    assert!(controller.get_history(10).unwrap().is_empty());
}

/// Scenario 3: silence-only session yields empty text and no history entry
/// under the default `save_empty = false` policy.
#[test]
fn silence_only_yields_empty_text_and_no_history() {
    let samples = vec![0.0f32; 80]; // below StubTranscriber's 160-sample floor
    let (controller, _dir) = test_controller(scripted_factory(samples, 16_000));

    controller.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let text = controller.stop().unwrap();

    assert!(text.trim().is_empty());
    assert!(controller.get_history(10).unwrap().is_empty());
}

/// Scenario 4: identical audio submitted through two sessions shares one
/// archive blob with ref_count = 2.
#[test]
fn duplicate_audio_shares_one_archive_blob() {
    let mut config = Config::default();
    config.persistence.archive_audio = true;
    let dir = tempfile::tempdir().unwrap();
    let history = HistoryStore::open(dir.path().join("history.sqlite3"), dir.path().join("archive")).unwrap();

    let samples = sine_wave(0.5, 16_000, 0.4);
    let controller = SessionController::new(
        config.clone(),
        Box::new(StubTranscriber::new()),
        history,
        scripted_factory(samples.clone(), 16_000),
    );
    controller.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    controller.stop().unwrap();

    let history2 = HistoryStore::open(dir.path().join("history.sqlite3"), dir.path().join("archive")).unwrap();
    let controller2 = SessionController::new(
        config,
        Box::new(StubTranscriber::new()),
        history2,
        scripted_factory(samples, 16_000),
    );
    controller2.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    controller2.stop().unwrap();

    let final_history = HistoryStore::open(dir.path().join("history.sqlite3"), dir.path().join("archive")).unwrap();
    let entries = final_history.list_recent(10).unwrap();
    assert_eq!(entries.len(), 2);
    let hash_a = entries[0].audio_hash.clone().expect("archived");
    let hash_b = entries[1].audio_hash.clone().expect("archived");
    assert_eq!(hash_a, hash_b, "identical audio must dedup to one archive hash");
}

/// Scenario 5: config swap while idle emits exactly one ConfigChanged and
/// is visible in subsequent status queries.
#[test]
fn config_swap_while_idle_emits_one_config_changed() {
    let (controller, _dir) = test_controller(scripted_factory(vec![], 16_000));
    let mut events = controller.subscribe();

    controller
        .set_config(&serde_json::json!({"model": {"name": "tiny"}}))
        .unwrap();

    let changed_count = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, Event::ConfigChanged { .. }))
        .count();
    assert_eq!(changed_count, 1);
    assert_eq!(controller.get_config().model.name, "tiny");
    assert_eq!(controller.status().model_id, "tiny");
}

/// Scenario 6: capture open failure leaves the controller idle with no
/// partial session and a reported error.
#[test]
fn device_busy_on_start_keeps_state_idle_and_reports_error() {
    let (controller, _dir) = test_controller(failing_factory(|| CoreError::DeviceBusy));
    let err = controller.start().unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NoMicrophone));
    assert_eq!(format!("{:?}", controller.state()), "Idle");
}
