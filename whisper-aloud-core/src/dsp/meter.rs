//! Level Meter (§4.4): one-pole smoothed RMS, throttled to ≤10 Hz for the
//! Control Surface's `LevelUpdate` signal. Chunks arriving between two
//! throttled emissions aren't dropped: the meter keeps the peak smoothed
//! level seen since the last emission and reports that, so a loud transient
//! between ticks still surfaces instead of being averaged away.
//!
//! Grounded on the dispatcher's `compute_rms` + throttled activity-event
//! pattern used elsewhere in this crate's per-chunk processing loop.

use std::time::{Duration, Instant};

use super::linear_to_db;

const SMOOTHING_ALPHA: f32 = 0.3;
const MAX_UPDATE_HZ: u64 = 10;

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Tracks a smoothed 0.0–1.0 level and throttles how often a new reading is
/// surfaced to subscribers, aggregating (keeping the peak of) whatever
/// arrives in between.
pub struct LevelMeter {
    smoothed: f32,
    peak_since_emit: f32,
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self {
            smoothed: 0.0,
            peak_since_emit: 0.0,
            last_emit: None,
            min_interval: Duration::from_millis(1000 / MAX_UPDATE_HZ),
        }
    }
}

impl LevelMeter {
    /// Feeds a chunk into the smoothing filter. Returns `Some(level_db)`
    /// when enough time has elapsed since the last emission, `None`
    /// otherwise — callers only publish on `Some`. The returned value is
    /// `20*log10(max(peak_rms, 1e-10))` over every chunk since the last
    /// emission, not just the one that happened to land on the tick.
    pub fn update(&mut self, samples: &[f32]) -> Option<f32> {
        let level = rms(samples).clamp(0.0, 1.0);
        self.smoothed = SMOOTHING_ALPHA * level + (1.0 - SMOOTHING_ALPHA) * self.smoothed;
        self.peak_since_emit = self.peak_since_emit.max(self.smoothed);

        let now = Instant::now();
        let should_emit = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        };
        if should_emit {
            self.last_emit = Some(now);
            let db = linear_to_db(self.peak_since_emit);
            self.peak_since_emit = 0.0;
            Some(db)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
        self.peak_since_emit = 0.0;
        self.last_emit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_produces_floor_db() {
        let mut meter = LevelMeter::default();
        let level = meter.update(&vec![0.0; 100]).unwrap();
        assert_eq!(level, linear_to_db(0.0));
    }

    #[test]
    fn throttles_to_max_rate() {
        let mut meter = LevelMeter::default();
        assert!(meter.update(&vec![0.5; 100]).is_some());
        // Immediately calling again should be throttled.
        assert!(meter.update(&vec![0.5; 100]).is_none());
    }

    #[test]
    fn smoothing_moves_gradually_toward_input_level() {
        let mut meter = LevelMeter::default();
        meter.update(&vec![0.0; 10]);
        meter.reset();
        let first = meter.update(&vec![1.0; 10]).unwrap();
        assert!((first - linear_to_db(SMOOTHING_ALPHA)).abs() < 1e-3);
    }

    #[test]
    fn a_quiet_chunk_between_emissions_does_not_erase_a_loud_one() {
        let mut meter = LevelMeter::default();
        // First call always emits and starts the throttle window.
        meter.update(&vec![0.9; 10]).unwrap();
        // A loud transient arrives mid-window...
        assert!(meter.update(&vec![0.9; 10]).is_none());
        // ...followed by near-silence, still inside the same window.
        let suppressed = meter.update(&vec![0.0; 10]);
        assert!(suppressed.is_none());
    }
}
