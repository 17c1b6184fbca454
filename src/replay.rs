//! Time-driven playback of recorded logs into the view model.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::domain::{parse_log, LogEntry, DEVICE_SLOTS};
use crate::error::Result;
use crate::view_model::MeterViewModel;

/// Playback frame pacing, roughly display refresh rate.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// One sampled playback frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackFrame {
    pub values: Vec<Option<f64>>,
    /// Set once elapsed time has passed the final entry; playback freezes at
    /// the last values and then stops.
    pub finished: bool,
}

/// Sample the entry sequence at an elapsed playback time (absolute, on the
/// same clock as the entry timestamps).
///
/// Locates the bracketing pair around `elapsed` and linearly interpolates per
/// slot. When exactly one side is null the non-null side is used as-is (no
/// fade); when both are null the slot stays null. Elapsed time past the final
/// entry freezes output at the last entry's values.
pub fn sample_entries(entries: &[LogEntry], elapsed_ms: f64) -> Option<PlaybackFrame> {
    let last = entries.last()?;
    if elapsed_ms >= last.timestamp as f64 {
        return Some(PlaybackFrame {
            values: last.normalized_values.clone(),
            finished: true,
        });
    }

    let mut prev = entries.first()?;
    let mut next = last;
    for entry in entries {
        if entry.timestamp as f64 <= elapsed_ms {
            prev = entry;
        } else {
            next = entry;
            break;
        }
    }

    if std::ptr::eq(prev, next) || next.timestamp == prev.timestamp {
        return Some(PlaybackFrame {
            values: prev.normalized_values.clone(),
            finished: false,
        });
    }

    let span = (next.timestamp - prev.timestamp) as f64;
    let t = ((elapsed_ms - prev.timestamp as f64) / span).clamp(0.0, 1.0);
    let values = (0..DEVICE_SLOTS)
        .map(|idx| {
            let a = prev.normalized_values.get(idx).copied().flatten();
            let b = next.normalized_values.get(idx).copied().flatten();
            match (a, b) {
                (Some(a), Some(b)) => Some(a + (b - a) * t),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            }
        })
        .collect();
    Some(PlaybackFrame {
        values,
        finished: false,
    })
}

/// Loads a recorded log and plays it back into a view model, substituting
/// itself for the live transports. Playback writes values with smoothing
/// disabled; this engine supplies its own interpolation.
pub struct ReplayEngine {
    vm: MeterViewModel,
    entries: Vec<LogEntry>,
    task: Option<JoinHandle<()>>,
}

impl ReplayEngine {
    pub fn new(vm: MeterViewModel) -> Self {
        Self {
            vm,
            entries: Vec::new(),
            task: None,
        }
    }

    /// Load log text in any accepted shape. Returns the frame count.
    pub fn load(&mut self, text: &str) -> Result<usize> {
        self.entries = parse_log(text)?;
        info!(frames = self.entries.len(), "replay log loaded");
        Ok(self.entries.len())
    }

    pub fn frame_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_playing(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start playback from the first entry. Any live interpolation the view
    /// model had in flight is cancelled first; replay owns these slots now.
    pub fn play(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.halt();
        self.vm.cancel_interpolations();

        let vm = self.vm.clone();
        let entries = self.entries.clone();
        let first_ts = entries[0].timestamp as f64;
        self.task = Some(tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval(FRAME_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let elapsed = started.elapsed().as_secs_f64() * 1000.0 + first_ts;
                let Some(frame) = sample_entries(&entries, elapsed) else {
                    break;
                };
                vm.update_values_raw(&frame.values);
                if frame.finished {
                    debug!("replay reached end of log");
                    break;
                }
            }
        }));
    }

    /// Halt the frame loop and reset all slots to null. Distinct from the
    /// natural end of the log, which freezes at the last frame. Idempotent.
    pub fn stop(&mut self) {
        self.halt();
        self.vm.update_values_raw(&[None; DEVICE_SLOTS]);
    }

    fn halt(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_device_log() -> Vec<LogEntry> {
        vec![
            LogEntry::new(0, &[Some(10.0), None]),
            LogEntry::new(1000, &[Some(90.0), Some(50.0)]),
        ]
    }

    #[test]
    fn midpoint_interpolates_with_null_policy() {
        let entries = two_device_log();
        let frame = sample_entries(&entries, 500.0).unwrap();
        assert!(!frame.finished);
        assert!((frame.values[0].unwrap() - 50.0).abs() < 1e-9);
        // Prev side is null: the next value is used as-is, no fade.
        assert_eq!(frame.values[1], Some(50.0));
        assert_eq!(frame.values[2], None);
    }

    #[test]
    fn past_the_end_freezes_and_finishes() {
        let entries = two_device_log();
        let frame = sample_entries(&entries, 1500.0).unwrap();
        assert!(frame.finished);
        assert_eq!(frame.values[0], Some(90.0));
        assert_eq!(frame.values[1], Some(50.0));
    }

    #[test]
    fn fraction_is_clamped_and_exact_at_entry_times() {
        let entries = two_device_log();
        let frame = sample_entries(&entries, 0.0).unwrap();
        assert_eq!(frame.values[0], Some(10.0));
        let frame = sample_entries(&entries, 999.999).unwrap();
        assert!(frame.values[0].unwrap() < 90.0);
    }

    #[test]
    fn both_null_stays_null() {
        let entries = vec![
            LogEntry::new(0, &[None, Some(20.0)]),
            LogEntry::new(100, &[None, Some(40.0)]),
        ];
        let frame = sample_entries(&entries, 50.0).unwrap();
        assert_eq!(frame.values[0], None);
    }

    #[test]
    fn empty_log_yields_nothing() {
        assert_eq!(sample_entries(&[], 0.0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_drives_view_model_and_ends() {
        let vm = MeterViewModel::new();
        let mut engine = ReplayEngine::new(vm.clone());
        engine
            .load(r#"[{"id":1,"value":10,"ts":0},{"id":1,"value":90,"ts":400}]"#)
            .unwrap();
        engine.play();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let mid = vm.snapshot().values[0].unwrap();
        assert!(mid > 10.0 && mid < 90.0, "mid-playback value was {mid}");

        tokio::time::sleep(Duration::from_millis(400)).await;
        // Natural end freezes at the last entry's values.
        assert_eq!(vm.snapshot().values[0], Some(90.0));
        assert!(!engine.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_all_slots_to_null() {
        let vm = MeterViewModel::new();
        let mut engine = ReplayEngine::new(vm.clone());
        engine
            .load(r#"[{"id":1,"value":10,"ts":0},{"id":1,"value":90,"ts":5000}]"#)
            .unwrap();
        engine.play();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(vm.snapshot().values[0].is_some());

        engine.stop();
        assert_eq!(vm.snapshot().values, vec![None; DEVICE_SLOTS]);
        // Stopping again is safe.
        engine.stop();
    }
}
