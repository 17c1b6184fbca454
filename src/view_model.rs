//! The core state machine: owns device state and settings, applies incoming
//! payloads, smooths value transitions, and notifies listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

use crate::domain::{DeviceConfig, DeviceState, ValueRange, DEVICE_SLOTS};
use crate::interpolate::{Interpolation, DEFAULT_DURATION, MIN_DELTA};
use crate::payload::StatePayload;

/// Frame pacing for the smoothing loop, roughly display refresh rate.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// An immutable projection of the view model state handed to listeners,
/// renderers and sync channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSnapshot {
    pub values: Vec<Option<f64>>,
    pub actual_values: Vec<Option<f64>>,
    pub names: Vec<String>,
    pub icons: Vec<Option<String>>,
    pub value_range: ValueRange,
}

impl MeterSnapshot {
    /// Convert to a wire payload, stamping the current wall-clock time.
    pub fn to_payload(&self) -> StatePayload {
        StatePayload {
            values: Some(self.values.clone()),
            names: Some(self.names.clone()),
            icons: Some(self.icons.clone()),
            value_range: Some(self.value_range.clone()),
            ts: Some(chrono::Utc::now().timestamp_millis()),
            ..Default::default()
        }
    }
}

/// Handle for removing a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&MeterSnapshot) + Send + Sync>;

struct VmState {
    range: ValueRange,
    configs: Vec<DeviceConfig>,
    states: Vec<DeviceState>,
    interpolations: Vec<Interpolation>,
    interpolation_duration: Duration,
    frame_task: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<VmState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

/// The meter view model. Cheap to clone; all clones share state.
///
/// Mutations and listener notifications are serialized: a mutating call
/// produces at most one notification, and multi-field payloads coalesce into
/// a single notification. The smoothing frame loop requires a tokio runtime.
#[derive(Clone)]
pub struct MeterViewModel {
    shared: Arc<Shared>,
}

impl Default for MeterViewModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterViewModel {
    pub fn new() -> Self {
        Self::with_settings(
            ValueRange::default(),
            (1..=DEVICE_SLOTS as u8).map(DeviceConfig::new).collect(),
        )
    }

    /// Create a view model seeded from persisted settings.
    pub fn with_settings(range: ValueRange, mut configs: Vec<DeviceConfig>) -> Self {
        configs.truncate(DEVICE_SLOTS);
        for id in configs.len() as u8 + 1..=DEVICE_SLOTS as u8 {
            configs.push(DeviceConfig::new(id));
        }
        let states = (1..=DEVICE_SLOTS as u8).map(DeviceState::empty).collect();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(VmState {
                    range,
                    configs,
                    states,
                    interpolations: Vec::new(),
                    interpolation_duration: DEFAULT_DURATION,
                    frame_task: None,
                }),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a change listener. A listener that panics is isolated and
    /// does not prevent other listeners from running.
    pub fn on_change(
        &self,
        listener: impl Fn(&MeterSnapshot) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.shared
            .listeners
            .lock()
            .unwrap()
            .retain(|(lid, _)| *lid != id.0);
    }

    /// Current state as plain data.
    pub fn snapshot(&self) -> MeterSnapshot {
        build_snapshot(&self.shared.state.lock().unwrap())
    }

    /// Replace the value range and re-derive actual values for live state,
    /// so existing readings display in the new unit without a fresh sample.
    pub fn set_value_range(&self, range: ValueRange) {
        let snapshot = {
            let mut st = self.shared.state.lock().unwrap();
            set_range_locked(&mut st, range);
            build_snapshot(&st)
        };
        self.notify(&snapshot);
    }

    /// Set the lower bound; pushes the upper bound up if they would collide.
    pub fn set_min_value(&self, min: f64) {
        if !min.is_finite() {
            return;
        }
        let range = self.shared.state.lock().unwrap().range.with_min(min);
        self.set_value_range(range);
    }

    /// Set the upper bound; pushes the lower bound down if they would collide.
    pub fn set_max_value(&self, max: f64) {
        if !max.is_finite() {
            return;
        }
        let range = self.shared.state.lock().unwrap().range.with_max(max);
        self.set_value_range(range);
    }

    pub fn set_unit(&self, unit: &str) {
        let range = self.shared.state.lock().unwrap().range.with_unit(unit);
        self.set_value_range(range);
    }

    pub fn update_name(&self, index: usize, name: &str) {
        let snapshot = {
            let mut st = self.shared.state.lock().unwrap();
            if !set_name_locked(&mut st, index, name) {
                return;
            }
            build_snapshot(&st)
        };
        self.notify(&snapshot);
    }

    pub fn update_icon(&self, index: usize, icon_url: Option<String>) {
        let snapshot = {
            let mut st = self.shared.state.lock().unwrap();
            if !set_icon_locked(&mut st, index, icon_url) {
                return;
            }
            build_snapshot(&st)
        };
        self.notify(&snapshot);
    }

    /// Apply a full set of normalized values with smoothing enabled.
    pub fn update_values(&self, values: &[Option<f64>]) {
        self.apply_values(values, true);
    }

    /// Apply values immediately, bypassing smoothing. Used by replay, which
    /// supplies its own interpolation.
    pub fn update_values_raw(&self, values: &[Option<f64>]) {
        self.apply_values(values, false);
    }

    fn apply_values(&self, values: &[Option<f64>], smooth: bool) {
        let snapshot = {
            let mut st = self.shared.state.lock().unwrap();
            let mut changed = false;
            for index in 0..DEVICE_SLOTS {
                let value = values.get(index).copied().flatten();
                changed |= set_value_locked(&mut st, index, value, smooth);
            }
            if st.interpolations.is_empty() {
                // Whole-array updates always refresh derived state.
                changed = true;
            }
            self.ensure_frame_loop(&mut st);
            if !changed {
                return;
            }
            build_snapshot(&st)
        };
        self.notify(&snapshot);
    }

    /// Set a single device value. `None` disconnects the slot and discards
    /// any in-flight transition immediately; there is no fade to null.
    pub fn set_value(&self, index: usize, value: Option<f64>, smooth: bool) {
        if index >= DEVICE_SLOTS {
            return;
        }
        let snapshot = {
            let mut st = self.shared.state.lock().unwrap();
            let changed = set_value_locked(&mut st, index, value, smooth);
            self.ensure_frame_loop(&mut st);
            if !changed {
                return;
            }
            build_snapshot(&st)
        };
        self.notify(&snapshot);
    }

    /// Apply any subset of values, names, icons, and range fields. Absent
    /// fields leave existing state untouched; all field updates coalesce
    /// into a single notification.
    pub fn apply_state_payload(&self, payload: &StatePayload) {
        let snapshot = {
            let mut st = self.shared.state.lock().unwrap();
            let mut changed = false;

            if let Some(values) = &payload.values {
                for index in 0..DEVICE_SLOTS {
                    let value = values.get(index).copied().flatten();
                    changed |= set_value_locked(&mut st, index, value, true);
                }
                changed |= st.interpolations.is_empty();
            }
            if let Some(names) = &payload.names {
                for (index, name) in names.iter().take(DEVICE_SLOTS).enumerate() {
                    changed |= set_name_locked(&mut st, index, name);
                }
            }
            if let Some(icons) = &payload.icons {
                for (index, icon) in icons.iter().take(DEVICE_SLOTS).enumerate() {
                    changed |= set_icon_locked(&mut st, index, icon.clone());
                }
            }
            if let Some(range) = &payload.value_range {
                let range =
                    ValueRange::new(range.min, range.max, range.unit.clone());
                set_range_locked(&mut st, range);
                changed = true;
            } else if payload.min_value.is_some()
                || payload.max_value.is_some()
                || payload.unit.is_some()
            {
                let range = st.range.with_changes(
                    payload.min_value,
                    payload.max_value,
                    payload.unit.as_deref(),
                );
                set_range_locked(&mut st, range);
                changed = true;
            }

            self.ensure_frame_loop(&mut st);
            if !changed {
                return;
            }
            build_snapshot(&st)
        };
        self.notify(&snapshot);
    }

    /// Discard all in-flight transitions, snapping each to its target.
    /// The frame loop then terminates on its own.
    pub fn cancel_interpolations(&self) {
        let snapshot = {
            let mut st = self.shared.state.lock().unwrap();
            if st.interpolations.is_empty() {
                return;
            }
            let pending: Vec<_> = st.interpolations.drain(..).collect();
            for interp in pending {
                let next = st.states[interp.index]
                    .update_from_normalized(Some(interp.target_value), &st.range);
                st.states[interp.index] = next;
            }
            build_snapshot(&st)
        };
        self.notify(&snapshot);
    }

    /// Bound the smoothing duration to `[0, 1000]` ms.
    pub fn set_interpolation_duration(&self, duration: Duration) {
        let mut st = self.shared.state.lock().unwrap();
        st.interpolation_duration = duration.min(Duration::from_millis(1000));
    }

    /// Spawn the frame loop if transitions are pending and no loop is live.
    /// The loop stops scheduling frames once no transitions remain and is
    /// restarted here on demand.
    fn ensure_frame_loop(&self, st: &mut VmState) {
        if st.interpolations.is_empty() {
            return;
        }
        if st
            .frame_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }
        let vm = self.clone();
        st.frame_task = Some(tokio::spawn(async move {
            let mut ticker = interval(FRAME_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !vm.step_frame() {
                    break;
                }
            }
            debug!("interpolation frame loop idle");
        }));
    }

    /// Advance all transitions one frame. Returns false once none remain.
    fn step_frame(&self) -> bool {
        let now = Instant::now();
        let (snapshot, remaining) = {
            let mut st = self.shared.state.lock().unwrap();
            if st.interpolations.is_empty() {
                return false;
            }
            let active: Vec<_> = st.interpolations.clone();
            for interp in &active {
                let value = interp.sample(now);
                let next =
                    st.states[interp.index].update_from_normalized(Some(value), &st.range);
                st.states[interp.index] = next;
            }
            st.interpolations.retain(|interp| !interp.finished(now));
            let remaining = !st.interpolations.is_empty();
            (build_snapshot(&st), remaining)
        };
        self.notify(&snapshot);
        remaining
    }

    fn notify(&self, snapshot: &MeterSnapshot) {
        let listeners: Vec<Listener> = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            // A failing listener must not take down the others.
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                debug!("change listener panicked; continuing");
            }
        }
    }
}

fn build_snapshot(st: &VmState) -> MeterSnapshot {
    MeterSnapshot {
        values: st.states.iter().map(|s| s.normalized).collect(),
        actual_values: st.states.iter().map(|s| s.actual).collect(),
        names: st.configs.iter().map(|c| c.name.clone()).collect(),
        icons: st.configs.iter().map(|c| c.icon_url.clone()).collect(),
        value_range: st.range.clone(),
    }
}

fn set_range_locked(st: &mut VmState, range: ValueRange) {
    st.range = range;
    for state in &mut st.states {
        *state = state.update_from_normalized(state.normalized, &st.range);
    }
}

fn set_name_locked(st: &mut VmState, index: usize, name: &str) -> bool {
    if index >= DEVICE_SLOTS {
        return false;
    }
    st.configs[index] = st.configs[index].with_name(name);
    true
}

fn set_icon_locked(st: &mut VmState, index: usize, icon_url: Option<String>) -> bool {
    if index >= DEVICE_SLOTS {
        return false;
    }
    st.configs[index] = st.configs[index].with_icon(icon_url);
    true
}

/// Apply one slot value. Returns true when observable state changed now;
/// a started transition defers its changes to the frame loop.
fn set_value_locked(st: &mut VmState, index: usize, value: Option<f64>, smooth: bool) -> bool {
    if index >= DEVICE_SLOTS {
        return false;
    }
    let Some(value) = value.filter(|v| !v.is_nan()) else {
        // Disconnect: drop any in-flight transition, no fade to null.
        st.interpolations.retain(|interp| interp.index != index);
        let changed = st.states[index].normalized.is_some();
        st.states[index] = st.states[index].update_from_normalized(None, &st.range);
        return changed;
    };

    let target = value.clamp(0.0, 100.0);
    let current = st.states[index].normalized;

    if smooth {
        if let Some(current) = current {
            if (current - target).abs() > MIN_DELTA {
                // Replace any in-flight transition, restarting from the
                // current interpolated value.
                st.interpolations.retain(|interp| interp.index != index);
                st.interpolations.push(Interpolation::new(
                    index,
                    current,
                    target,
                    st.interpolation_duration,
                ));
                return false;
            }
        }
    }

    st.interpolations.retain(|interp| interp.index != index);
    st.states[index] = st.states[index].update_from_normalized(Some(target), &st.range);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn values(slot0: Option<f64>) -> Vec<Option<f64>> {
        let mut v = vec![None; DEVICE_SLOTS];
        v[0] = slot0;
        v
    }

    #[tokio::test]
    async fn payload_coalesces_into_one_notification() {
        let vm = MeterViewModel::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        vm.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        vm.apply_state_payload(&StatePayload {
            values: Some(values(Some(42.0))),
            names: Some(vec!["a".into(), "b".into()]),
            min_value: Some(10.0),
            max_value: Some(90.0),
            unit: Some("psi".into()),
            ..Default::default()
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let snap = vm.snapshot();
        assert_eq!(snap.values[0], Some(42.0));
        assert_eq!(snap.names[0], "a");
        assert_eq!(snap.value_range.unit, "psi");
    }

    #[tokio::test]
    async fn absent_payload_fields_leave_state_untouched() {
        let vm = MeterViewModel::new();
        vm.update_name(1, "kept");
        vm.update_values_raw(&values(Some(30.0)));

        vm.apply_state_payload(&StatePayload {
            unit: Some("deg".into()),
            ..Default::default()
        });

        let snap = vm.snapshot();
        assert_eq!(snap.names[1], "kept");
        assert_eq!(snap.values[0], Some(30.0));
        assert_eq!(snap.value_range.unit, "deg");
    }

    #[tokio::test]
    async fn range_change_recomputes_actual_for_live_state() {
        let vm = MeterViewModel::new();
        vm.update_values_raw(&values(Some(50.0)));
        assert_eq!(vm.snapshot().actual_values[0], Some(50.0));

        vm.set_value_range(ValueRange::new(0.0, 200.0, "deg"));
        assert_eq!(vm.snapshot().actual_values[0], Some(100.0));
    }

    #[tokio::test]
    async fn max_edit_below_min_keeps_bounds_ordered() {
        let vm = MeterViewModel::new();
        vm.set_min_value(50.0);
        vm.set_max_value(40.0);
        let range = vm.snapshot().value_range;
        assert!(range.max > range.min);
        assert_eq!(range.max, 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn smoothed_update_converges_to_exact_target() {
        let vm = MeterViewModel::new();
        vm.set_value(0, Some(20.0), false);
        vm.set_value(0, Some(80.0), true);

        // Target is not applied immediately.
        assert_eq!(vm.snapshot().values[0], Some(20.0));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let mid = vm.snapshot().values[0].unwrap();
        assert!(mid > 20.0 && mid < 80.0, "mid-flight value was {mid}");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(vm.snapshot().values[0], Some(80.0));

        // No further change after convergence.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(vm.snapshot().values[0], Some(80.0));
    }

    #[tokio::test(start_paused = true)]
    async fn null_cancels_in_flight_interpolation() {
        let vm = MeterViewModel::new();
        vm.set_value(0, Some(20.0), false);
        vm.set_value(0, Some(80.0), true);
        tokio::time::sleep(Duration::from_millis(50)).await;

        vm.set_value(0, None, true);
        assert_eq!(vm.snapshot().values[0], None);

        // The discarded transition must not resume or snap later.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(vm.snapshot().values[0], None);
    }

    #[tokio::test(start_paused = true)]
    async fn retarget_restarts_from_current_interpolated_value() {
        let vm = MeterViewModel::new();
        vm.set_value(0, Some(0.0), false);
        vm.set_value(0, Some(100.0), true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mid = vm.snapshot().values[0].unwrap();
        assert!(mid > 10.0 && mid < 90.0);

        vm.set_value(0, Some(0.0), true);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(vm.snapshot().values[0], Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn frame_loop_is_restartable_after_idling() {
        let vm = MeterViewModel::new();
        vm.set_value(0, Some(10.0), false);
        vm.set_value(0, Some(90.0), true);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(vm.snapshot().values[0], Some(90.0));

        vm.set_value(0, Some(10.0), true);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(vm.snapshot().values[0], Some(10.0));
    }

    #[tokio::test]
    async fn tiny_deltas_apply_immediately() {
        let vm = MeterViewModel::new();
        vm.set_value(0, Some(50.0), false);
        vm.set_value(0, Some(50.005), true);
        assert_eq!(vm.snapshot().values[0], Some(50.005));
    }

    #[tokio::test]
    async fn panicking_listener_does_not_break_others() {
        let vm = MeterViewModel::new();
        vm.on_change(|_| panic!("bad listener"));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        vm.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        vm.update_values_raw(&values(Some(5.0)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(vm.snapshot().values[0], Some(5.0));
    }

    #[tokio::test]
    async fn removed_listener_stops_receiving() {
        let vm = MeterViewModel::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let id = vm.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        vm.update_values_raw(&values(Some(1.0)));
        vm.remove_listener(id);
        vm.update_values_raw(&values(Some(2.0)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
