//! Synthetic session log generation for testing playback.
//!
//! Each simulated device moves independently: it idles, then picks a random
//! target at least 10 points away and approaches it exponentially over a
//! random 2-6 second window. Movements overlap freely across devices.

use rand::Rng;

use crate::domain::LogRecord;

/// Time constant for the exponential approach, in seconds.
const TAU: f64 = 0.5;
const MIN_TARGET_DISTANCE: f64 = 10.0;
const MIN_IDLE_MS: f64 = 1000.0;

/// Generation parameters.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Total simulated duration in milliseconds.
    pub duration_ms: u64,
    /// Sampling interval in milliseconds.
    pub interval_ms: u64,
    /// Number of simulated devices, ids `1..=devices`.
    pub devices: u8,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            duration_ms: 30_000,
            interval_ms: 200,
            devices: 4,
        }
    }
}

struct SimulatedDevice {
    id: u8,
    current: f64,
    start: f64,
    target: f64,
    movement_start_ms: f64,
    movement_duration_ms: f64,
    moving: bool,
}

impl SimulatedDevice {
    fn new(id: u8, rng: &mut impl Rng) -> Self {
        let initial = rng.gen_range(0..=100) as f64;
        Self {
            id,
            current: initial,
            start: initial,
            target: initial,
            // Random head start so devices do not all begin moving together.
            movement_start_ms: -rng.gen_range(0.0..3000.0),
            movement_duration_ms: 0.0,
            moving: false,
        }
    }

    fn value_at(&mut self, now_ms: f64, settle: bool) -> f64 {
        if !self.moving {
            return self.current;
        }
        let elapsed_s = (now_ms - self.movement_start_ms) / 1000.0;
        if elapsed_s >= self.movement_duration_ms / 1000.0 {
            if settle {
                self.current = self.target;
                self.moving = false;
            }
            return self.target;
        }
        let diff = self.target - self.start;
        let value = self.target - diff * (-elapsed_s / TAU).exp();
        value.clamp(0.0, 100.0).round()
    }

    fn should_start_movement(&self, now_ms: f64, rng: &mut impl Rng) -> bool {
        if self.moving {
            return false;
        }
        let idle = now_ms - (self.movement_start_ms + self.movement_duration_ms);
        if idle < MIN_IDLE_MS {
            return false;
        }
        // Likelihood grows with idle time, capped at 30% per sample.
        let chance = ((idle - MIN_IDLE_MS) / 5000.0).min(0.3);
        rng.gen_bool(chance.max(0.0))
    }

    fn start_movement(&mut self, now_ms: f64, rng: &mut impl Rng) {
        if self.moving {
            self.current = self.value_at(now_ms, false);
        }
        let mut target;
        loop {
            target = rng.gen_range(0..=100) as f64;
            if (target - self.current).abs() >= MIN_TARGET_DISTANCE {
                break;
            }
        }
        self.start = self.current;
        self.target = target;
        self.movement_start_ms = now_ms;
        self.movement_duration_ms = rng.gen_range(2000.0..6000.0);
        self.moving = true;
    }
}

/// Generate a flat record log, sorted by timestamp then device id.
pub fn generate_log(config: &GeneratorConfig, rng: &mut impl Rng) -> Vec<LogRecord> {
    let mut devices: Vec<SimulatedDevice> = (1..=config.devices)
        .map(|id| SimulatedDevice::new(id, rng))
        .collect();

    let mut records = Vec::new();
    let mut t = 0u64;
    while t <= config.duration_ms {
        for device in &mut devices {
            let now = t as f64;
            if device.should_start_movement(now, rng) {
                device.start_movement(now, rng);
            }
            records.push(LogRecord {
                id: device.id,
                value: device.value_at(now, true),
                ts: t,
            });
        }
        t += config.interval_ms.max(1);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    #[test]
    fn covers_every_device_at_every_sample() {
        let config = GeneratorConfig {
            duration_ms: 2000,
            interval_ms: 200,
            devices: 3,
        };
        let records = generate_log(&config, &mut rng());
        // 11 sample points times 3 devices.
        assert_eq!(records.len(), 33);
        assert_eq!(records[0].ts, 0);
        assert_eq!(records.last().unwrap().ts, 2000);
    }

    #[test]
    fn records_are_ordered_and_in_range() {
        let records = generate_log(&GeneratorConfig::default(), &mut rng());
        for pair in records.windows(2) {
            assert!(
                pair[0].ts < pair[1].ts || (pair[0].ts == pair[1].ts && pair[0].id < pair[1].id)
            );
        }
        assert!(records.iter().all(|r| (0.0..=100.0).contains(&r.value)));
    }

    #[test]
    fn generated_log_parses_for_playback() {
        let records = generate_log(&GeneratorConfig::default(), &mut rng());
        let text = serde_json::to_string(&records).unwrap();
        let entries = crate::domain::parse_log(&text).unwrap();
        assert!(!entries.is_empty());
        assert_eq!(entries[0].timestamp, 0);
    }
}
