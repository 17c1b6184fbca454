//! Conversion between actual-unit values and the normalized 0–100 scale.

use serde::{Deserialize, Serialize};

/// An actual-unit value range with a display unit.
///
/// Construction never fails: non-finite bounds fall back to the defaults and
/// `max` is pushed above `min` whenever the two would collide. Instances are
/// replaced wholesale on any settings change, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub unit: String,
}

impl Default for ValueRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 100.0,
            unit: "%".to_string(),
        }
    }
}

impl ValueRange {
    /// Create a range, falling back to `[0, 100] %` for invalid input and
    /// re-establishing a unit gap when `max <= min`.
    pub fn new(min: f64, max: f64, unit: impl Into<String>) -> Self {
        let safe_min = if min.is_finite() { min } else { 0.0 };
        let safe_max = if max.is_finite() { max } else { 100.0 };
        let unit = unit.into();
        Self {
            min: safe_min,
            max: if safe_max > safe_min {
                safe_max
            } else {
                safe_min + 1.0
            },
            unit: if unit.trim().is_empty() {
                "%".to_string()
            } else {
                unit
            },
        }
    }

    /// Convert an actual-unit value to a percentage in `[0, 100]`.
    /// NaN propagates as `None` ("no data"), never as 0.
    pub fn normalize(&self, value: f64) -> Option<f64> {
        if value.is_nan() {
            return None;
        }
        let clamped = self.clamp(value);
        let span = self.max - self.min;
        Some(((clamped - self.min) / span * 100.0).clamp(0.0, 100.0))
    }

    /// Convert a percentage back to an actual-unit value, clamping the
    /// percentage to `[0, 100]` first.
    pub fn denormalize(&self, percentage: f64) -> Option<f64> {
        if percentage.is_nan() {
            return None;
        }
        let clamped = percentage.clamp(0.0, 100.0);
        Some(self.min + clamped / 100.0 * (self.max - self.min))
    }

    /// Clamp an actual-unit value into the range.
    pub fn clamp(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    /// Replace any subset of fields, re-validating through the constructor.
    pub fn with_changes(
        &self,
        min: Option<f64>,
        max: Option<f64>,
        unit: Option<&str>,
    ) -> Self {
        Self::new(
            min.unwrap_or(self.min),
            max.unwrap_or(self.max),
            unit.unwrap_or(&self.unit),
        )
    }

    /// Set the lower bound; an edit that would collide pushes `max` up.
    pub fn with_min(&self, min: f64) -> Self {
        if !min.is_finite() {
            return self.clone();
        }
        let max = if min >= self.max { min + 1.0 } else { self.max };
        Self::new(min, max, self.unit.clone())
    }

    /// Set the upper bound; an edit that would collide pushes `min` down.
    pub fn with_max(&self, max: f64) -> Self {
        if !max.is_finite() {
            return self.clone();
        }
        let min = if max <= self.min { max - 1.0 } else { self.min };
        Self::new(min, max, self.unit.clone())
    }

    /// Set the display unit, keeping the bounds.
    pub fn with_unit(&self, unit: impl Into<String>) -> Self {
        Self::new(self.min, self.max, unit)
    }
}
