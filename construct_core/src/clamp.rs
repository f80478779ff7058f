//! Bounds applied to every outgoing control action.

use serde::Deserialize;

/// A `[min, max]` range each force component is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ClampRange {
    pub min: f64,
    pub max: f64,
}

impl Default for ClampRange {
    fn default() -> Self {
        Self {
            min: -20.0,
            max: 20.0,
        }
    }
}

impl ClampRange {
    /// Creates a range. If `min > max`, `min` wins for every input.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamps one component. Values already in range pass through unchanged.
    ///
    /// Unlike `f64::clamp` this never panics on an inverted range.
    pub fn apply(&self, value: f64) -> f64 {
        let mut v = value;
        if v > self.max {
            v = self.max;
        }
        if v < self.min {
            v = self.min;
        }
        v
    }

    /// Returns true if `value` lies inside the range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}
