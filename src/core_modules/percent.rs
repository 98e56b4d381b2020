// THEORY:
// Every tunable number the engine consumes (sensitivity, thresholds, confidence,
// volume, intensity, quality) lives on the same 0..=100 scale. Instead of
// sprinkling clamps over every setter, the scale is a type: a `Percent` can only
// be built through `Percent::new`, which clamps out-of-range input and maps NaN to
// zero. Deserialization goes through the same constructor, so a hand-edited
// settings file cannot smuggle in a value of 250 either.

use serde::{Deserialize, Serialize};

/// Clamps a raw value into `[0, 100]`. NaN becomes `0`.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// A percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Percent(f64);

impl Percent {
    pub const ZERO: Percent = Percent(0.0);
    pub const HUNDRED: Percent = Percent(100.0);

    pub fn new(value: f64) -> Self {
        Self(clamp_percent(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// The percentage as a fraction in `[0, 1]`.
    pub fn fraction(self) -> f64 {
        self.0 / 100.0
    }
}

impl From<f64> for Percent {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Percent> for f64 {
    fn from(value: Percent) -> Self {
        value.0
    }
}

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}
