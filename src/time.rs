//! Simulation time.
//!
//! Time is owned by the external scheduling collaborator; this crate only
//! ever reads it. The newtype keeps plan times from being confused with
//! amounts and other raw floats.

use serde::{Deserialize, Serialize};

/// A point in simulation time.
///
/// Times are non-decreasing over a run; the scheduling collaborator
/// guarantees callbacks fire in non-decreasing time order.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(f64);

impl Time {
    /// The start of a run.
    pub const ZERO: Self = Self(0.0);

    /// Wraps a raw time value.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Returns the raw time value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for Time {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl From<Time> for f64 {
    fn from(time: Time) -> Self {
        time.0
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
