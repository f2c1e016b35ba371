//! Timing utilities
//!
//! Echo pushes carry their send time as Unix microseconds so the receiving
//! side can compute round-trip latency without any shared clock state.

use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix timestamp in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self(micros)
    }

    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Saturating difference, zero when `earlier` is in the future
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Milliseconds elapsed between `sent` and `self`, fractional.
    ///
    /// Negative values are possible when sender and receiver clocks disagree;
    /// they are reported as-is rather than hidden.
    pub fn millis_since(&self, sent: &Timestamp) -> f64 {
        (self.0 as f64 - sent.0 as f64) / 1000.0
    }

    /// Read a timestamp out of an invocation argument
    pub fn from_value(value: &Value) -> Option<Self> {
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Self)
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(micros: u64) -> Self {
        Self(micros)
    }
}
