//! Temperature readings and their worst-case reduction.

use std::ops::RangeInclusive;

use async_trait::async_trait;
use tokio::time::Instant;

/// Plausible range of a hwmon temperature in millidegrees Celsius.
///
/// Anything outside is an absent or glitching sensor, never a real 0 °C.
pub const VALID_MILLIDEGREES: RangeInclusive<u32> = 5_000..=110_000;

/// One raw temperature sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub source_id: String,
    pub millidegrees: u32,
    pub taken_at: Instant,
}

impl Reading {
    pub fn new(source_id: impl Into<String>, millidegrees: u32) -> Self {
        Self {
            source_id: source_id.into(),
            millidegrees,
            taken_at: Instant::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        VALID_MILLIDEGREES.contains(&self.millidegrees)
    }
}

/// Source of raw temperature samples for one control cycle.
#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    /// Every sample that could be read and parsed this cycle. Out-of-range
    /// values are kept; filtering is the aggregator's job.
    async fn read_all(&self) -> Vec<Reading>;
}

/// Parses a hwmon temperature attribute as a non-negative integer.
pub fn parse_millidegrees(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

/// Hottest valid reading, or `None` when no sensor produced a usable value.
pub fn aggregate(readings: &[Reading]) -> Option<&Reading> {
    readings
        .iter()
        .filter(|r| r.is_valid())
        .max_by_key(|r| r.millidegrees)
}
