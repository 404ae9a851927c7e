//! Event-time watermarks
//!
//! A watermark is a timestamp threshold: once it passes the end of a window,
//! that window is complete and any later record for it is dropped as late.
//! The watermark of a windowed node trails the maximum observed event time by
//! the configured allowed lateness and never moves backwards.
//!
//! # Example
//!
//! ```rust
//! use medallion_processor::watermark::{BoundedLatenessWatermark, Watermark};
//!
//! let mut generator = BoundedLatenessWatermark::new(60_000);
//! generator.observe(300_000);
//! generator.observe(120_000);
//!
//! assert_eq!(generator.advance(), Some(Watermark::new(240_000)));
//! // Nothing newer was observed, so the watermark stays put
//! assert_eq!(generator.advance(), None);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a watermark timestamp
///
/// All events with timestamps at or below the watermark are considered
/// observed; windows ending at or before it are closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    /// The watermark timestamp in milliseconds since epoch
    pub timestamp: i64,
}

impl Watermark {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    /// The initial watermark, before any event was observed
    pub fn min() -> Self {
        Self { timestamp: i64::MIN }
    }

    pub fn is_min(&self) -> bool {
        self.timestamp == i64::MIN
    }

    /// Checks if this watermark is before the given timestamp
    pub fn is_before(&self, timestamp: i64) -> bool {
        self.timestamp < timestamp
    }

    /// Whether a window ending at `end` (exclusive) is closed
    pub fn closes(&self, end: i64) -> bool {
        !self.is_min() && end <= self.timestamp
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if self.is_min() {
            return None;
        }
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::min()
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "Watermark({})", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            None => write!(f, "Watermark(-inf)"),
        }
    }
}

/// Watermark generator with a fixed allowed lateness
///
/// `watermark = max(watermark, max_event_time - allowed_lateness)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedLatenessWatermark {
    allowed_lateness_ms: i64,
    max_event_time: Option<i64>,
    current: Watermark,
}

impl BoundedLatenessWatermark {
    pub fn new(allowed_lateness_ms: u64) -> Self {
        Self {
            allowed_lateness_ms: i64::try_from(allowed_lateness_ms).unwrap_or(i64::MAX),
            max_event_time: None,
            current: Watermark::min(),
        }
    }

    /// Record an event time; the watermark itself only moves on [`advance`](Self::advance)
    pub fn observe(&mut self, timestamp: i64) {
        self.max_event_time = Some(self.max_event_time.map_or(timestamp, |m| m.max(timestamp)));
    }

    /// Move the watermark forward from the observed event times. Returns the
    /// new watermark if it advanced.
    pub fn advance(&mut self) -> Option<Watermark> {
        let candidate = Watermark::new(
            self.max_event_time?
                .saturating_sub(self.allowed_lateness_ms),
        );
        if candidate > self.current {
            self.current = candidate;
            Some(candidate)
        } else {
            None
        }
    }

    pub fn current(&self) -> Watermark {
        self.current
    }

    pub fn max_event_time(&self) -> Option<i64> {
        self.max_event_time
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_ordering() {
        assert!(Watermark::min() < Watermark::new(0));
        assert!(Watermark::new(10).is_before(11));
        assert!(!Watermark::new(10).is_before(10));
    }

    #[test]
    fn test_min_watermark_closes_nothing() {
        assert!(!Watermark::min().closes(i64::MIN));
        assert!(Watermark::new(300_000).closes(300_000));
        assert!(!Watermark::new(299_999).closes(300_000));
    }

    #[test]
    fn test_bounded_lateness_is_monotonic() {
        let mut generator = BoundedLatenessWatermark::new(1_000);
        assert_eq!(generator.advance(), None);

        generator.observe(5_000);
        assert_eq!(generator.advance(), Some(Watermark::new(4_000)));

        generator.observe(2_000);
        assert_eq!(generator.advance(), None);
        assert_eq!(generator.current(), Watermark::new(4_000));

        generator.observe(9_000);
        assert_eq!(generator.advance(), Some(Watermark::new(8_000)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Watermark::min().to_string(), "Watermark(-inf)");
        assert_eq!(
            Watermark::new(0).to_string(),
            "Watermark(1970-01-01 00:00:00.000)"
        );
    }
}
