//! Window assignment

use super::types::WindowBounds;

/// Tumbling window assigner
///
/// Creates fixed-size, non-overlapping windows aligned to the epoch. Each
/// event is assigned to exactly one window based on its timestamp.
///
/// # Example
/// ```text
/// Window size: 5 seconds
/// Event at timestamp 7 -> Window [5, 10)
/// Event at timestamp -3 -> Window [-5, 0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingWindowAssigner {
    size_ms: i64,
}

impl TumblingWindowAssigner {
    /// `size_ms` must be positive; [`WindowSpec`](super::WindowSpec)
    /// validation guarantees it
    pub fn new(size_ms: i64) -> Self {
        Self {
            size_ms: size_ms.max(1),
        }
    }

    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    /// Window start for a timestamp, using floor division so negative
    /// timestamps land in the window below zero
    pub fn window_start(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.size_ms) * self.size_ms
    }

    pub fn assign(&self, timestamp: i64) -> WindowBounds {
        let start = self.window_start(timestamp);
        WindowBounds::new(start, start.saturating_add(self.size_ms))
    }
}
