//! Tumbling windows over event time
//!
//! Every record is assigned to exactly one fixed-size, epoch-aligned window:
//!
//! ```text
//! Time:     0----5----10---15---20---25---30
//! Windows:  [----][----][----][----][----]
//! ```
//!
//! A [`WindowAggregator`] keeps accumulators per (window, group key) and
//! emits a window when the watermark passes its end. See
//! [`crate::watermark`] for how the watermark trails event time.

mod aggregator;
mod assigner;
mod spec;
mod types;

pub use aggregator::{WindowAggregator, WindowBatch};
pub use assigner::TumblingWindowAssigner;
pub use spec::{WindowSpec, MAX_ROUND_DIGITS};
pub use types::{GroupKey, WindowBounds};
