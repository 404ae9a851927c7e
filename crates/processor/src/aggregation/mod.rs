//! Aggregation module for computing window aggregates
//!
//! Every aggregator supports:
//!
//! - **Incremental updates**: Feed values one at a time
//! - **Accumulator merging**: Combine the partial state of a micro-batch with
//!   the open window state
//! - **State serialization**: Persist and restore aggregator state
//!
//! # Available Aggregators
//!
//! - [`CountAggregator`]: Count rows or non-null values
//! - [`SumAggregator`]: Sum numeric values, exact for integers
//! - [`AverageAggregator`]: Compute the mean
//! - [`MinAggregator`] / [`MaxAggregator`]: Track the extreme values
//! - [`FirstValueAggregator`]: Keep the first value seen
//! - [`ApproxDistinctAggregator`]: Estimate distinct values with a
//!   [`HyperLogLog`] sketch
//!
//! [`AggregateSlot`] wraps them behind one enum so a window group can hold a
//! heterogeneous list of aggregates.
//!
//! # Example
//!
//! ```rust
//! use medallion_processor::aggregation::{Aggregator, AverageAggregator};
//!
//! let mut agg1 = AverageAggregator::new();
//! agg1.update_batch(&[1.0, 2.0, 3.0]).unwrap();
//!
//! let mut agg2 = AverageAggregator::new();
//! agg2.update_batch(&[4.0, 5.0, 6.0]).unwrap();
//!
//! agg1.merge(agg2.accumulator()).unwrap();
//! assert_eq!(agg1.finalize().unwrap(), 3.5);
//! ```

mod avg;
mod count;
mod distinct;
mod first;
mod minmax;
mod slot;
mod sum;
mod trait_;

pub use avg::{AverageAccumulator, AverageAggregator};
pub use count::{CountAccumulator, CountAggregator};
pub use distinct::{
    ApproxDistinctAccumulator, ApproxDistinctAggregator, HyperLogLog, DEFAULT_PRECISION,
    MAX_PRECISION, MIN_PRECISION,
};
pub use first::{FirstValueAccumulator, FirstValueAggregator};
pub use minmax::{ExtremumAccumulator, MaxAggregator, MinAggregator};
pub use slot::{AccumulatorSnapshot, AggregateSlot};
pub use sum::{SumAccumulator, SumAggregator};
pub use trait_::Aggregator;
