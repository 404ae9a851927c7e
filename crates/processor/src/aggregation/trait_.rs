use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Core trait for all aggregators
///
/// Aggregators fold values incrementally and expose their partial state as a
/// serializable accumulator. Two partial states of the same window can be
/// combined with [`Aggregator::merge`], which is how a micro-batch's partial
/// aggregates are folded into the open window state and how a window is
/// rebuilt from a checkpoint.
pub trait Aggregator: Send + Sync + Debug {
    /// The type of values this aggregator accepts
    type Input: Clone;

    /// The type of the final aggregation result
    type Output: Clone;

    /// The type of the internal accumulator state (must be serializable)
    type Accumulator: Clone + Serialize + DeserializeOwned;

    /// Create a new aggregator instance
    fn new() -> Self
    where
        Self: Sized;

    /// Rebuild an aggregator from a saved accumulator
    fn from_accumulator(acc: Self::Accumulator) -> anyhow::Result<Self>
    where
        Self: Sized,
    {
        let mut agg = Self::new();
        agg.merge(acc)?;
        Ok(agg)
    }

    /// Update the aggregator with a new value
    fn update(&mut self, value: Self::Input) -> anyhow::Result<()>;

    /// Update with multiple values at once
    fn update_batch(&mut self, values: &[Self::Input]) -> anyhow::Result<()> {
        for value in values {
            self.update(value.clone())?;
        }
        Ok(())
    }

    /// Compute the final aggregation result
    fn finalize(&self) -> anyhow::Result<Self::Output>;

    /// Get the current accumulator state (for serialization/merging)
    fn accumulator(&self) -> Self::Accumulator;

    /// Merge another accumulator into this one
    fn merge(&mut self, other: Self::Accumulator) -> anyhow::Result<()>;

    /// Reset the aggregator to initial state
    fn reset(&mut self);

    /// Get the number of values processed so far
    fn count(&self) -> u64;

    /// Check if the aggregator has processed any values
    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
