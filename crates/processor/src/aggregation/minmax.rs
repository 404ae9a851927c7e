use super::trait_::Aggregator;

use medallion_types::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Accumulator shared by min and max aggregation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtremumAccumulator {
    value: Option<Value>,
    count: u64,
}

/// Keep `candidate` if it beats `current` in direction `keep`
fn fold(current: &mut Option<Value>, candidate: Value, keep: Ordering) {
    match current {
        Some(existing) if candidate.total_cmp(existing) != keep => {}
        _ => *current = Some(candidate),
    }
}

/// Min aggregator - tracks the smallest value seen
///
/// Works on any comparable value: numbers, strings, dates and timestamps.
#[derive(Debug, Clone, Default)]
pub struct MinAggregator {
    acc: ExtremumAccumulator,
}

impl Aggregator for MinAggregator {
    type Input = Value;
    type Output = Option<Value>;
    type Accumulator = ExtremumAccumulator;

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, value: Value) -> anyhow::Result<()> {
        fold(&mut self.acc.value, value, Ordering::Less);
        self.acc.count += 1;
        Ok(())
    }

    fn finalize(&self) -> anyhow::Result<Option<Value>> {
        Ok(self.acc.value.clone())
    }

    fn accumulator(&self) -> ExtremumAccumulator {
        self.acc.clone()
    }

    fn merge(&mut self, other: ExtremumAccumulator) -> anyhow::Result<()> {
        if let Some(value) = other.value {
            fold(&mut self.acc.value, value, Ordering::Less);
        }
        self.acc.count += other.count;
        Ok(())
    }

    fn reset(&mut self) {
        self.acc = ExtremumAccumulator::default();
    }

    fn count(&self) -> u64 {
        self.acc.count
    }
}

/// Max aggregator - tracks the largest value seen
#[derive(Debug, Clone, Default)]
pub struct MaxAggregator {
    acc: ExtremumAccumulator,
}

impl Aggregator for MaxAggregator {
    type Input = Value;
    type Output = Option<Value>;
    type Accumulator = ExtremumAccumulator;

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, value: Value) -> anyhow::Result<()> {
        fold(&mut self.acc.value, value, Ordering::Greater);
        self.acc.count += 1;
        Ok(())
    }

    fn finalize(&self) -> anyhow::Result<Option<Value>> {
        Ok(self.acc.value.clone())
    }

    fn accumulator(&self) -> ExtremumAccumulator {
        self.acc.clone()
    }

    fn merge(&mut self, other: ExtremumAccumulator) -> anyhow::Result<()> {
        if let Some(value) = other.value {
            fold(&mut self.acc.value, value, Ordering::Greater);
        }
        self.acc.count += other.count;
        Ok(())
    }

    fn reset(&mut self) {
        self.acc = ExtremumAccumulator::default();
    }

    fn count(&self) -> u64 {
        self.acc.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_basic() {
        let mut agg = MinAggregator::new();
        assert_eq!(agg.finalize().unwrap(), None);

        agg.update_batch(&[Value::Float(3.5), Value::Int(1), Value::Float(2.0)])
            .unwrap();
        assert_eq!(agg.finalize().unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_max_basic() {
        let mut agg = MaxAggregator::new();
        agg.update_batch(&[Value::Int(4), Value::Float(9.25), Value::Int(-2)])
            .unwrap();
        assert_eq!(agg.finalize().unwrap(), Some(Value::Float(9.25)));
        assert_eq!(agg.count(), 3);
    }

    #[test]
    fn test_max_strings() {
        let mut agg = MaxAggregator::new();
        agg.update_batch(&[Value::from("apple"), Value::from("pear"), Value::from("fig")])
            .unwrap();
        assert_eq!(agg.finalize().unwrap(), Some(Value::from("pear")));
    }

    #[test]
    fn test_min_merge() {
        let mut agg1 = MinAggregator::new();
        agg1.update(Value::Int(5)).unwrap();

        let mut agg2 = MinAggregator::new();
        agg2.update(Value::Int(2)).unwrap();

        agg1.merge(agg2.accumulator()).unwrap();
        agg1.merge(MinAggregator::new().accumulator()).unwrap();
        assert_eq!(agg1.finalize().unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_max_reset() {
        let mut agg = MaxAggregator::new();
        agg.update(Value::Int(1)).unwrap();
        agg.reset();
        assert!(agg.is_empty());
        assert_eq!(agg.finalize().unwrap(), None);
    }
}
