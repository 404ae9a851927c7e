use super::trait_::Aggregator;

use medallion_types::Value;
use serde::{Deserialize, Serialize};

/// Accumulator for first-value aggregation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FirstValueAccumulator {
    value: Option<Value>,
    count: u64,
}

/// Keeps the first value folded in, in processing order
///
/// Merging keeps the receiver's value when it has one, so folding partials
/// in arrival order preserves "first seen".
#[derive(Debug, Clone, Default)]
pub struct FirstValueAggregator {
    acc: FirstValueAccumulator,
}

impl Aggregator for FirstValueAggregator {
    type Input = Value;
    type Output = Option<Value>;
    type Accumulator = FirstValueAccumulator;

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, value: Value) -> anyhow::Result<()> {
        if self.acc.value.is_none() {
            self.acc.value = Some(value);
        }
        self.acc.count += 1;
        Ok(())
    }

    fn finalize(&self) -> anyhow::Result<Option<Value>> {
        Ok(self.acc.value.clone())
    }

    fn accumulator(&self) -> FirstValueAccumulator {
        self.acc.clone()
    }

    fn merge(&mut self, other: FirstValueAccumulator) -> anyhow::Result<()> {
        if self.acc.value.is_none() {
            self.acc.value = other.value;
        }
        self.acc.count += other.count;
        Ok(())
    }

    fn reset(&mut self) {
        self.acc = FirstValueAccumulator::default();
    }

    fn count(&self) -> u64 {
        self.acc.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_keeps_earliest() {
        let mut agg = FirstValueAggregator::new();
        agg.update_batch(&[Value::from("US"), Value::from("DE")])
            .unwrap();
        assert_eq!(agg.finalize().unwrap(), Some(Value::from("US")));
    }

    #[test]
    fn test_first_merge_prefers_receiver() {
        let mut agg1 = FirstValueAggregator::new();
        agg1.update(Value::from("US")).unwrap();

        let mut agg2 = FirstValueAggregator::new();
        agg2.update(Value::from("FR")).unwrap();

        agg1.merge(agg2.accumulator()).unwrap();
        assert_eq!(agg1.finalize().unwrap(), Some(Value::from("US")));

        let mut empty = FirstValueAggregator::new();
        empty.merge(agg2.accumulator()).unwrap();
        assert_eq!(empty.finalize().unwrap(), Some(Value::from("FR")));
    }
}
