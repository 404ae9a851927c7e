use super::trait_::Aggregator;

use anyhow::bail;
use medallion_types::Value;
use serde::{Deserialize, Serialize};

/// Accumulator for sum aggregation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SumAccumulator {
    int_sum: i64,
    float_sum: f64,
    all_int: bool,
    count: u64,
}

impl Default for SumAccumulator {
    fn default() -> Self {
        Self {
            int_sum: 0,
            float_sum: 0.0,
            all_int: true,
            count: 0,
        }
    }
}

/// Sum aggregator over numeric values
///
/// Integer inputs are summed exactly; the result stays an integer until a
/// float value is folded in. The sum of zero values is NULL.
///
/// # Example
///
/// ```rust
/// use medallion_processor::aggregation::{Aggregator, SumAggregator};
/// use medallion_types::Value;
///
/// let mut agg = SumAggregator::new();
/// agg.update(Value::Int(2)).unwrap();
/// agg.update(Value::Int(3)).unwrap();
/// assert_eq!(agg.finalize().unwrap(), Value::Int(5));
///
/// agg.update(Value::Float(0.5)).unwrap();
/// assert_eq!(agg.finalize().unwrap(), Value::Float(5.5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SumAggregator {
    acc: SumAccumulator,
}

impl Aggregator for SumAggregator {
    type Input = Value;
    type Output = Value;
    type Accumulator = SumAccumulator;

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, value: Value) -> anyhow::Result<()> {
        match value {
            Value::Int(v) => {
                self.acc.int_sum = match self.acc.int_sum.checked_add(v) {
                    Some(sum) => sum,
                    None => bail!("integer overflow in sum"),
                };
            }
            Value::Float(v) => {
                self.acc.float_sum += v;
                self.acc.all_int = false;
            }
            other => bail!("sum expects a numeric value, got {}", other.type_name()),
        }
        self.acc.count += 1;
        Ok(())
    }

    fn finalize(&self) -> anyhow::Result<Value> {
        if self.acc.count == 0 {
            return Ok(Value::Null);
        }
        if self.acc.all_int {
            Ok(Value::Int(self.acc.int_sum))
        } else {
            Ok(Value::Float(self.acc.int_sum as f64 + self.acc.float_sum))
        }
    }

    fn accumulator(&self) -> SumAccumulator {
        self.acc.clone()
    }

    fn merge(&mut self, other: SumAccumulator) -> anyhow::Result<()> {
        self.acc.int_sum = match self.acc.int_sum.checked_add(other.int_sum) {
            Some(sum) => sum,
            None => bail!("integer overflow in sum"),
        };
        self.acc.float_sum += other.float_sum;
        self.acc.all_int &= other.all_int;
        self.acc.count += other.count;
        Ok(())
    }

    fn reset(&mut self) {
        self.acc = SumAccumulator::default();
    }

    fn count(&self) -> u64 {
        self.acc.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_integers_stay_integers() {
        let mut agg = SumAggregator::new();
        agg.update_batch(&[Value::Int(1), Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(agg.finalize().unwrap(), Value::Int(6));
        assert_eq!(agg.count(), 3);
    }

    #[test]
    fn test_sum_mixed_promotes_to_float() {
        let mut agg = SumAggregator::new();
        agg.update_batch(&[Value::Int(10), Value::Float(0.25)]).unwrap();
        assert_eq!(agg.finalize().unwrap(), Value::Float(10.25));
    }

    #[test]
    fn test_sum_empty_is_null() {
        let agg = SumAggregator::new();
        assert!(agg.is_empty());
        assert_eq!(agg.finalize().unwrap(), Value::Null);
    }

    #[test]
    fn test_sum_rejects_non_numeric() {
        let mut agg = SumAggregator::new();
        assert!(agg.update(Value::Str("x".into())).is_err());
        assert!(agg.is_empty());
    }

    #[test]
    fn test_sum_merge() {
        let mut agg1 = SumAggregator::new();
        agg1.update_batch(&[Value::Int(1), Value::Int(2)]).unwrap();

        let mut agg2 = SumAggregator::new();
        agg2.update(Value::Float(1.5)).unwrap();

        agg1.merge(agg2.accumulator()).unwrap();
        assert_eq!(agg1.finalize().unwrap(), Value::Float(4.5));
        assert_eq!(agg1.count(), 3);
    }

    #[test]
    fn test_sum_overflow() {
        let mut agg = SumAggregator::new();
        agg.update(Value::Int(i64::MAX)).unwrap();
        assert!(agg.update(Value::Int(1)).is_err());
    }

    #[test]
    fn test_sum_serialization() {
        let mut agg = SumAggregator::new();
        agg.update(Value::Int(7)).unwrap();

        let json = serde_json::to_string(&agg.accumulator()).unwrap();
        let acc: SumAccumulator = serde_json::from_str(&json).unwrap();
        let restored = SumAggregator::from_accumulator(acc).unwrap();
        assert_eq!(restored.finalize().unwrap(), Value::Int(7));
    }
}
