//! Type-erased aggregate slot used by the window operator

use super::{
    ApproxDistinctAccumulator, ApproxDistinctAggregator, AverageAccumulator, AverageAggregator,
    Aggregator, CountAccumulator, CountAggregator, ExtremumAccumulator, FirstValueAccumulator,
    FirstValueAggregator, MaxAggregator, MinAggregator, SumAccumulator, SumAggregator,
};
use crate::error::{AggregationError, AggregationResult};

use medallion_config::AggregationKind;
use medallion_types::Value;
use serde::{Deserialize, Serialize};

/// One live aggregate of a window group
#[derive(Debug, Clone)]
pub enum AggregateSlot {
    Count(CountAggregator),
    Sum(SumAggregator),
    Avg(AverageAggregator),
    Min(MinAggregator),
    Max(MaxAggregator),
    First(FirstValueAggregator),
    ApproxDistinct(ApproxDistinctAggregator),
}

/// Serializable partial state of an [`AggregateSlot`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AccumulatorSnapshot {
    Count(CountAccumulator),
    Sum(SumAccumulator),
    Avg(AverageAccumulator),
    Min(ExtremumAccumulator),
    Max(ExtremumAccumulator),
    First(FirstValueAccumulator),
    ApproxDistinct(ApproxDistinctAccumulator),
}

fn corrupted(kind: AggregationKind) -> impl Fn(anyhow::Error) -> AggregationError {
    move |err| AggregationError::CorruptedState {
        aggregation_type: kind.to_string(),
        details: err.to_string(),
    }
}

fn numeric(kind: AggregationKind, value: &Value) -> AggregationResult<()> {
    match value {
        Value::Int(_) | Value::Float(_) => Ok(()),
        other => Err(AggregationError::TypeMismatch {
            aggregation: kind.to_string(),
            expected: "numeric".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

impl AggregateSlot {
    pub fn new(kind: AggregationKind) -> Self {
        match kind {
            AggregationKind::Count => Self::Count(CountAggregator::new()),
            AggregationKind::Sum => Self::Sum(SumAggregator::new()),
            AggregationKind::Avg => Self::Avg(AverageAggregator::new()),
            AggregationKind::Min => Self::Min(MinAggregator::new()),
            AggregationKind::Max => Self::Max(MaxAggregator::new()),
            AggregationKind::First => Self::First(FirstValueAggregator::new()),
            AggregationKind::ApproxDistinct => {
                Self::ApproxDistinct(ApproxDistinctAggregator::new())
            }
        }
    }

    pub fn kind(&self) -> AggregationKind {
        match self {
            Self::Count(_) => AggregationKind::Count,
            Self::Sum(_) => AggregationKind::Sum,
            Self::Avg(_) => AggregationKind::Avg,
            Self::Min(_) => AggregationKind::Min,
            Self::Max(_) => AggregationKind::Max,
            Self::First(_) => AggregationKind::First,
            Self::ApproxDistinct(_) => AggregationKind::ApproxDistinct,
        }
    }

    /// Count a row regardless of its field values (`count(*)`)
    pub fn fold_row(&mut self) -> AggregationResult<()> {
        match self {
            Self::Count(agg) => agg.update(()).map_err(corrupted(AggregationKind::Count)),
            other => Err(AggregationError::TypeMismatch {
                aggregation: other.kind().to_string(),
                expected: "a field".to_string(),
                actual: "*".to_string(),
            }),
        }
    }

    /// Fold one field value. NULLs are ignored by every aggregate.
    pub fn fold(&mut self, value: &Value) -> AggregationResult<()> {
        if value.is_null() {
            return Ok(());
        }
        let kind = self.kind();
        match self {
            Self::Count(agg) => agg.update(()),
            Self::Sum(agg) => {
                numeric(kind, value)?;
                agg.update(value.clone())
            }
            Self::Avg(agg) => {
                numeric(kind, value)?;
                agg.update(value.as_f64().unwrap_or_default())
            }
            Self::Min(agg) => agg.update(value.clone()),
            Self::Max(agg) => agg.update(value.clone()),
            Self::First(agg) => agg.update(value.clone()),
            Self::ApproxDistinct(agg) => agg.update(value.clone()),
        }
        .map_err(corrupted(kind))
    }

    /// Merge the partial state of `other` into this slot
    pub fn merge(&mut self, other: &AggregateSlot) -> AggregationResult<()> {
        self.merge_snapshot(other.snapshot())
    }

    pub fn merge_snapshot(&mut self, snapshot: AccumulatorSnapshot) -> AggregationResult<()> {
        let kind = self.kind();
        match (self, snapshot) {
            (Self::Count(agg), AccumulatorSnapshot::Count(acc)) => agg.merge(acc),
            (Self::Sum(agg), AccumulatorSnapshot::Sum(acc)) => agg.merge(acc),
            (Self::Avg(agg), AccumulatorSnapshot::Avg(acc)) => agg.merge(acc),
            (Self::Min(agg), AccumulatorSnapshot::Min(acc)) => agg.merge(acc),
            (Self::Max(agg), AccumulatorSnapshot::Max(acc)) => agg.merge(acc),
            (Self::First(agg), AccumulatorSnapshot::First(acc)) => agg.merge(acc),
            (Self::ApproxDistinct(agg), AccumulatorSnapshot::ApproxDistinct(acc)) => {
                agg.merge(acc)
            }
            (_, snapshot) => {
                return Err(AggregationError::CorruptedState {
                    aggregation_type: kind.to_string(),
                    details: format!("cannot merge {} state", snapshot.kind()),
                })
            }
        }
        .map_err(corrupted(kind))
    }

    /// Final value of the aggregate. Empty sum, avg, min, max and first
    /// aggregates are NULL; an empty count is 0.
    pub fn finalize(&self) -> Value {
        match self {
            Self::Count(agg) => Value::Int(agg.count() as i64),
            Self::Sum(agg) => agg.finalize().unwrap_or(Value::Null),
            Self::Avg(agg) => agg.finalize().map(Value::Float).unwrap_or(Value::Null),
            Self::Min(agg) => agg.finalize().ok().flatten().unwrap_or(Value::Null),
            Self::Max(agg) => agg.finalize().ok().flatten().unwrap_or(Value::Null),
            Self::First(agg) => agg.finalize().ok().flatten().unwrap_or(Value::Null),
            Self::ApproxDistinct(agg) => agg
                .finalize()
                .map(|n| Value::Int(n as i64))
                .unwrap_or(Value::Null),
        }
    }

    pub fn snapshot(&self) -> AccumulatorSnapshot {
        match self {
            Self::Count(agg) => AccumulatorSnapshot::Count(agg.accumulator()),
            Self::Sum(agg) => AccumulatorSnapshot::Sum(agg.accumulator()),
            Self::Avg(agg) => AccumulatorSnapshot::Avg(agg.accumulator()),
            Self::Min(agg) => AccumulatorSnapshot::Min(agg.accumulator()),
            Self::Max(agg) => AccumulatorSnapshot::Max(agg.accumulator()),
            Self::First(agg) => AccumulatorSnapshot::First(agg.accumulator()),
            Self::ApproxDistinct(agg) => AccumulatorSnapshot::ApproxDistinct(agg.accumulator()),
        }
    }

    pub fn restore(snapshot: AccumulatorSnapshot) -> AggregationResult<Self> {
        let mut slot = Self::new(snapshot.kind());
        slot.merge_snapshot(snapshot)?;
        Ok(slot)
    }
}

impl AccumulatorSnapshot {
    pub fn kind(&self) -> AggregationKind {
        match self {
            Self::Count(_) => AggregationKind::Count,
            Self::Sum(_) => AggregationKind::Sum,
            Self::Avg(_) => AggregationKind::Avg,
            Self::Min(_) => AggregationKind::Min,
            Self::Max(_) => AggregationKind::Max,
            Self::First(_) => AggregationKind::First,
            Self::ApproxDistinct(_) => AggregationKind::ApproxDistinct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nulls_are_skipped() {
        let mut count = AggregateSlot::new(AggregationKind::Count);
        count.fold(&Value::Int(1)).unwrap();
        count.fold(&Value::Null).unwrap();
        assert_eq!(count.finalize(), Value::Int(1));

        let mut sum = AggregateSlot::new(AggregationKind::Sum);
        sum.fold(&Value::Null).unwrap();
        assert_eq!(sum.finalize(), Value::Null);
    }

    #[test]
    fn test_count_star() {
        let mut count = AggregateSlot::new(AggregationKind::Count);
        count.fold_row().unwrap();
        count.fold_row().unwrap();
        assert_eq!(count.finalize(), Value::Int(2));

        let mut sum = AggregateSlot::new(AggregationKind::Sum);
        assert!(sum.fold_row().is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let mut avg = AggregateSlot::new(AggregationKind::Avg);
        let err = avg.fold(&Value::from("ten")).unwrap_err();
        assert!(matches!(err, AggregationError::TypeMismatch { .. }));
    }

    #[test]
    fn test_empty_finalize() {
        assert_eq!(AggregateSlot::new(AggregationKind::Count).finalize(), Value::Int(0));
        assert_eq!(AggregateSlot::new(AggregationKind::Avg).finalize(), Value::Null);
        assert_eq!(AggregateSlot::new(AggregationKind::Min).finalize(), Value::Null);
        assert_eq!(
            AggregateSlot::new(AggregationKind::ApproxDistinct).finalize(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_merge_partials_equals_single_pass() {
        let values: Vec<Value> = (1..=10).map(|i| Value::Float(i as f64 * 1.5)).collect();

        for kind in [
            AggregationKind::Count,
            AggregationKind::Sum,
            AggregationKind::Avg,
            AggregationKind::Min,
            AggregationKind::Max,
            AggregationKind::First,
            AggregationKind::ApproxDistinct,
        ] {
            let mut single = AggregateSlot::new(kind);
            for v in &values {
                single.fold(v).unwrap();
            }

            let mut merged = AggregateSlot::new(kind);
            for chunk in values.chunks(3) {
                let mut partial = AggregateSlot::new(kind);
                for v in chunk {
                    partial.fold(v).unwrap();
                }
                merged.merge(&partial).unwrap();
            }

            assert_eq!(merged.finalize(), single.finalize(), "{kind}");
        }
    }

    #[test]
    fn test_snapshot_restore() {
        let mut max = AggregateSlot::new(AggregationKind::Max);
        max.fold(&Value::Int(3)).unwrap();
        max.fold(&Value::Int(8)).unwrap();

        let bytes = bincode::serialize(&max.snapshot()).unwrap();
        let snapshot: AccumulatorSnapshot = bincode::deserialize(&bytes).unwrap();
        let restored = AggregateSlot::restore(snapshot).unwrap();
        assert_eq!(restored.finalize(), Value::Int(8));
    }

    #[test]
    fn test_merge_kind_mismatch() {
        let mut count = AggregateSlot::new(AggregationKind::Count);
        let sum = AggregateSlot::new(AggregationKind::Sum);
        assert!(count.merge(&sum).is_err());
    }
}
