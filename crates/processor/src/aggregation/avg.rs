use super::trait_::Aggregator;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Accumulator for average aggregation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AverageAccumulator {
    sum: f64,
    count: u64,
}

/// Average aggregator - computes the arithmetic mean
///
/// Keeps sum and count so partial averages merge exactly.
#[derive(Debug, Clone, Default)]
pub struct AverageAggregator {
    sum: f64,
    count: u64,
}

impl Aggregator for AverageAggregator {
    type Input = f64;
    type Output = f64;
    type Accumulator = AverageAccumulator;

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, value: f64) -> anyhow::Result<()> {
        self.sum += value;
        self.count += 1;
        Ok(())
    }

    fn finalize(&self) -> anyhow::Result<f64> {
        if self.count == 0 {
            bail!("cannot compute average of zero values");
        }
        Ok(self.sum / self.count as f64)
    }

    fn accumulator(&self) -> AverageAccumulator {
        AverageAccumulator {
            sum: self.sum,
            count: self.count,
        }
    }

    fn merge(&mut self, other: AverageAccumulator) -> anyhow::Result<()> {
        self.sum += other.sum;
        self.count += other.count;
        Ok(())
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }
}
