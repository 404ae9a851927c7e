use super::trait_::Aggregator;

use serde::{Deserialize, Serialize};

/// Accumulator for count aggregation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountAccumulator {
    count: u64,
}

/// Count aggregator - counts rows
///
/// The caller decides what counts as a row: `count(*)` feeds every record,
/// `count(field)` feeds only records where the field is not null.
#[derive(Debug, Clone, Default)]
pub struct CountAggregator {
    count: u64,
}

impl Aggregator for CountAggregator {
    type Input = ();
    type Output = u64;
    type Accumulator = CountAccumulator;

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, _value: ()) -> anyhow::Result<()> {
        self.count += 1;
        Ok(())
    }

    fn finalize(&self) -> anyhow::Result<u64> {
        Ok(self.count)
    }

    fn accumulator(&self) -> CountAccumulator {
        CountAccumulator { count: self.count }
    }

    fn merge(&mut self, other: CountAccumulator) -> anyhow::Result<()> {
        self.count += other.count;
        Ok(())
    }

    fn reset(&mut self) {
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }
}
