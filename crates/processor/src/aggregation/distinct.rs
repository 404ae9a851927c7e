//! Approximate distinct counting with a mergeable HyperLogLog sketch

use super::trait_::Aggregator;
use crate::error::{AggregationError, AggregationResult};
use sha2::{Digest, Sha256};

use anyhow::bail;
use medallion_types::Value;
use serde::{Deserialize, Serialize};

pub const MIN_PRECISION: u8 = 4;
pub const MAX_PRECISION: u8 = 16;
pub const DEFAULT_PRECISION: u8 = 12;

/// Register storage. Small sketches keep the exact hash set and switch to
/// dense registers once that set would outgrow them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
enum Registers {
    Sparse(Vec<u64>),
    Dense(Vec<u8>),
}

/// HyperLogLog cardinality sketch
///
/// Values are hashed from their canonical form, so the estimate is stable
/// across processes and restarts. Merging two sketches takes the register
/// maximum, which is commutative and associative: merging per-batch sketches
/// yields the same sketch as inserting every value into one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HyperLogLog {
    precision: u8,
    registers: Registers,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            registers: Registers::Sparse(Vec::new()),
        }
    }
}

impl HyperLogLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_precision(precision: u8) -> AggregationResult<Self> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(AggregationError::InvalidPrecision {
                precision,
                min: MIN_PRECISION,
                max: MAX_PRECISION,
            });
        }
        Ok(Self {
            precision,
            registers: Registers::Sparse(Vec::new()),
        })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    fn register_count(&self) -> usize {
        1 << self.precision
    }

    /// The sparse set is capped at the byte size of the dense registers
    fn sparse_limit(&self) -> usize {
        self.register_count() / 8
    }

    pub fn insert(&mut self, value: &Value) {
        self.insert_hash(hash_value(value));
    }

    fn insert_hash(&mut self, hash: u64) {
        let precision = self.precision;
        let limit = self.sparse_limit();
        let overflowed = match &mut self.registers {
            Registers::Sparse(hashes) => {
                if let Err(pos) = hashes.binary_search(&hash) {
                    hashes.insert(pos, hash);
                }
                hashes.len() > limit
            }
            Registers::Dense(registers) => {
                update_register(registers, precision, hash);
                false
            }
        };
        if overflowed {
            self.densify();
        }
    }

    fn densify(&mut self) {
        if let Registers::Sparse(hashes) = &self.registers {
            let mut registers = vec![0u8; self.register_count()];
            for &hash in hashes {
                update_register(&mut registers, self.precision, hash);
            }
            self.registers = Registers::Dense(registers);
        }
    }

    /// Merge another sketch of the same precision into this one
    pub fn merge(&mut self, other: &HyperLogLog) -> AggregationResult<()> {
        if other.precision != self.precision {
            return Err(AggregationError::CorruptedState {
                aggregation_type: "approx_distinct".to_string(),
                details: format!(
                    "cannot merge precision {} into precision {}",
                    other.precision, self.precision
                ),
            });
        }

        match &other.registers {
            Registers::Sparse(hashes) => {
                for &hash in hashes {
                    self.insert_hash(hash);
                }
            }
            Registers::Dense(theirs) => {
                self.densify();
                if let Registers::Dense(ours) = &mut self.registers {
                    for (mine, their) in ours.iter_mut().zip(theirs) {
                        *mine = (*mine).max(*their);
                    }
                }
            }
        }
        Ok(())
    }

    /// Estimated number of distinct values
    pub fn estimate(&self) -> u64 {
        let registers = match &self.registers {
            Registers::Sparse(hashes) => return hashes.len() as u64,
            Registers::Dense(registers) => registers,
        };

        let m = registers.len() as f64;
        let alpha = match registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let sum: f64 = registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
        let raw = alpha * m * m / sum;

        let zeros = registers.iter().filter(|&&r| r == 0).count();
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            // Linear counting for the small range
            m * (m / zeros as f64).ln()
        } else {
            raw
        };
        estimate.round() as u64
    }

    pub fn is_empty(&self) -> bool {
        match &self.registers {
            Registers::Sparse(hashes) => hashes.is_empty(),
            Registers::Dense(registers) => registers.iter().all(|&r| r == 0),
        }
    }
}

fn update_register(registers: &mut [u8], precision: u8, hash: u64) {
    let index = (hash >> (64 - precision)) as usize;
    let remaining = (hash << precision) | (1u64 << (precision - 1));
    let rank = remaining.leading_zeros() as u8 + 1;
    if let Some(register) = registers.get_mut(index) {
        *register = (*register).max(rank);
    }
}

/// First eight bytes of the SHA-256 of the canonical encoding. Registers
/// are persisted in snapshots, so the hash must be stable across builds.
fn hash_value(value: &Value) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(value.canonical().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Approximate distinct count aggregator
///
/// # Example
///
/// ```rust
/// use medallion_processor::aggregation::{Aggregator, ApproxDistinctAggregator};
/// use medallion_types::Value;
///
/// let mut agg = ApproxDistinctAggregator::new();
/// for user in [1, 2, 2, 3, 3, 3] {
///     agg.update(Value::Int(user)).unwrap();
/// }
/// assert_eq!(agg.finalize().unwrap(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ApproxDistinctAggregator {
    sketch: HyperLogLog,
    count: u64,
}

/// Accumulator for approximate distinct counting
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApproxDistinctAccumulator {
    sketch: HyperLogLog,
    count: u64,
}

impl ApproxDistinctAggregator {
    pub fn with_precision(precision: u8) -> AggregationResult<Self> {
        Ok(Self {
            sketch: HyperLogLog::with_precision(precision)?,
            count: 0,
        })
    }

    pub fn sketch(&self) -> &HyperLogLog {
        &self.sketch
    }
}

impl Aggregator for ApproxDistinctAggregator {
    type Input = Value;
    type Output = u64;
    type Accumulator = ApproxDistinctAccumulator;

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, value: Value) -> anyhow::Result<()> {
        if value.is_null() {
            bail!("approx_distinct does not accept NULL");
        }
        self.sketch.insert(&value);
        self.count += 1;
        Ok(())
    }

    fn finalize(&self) -> anyhow::Result<u64> {
        Ok(self.sketch.estimate())
    }

    fn accumulator(&self) -> ApproxDistinctAccumulator {
        ApproxDistinctAccumulator {
            sketch: self.sketch.clone(),
            count: self.count,
        }
    }

    fn merge(&mut self, other: ApproxDistinctAccumulator) -> anyhow::Result<()> {
        self.sketch.merge(&other.sketch)?;
        self.count += other.count;
        Ok(())
    }

    fn reset(&mut self) {
        self.sketch = HyperLogLog::with_precision(self.sketch.precision()).unwrap_or_default();
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch_of(range: std::ops::Range<i64>) -> HyperLogLog {
        let mut hll = HyperLogLog::new();
        for i in range {
            hll.insert(&Value::Int(i));
        }
        hll
    }

    fn assert_close(estimate: u64, actual: u64, tolerance: f64) {
        let error = (estimate as f64 - actual as f64).abs() / actual as f64;
        assert!(
            error <= tolerance,
            "estimate {estimate} too far from {actual} ({:.2}%)",
            error * 100.0
        );
    }

    #[test]
    fn test_value_hash_is_pinned() {
        // Persisted registers depend on these exact values
        assert_eq!(hash_value(&Value::Int(42)), 0x8e5c_c2a1_8337_e30e);
        assert_eq!(hash_value(&Value::from("prod_7")), 0x6d00_96f3_7533_acd2);
        assert_ne!(hash_value(&Value::Int(42)), hash_value(&Value::from("42")));
    }

    #[test]
    fn test_small_cardinality_is_exact() {
        let mut hll = sketch_of(0..300);
        for i in 0..300 {
            hll.insert(&Value::Int(i));
        }
        assert_eq!(hll.estimate(), 300);
    }

    #[test]
    fn test_large_cardinality_estimate() {
        let hll = sketch_of(0..10_000);
        assert_close(hll.estimate(), 10_000, 0.06);
    }

    #[test]
    fn test_merge_overlapping() {
        let mut left = sketch_of(0..6_000);
        let right = sketch_of(4_000..10_000);
        left.merge(&right).unwrap();
        assert_close(left.estimate(), 10_000, 0.06);
    }

    #[test]
    fn test_merge_matches_single_sketch() {
        let whole = sketch_of(0..5_000);

        let mut merged = sketch_of(0..100);
        merged.merge(&sketch_of(100..2_000)).unwrap();
        merged.merge(&sketch_of(2_000..5_000)).unwrap();

        assert_eq!(merged, whole);
    }

    #[test]
    fn test_merge_is_commutative_and_associative() {
        let a = sketch_of(0..200);
        let b = sketch_of(150..900);
        let c = sketch_of(800..3_000);

        let mut left = a.clone();
        left.merge(&b).unwrap();
        left.merge(&c).unwrap();

        let mut bc = b.clone();
        bc.merge(&c).unwrap();
        let mut right = bc;
        right.merge(&a).unwrap();

        assert_eq!(left, right);
    }

    #[test]
    fn test_value_types_hash_distinctly() {
        let mut hll = HyperLogLog::new();
        hll.insert(&Value::Int(1));
        hll.insert(&Value::Str("1".into()));
        hll.insert(&Value::Float(1.0));
        assert_eq!(hll.estimate(), 3);
    }

    #[test]
    fn test_precision_mismatch() {
        let mut a = HyperLogLog::with_precision(10).unwrap();
        let b = HyperLogLog::with_precision(12).unwrap();
        assert!(a.merge(&b).is_err());
        assert!(HyperLogLog::with_precision(3).is_err());
    }

    #[test]
    fn test_aggregator_serialization() {
        let mut agg = ApproxDistinctAggregator::new();
        agg.update_batch(&[Value::from("u1"), Value::from("u2"), Value::from("u1")])
            .unwrap();

        let bytes = bincode::serialize(&agg.accumulator()).unwrap();
        let acc: ApproxDistinctAccumulator = bincode::deserialize(&bytes).unwrap();
        let restored = ApproxDistinctAggregator::from_accumulator(acc).unwrap();

        assert_eq!(restored.finalize().unwrap(), 2);
        assert_eq!(restored.count(), 3);
    }

    #[test]
    fn test_aggregator_rejects_null() {
        let mut agg = ApproxDistinctAggregator::new();
        assert!(agg.update(Value::Null).is_err());
        assert_eq!(agg.finalize().unwrap(), 0);
    }
}
