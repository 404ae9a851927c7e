//! Deterministic clickstream generator

use super::{EventSource, SourceBatch};
use crate::error::{Result, SourceError, SourceResult, StateError};
use crate::state::StorageAdapter;
use crate::transform::BRONZE_FIELDS;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};
use medallion_config::SourceConfig;
use medallion_types::{Record, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

const EVENT_TYPES: [&str; 6] = ["click", "view", "purchase", "add_to_cart", "search", "logout"];
const DEVICE_TYPES: [&str; 3] = ["mobile", "desktop", "tablet"];
const COUNTRIES: [&str; 7] = ["US", "UK", "CA", "DE", "FR", "IN", "AU"];
const BROWSERS: [&str; 4] = ["Chrome", "Firefox", "Safari", "Edge"];
const REFERRERS: [&str; 5] = ["google", "facebook", "direct", "email", "instagram"];

/// Metadata key holding the resolved start time, in epoch milliseconds
pub const START_TIME_KEY: &str = "synthetic_start_time";

/// Rate-limited synthetic clickstream
///
/// Every record is a pure function of `(seed, offset)`, including its event
/// time (`start_time + offset * 1000 / rows_per_second` ms, optionally shifted
/// backwards to simulate out-of-order arrival), so replay from any offset is
/// bit-identical. With throttling enabled only offsets whose event time has
/// been reached by the wall clock are served.
#[derive(Debug, Clone)]
pub struct SyntheticEventSource {
    name: String,
    config: SourceConfig,
    start_time: DateTime<Utc>,
}

impl SyntheticEventSource {
    /// Source starting at the configured start time, or at the current time
    /// when none is configured. Event times carry millisecond precision, so
    /// the start time is truncated to whole milliseconds.
    pub fn new(config: SourceConfig) -> Self {
        let start_time = config.start_time.unwrap_or_else(Utc::now).trunc_subsecs(3);
        info!(
            rows_per_second = config.rows_per_second,
            seed = config.seed,
            start_time = %start_time,
            throttle = config.throttle,
            "Synthetic event source opened"
        );
        Self {
            name: "synthetic".to_string(),
            config,
            start_time,
        }
    }

    /// Open the source against `store`, reusing the start time of an earlier
    /// run so offsets replay to the same records after a restart
    ///
    /// A configured start time always wins. Otherwise the start time saved
    /// under [`START_TIME_KEY`] is used, and on the first run the current
    /// time is saved there.
    pub async fn open(config: SourceConfig, store: &dyn StorageAdapter) -> Result<Self> {
        if config.start_time.is_some() {
            return Ok(Self::new(config));
        }

        let start_time = match store.load_metadata(START_TIME_KEY).await? {
            Some(bytes) => decode_start_time(&bytes)?,
            None => {
                let now = Utc::now().trunc_subsecs(3);
                store
                    .save_metadata(START_TIME_KEY, &now.timestamp_millis().to_le_bytes())
                    .await?;
                debug!(start_time = %now, "Saved synthetic start time");
                now
            }
        };

        Ok(Self::new(SourceConfig {
            start_time: Some(start_time),
            ..config
        }))
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Offsets the wall clock has produced so far
    fn available(&self, now: DateTime<Utc>) -> u64 {
        if !self.config.throttle {
            return u64::MAX;
        }
        let elapsed_ms = (now - self.start_time).num_milliseconds().max(0) as f64;
        (elapsed_ms * self.config.rows_per_second / 1000.0).floor() as u64
    }

    fn event_time(&self, offset: u64, rng: &mut StdRng) -> DateTime<Utc> {
        let nominal = (offset as f64 * 1000.0 / self.config.rows_per_second) as i64;
        let shift = if self.config.max_out_of_order_ms > 0 {
            rng.gen_range(0..=self.config.max_out_of_order_ms) as i64
        } else {
            0
        };
        self.start_time + Duration::milliseconds(nominal - shift)
    }

    /// Generate the record at `offset`
    pub fn generate(&self, offset: u64) -> Record {
        let mut rng = StdRng::seed_from_u64(
            self.config
                .seed
                .wrapping_add(offset.wrapping_mul(0x9e37_79b9_7f4a_7c15)),
        );

        let event_time = self.event_time(offset, &mut rng);
        let event_id = uuid::Builder::from_random_bytes(rng.gen()).into_uuid();

        let amount = if rng.gen_bool(self.config.null_amount_ratio.clamp(0.0, 1.0)) {
            Value::Null
        } else {
            Value::Float((rng.gen::<f64>() * 50_000.0).round() / 100.0)
        };

        let pick = |rng: &mut StdRng, choices: &[&str]| -> Value {
            Value::from(choices[rng.gen_range(0..choices.len())])
        };

        let values = [
            Value::from(event_id.to_string()),
            Value::Int(rng.gen_range(1..=1000)),
            Value::from(format!("session_{}", rng.gen_range(0..100))),
            pick(&mut rng, &EVENT_TYPES),
            Value::Timestamp(event_time),
            Value::from(format!("/page/{}", rng.gen_range(0..50))),
            Value::from(format!("prod_{}", rng.gen_range(0..200))),
            Value::Int(rng.gen_range(1..=5)),
            amount,
            pick(&mut rng, &DEVICE_TYPES),
            pick(&mut rng, &COUNTRIES),
            pick(&mut rng, &BROWSERS),
            Value::Bool(rng.gen::<f64>() > 0.3),
            pick(&mut rng, &REFERRERS),
        ];

        BRONZE_FIELDS
            .iter()
            .zip(values)
            .fold(Record::new(event_time), |record, (field, value)| {
                record.with_field(*field, value)
            })
    }
}

fn decode_start_time(bytes: &[u8]) -> Result<DateTime<Utc>> {
    let malformed = |reason: &str| StateError::DeserializationFailed {
        key: START_TIME_KEY.to_string(),
        reason: reason.to_string(),
    };
    let millis = <[u8; 8]>::try_from(bytes)
        .map(i64::from_le_bytes)
        .map_err(|_| malformed("expected 8 bytes"))?;
    let start_time = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| malformed("timestamp out of range"))?;
    Ok(start_time)
}

#[async_trait]
impl EventSource for SyntheticEventSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pull(&self, since: u64, max_rows: usize) -> SourceResult<SourceBatch> {
        if !(self.config.rows_per_second > 0.0) {
            return Err(SourceError::InvalidOffset {
                source_name: self.name.clone(),
                offset: since,
                reason: "rows_per_second must be positive".to_string(),
            });
        }

        let available = self.available(Utc::now());
        let end = available.min(since.saturating_add(max_rows as u64));
        if end <= since {
            return Ok(SourceBatch::empty(since));
        }

        let records: Vec<Record> = (since..end).map(|offset| self.generate(offset)).collect();
        debug!(source = %self.name, since, next_offset = end, rows = records.len(), "Generated events");

        Ok(SourceBatch {
            records,
            next_offset: end,
        })
    }
}
