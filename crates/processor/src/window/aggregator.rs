//! Tumbling window aggregation with watermark-driven emission

use super::assigner::TumblingWindowAssigner;
use super::spec::WindowSpec;
use super::types::{GroupKey, WindowBounds};
use crate::aggregation::{AccumulatorSnapshot, AggregateSlot};
use crate::error::{Result, WindowError};
use crate::watermark::{BoundedLatenessWatermark, Watermark};

use medallion_types::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

type Groups = BTreeMap<GroupKey, Vec<AggregateSlot>>;

/// Output of one micro-batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowBatch {
    /// One record per closed (window, group), ordered by window start then key
    pub output: Vec<Record>,
    pub late_dropped: u64,
    pub overflow_dropped: u64,
    /// Distinct windows closed by this batch
    pub closed_windows: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct WindowSnapshot {
    fingerprint: u64,
    watermark: BoundedLatenessWatermark,
    windows: Vec<(i64, Vec<(GroupKey, Vec<AccumulatorSnapshot>)>)>,
    late_dropped: u64,
    overflow_dropped: u64,
    emitted: u64,
}

/// Folds records into per-(window, group) accumulators and emits each
/// window once the watermark passes its end.
///
/// Each micro-batch is folded into fresh partial accumulators first and
/// merged into the open window state only when the whole batch succeeded,
/// so a failing batch leaves the state untouched. Lateness is judged against
/// the watermark as of the start of the batch; the watermark advances after
/// the batch and never moves backwards. A window that has been emitted is
/// never re-opened.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    node: String,
    spec: WindowSpec,
    assigner: TumblingWindowAssigner,
    watermark: BoundedLatenessWatermark,
    windows: BTreeMap<i64, Groups>,
    late_dropped: u64,
    overflow_dropped: u64,
    emitted: u64,
}

impl WindowAggregator {
    pub fn new(node: impl Into<String>, spec: WindowSpec) -> Self {
        Self {
            node: node.into(),
            assigner: TumblingWindowAssigner::new(spec.duration()),
            watermark: BoundedLatenessWatermark::new(spec.allowed_lateness_ms),
            spec,
            windows: BTreeMap::new(),
            late_dropped: 0,
            overflow_dropped: 0,
            emitted: 0,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark.current()
    }

    pub fn max_event_time(&self) -> Option<i64> {
        self.watermark.max_event_time()
    }

    /// Number of windows holding at least one group
    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn open_groups(&self) -> usize {
        self.windows.values().map(BTreeMap::len).sum()
    }

    /// Total records dropped for arriving after their window closed
    pub fn late_dropped(&self) -> u64 {
        self.late_dropped
    }

    /// Total records dropped by the per-window group cap
    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped
    }

    /// Total aggregate records emitted
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn new_slots(&self) -> Vec<AggregateSlot> {
        self.spec
            .aggregations
            .iter()
            .map(|agg| AggregateSlot::new(agg.kind))
            .collect()
    }

    fn is_open(&self, start: i64, key: &GroupKey) -> bool {
        self.windows
            .get(&start)
            .is_some_and(|groups| groups.contains_key(key))
    }

    /// Fold `records` and emit every window the advanced watermark closes
    pub fn process_batch(&mut self, records: &[Record]) -> Result<WindowBatch> {
        let watermark_at_start = self.watermark.current();
        let mut watermark = self.watermark.clone();
        let mut partials: BTreeMap<i64, Groups> = BTreeMap::new();
        let mut new_groups: HashMap<i64, usize> = HashMap::new();
        let mut late = 0u64;
        let mut overflow = 0u64;

        for record in records {
            let ts = record.event_time_millis();
            let bounds = self.assigner.assign(ts);

            if watermark_at_start.closes(bounds.end) {
                late += 1;
                trace!(
                    node = %self.node,
                    event_time = ts,
                    window = %bounds,
                    watermark = %watermark_at_start,
                    "Dropping late record"
                );
                continue;
            }
            watermark.observe(ts);

            let key = GroupKey(
                self.spec
                    .group_by
                    .iter()
                    .map(|field| record.value(field).clone())
                    .collect(),
            );

            let window = partials.entry(bounds.start).or_default();
            let slots = match window.entry(key) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    if !self.is_open(bounds.start, entry.key()) {
                        let open = self.windows.get(&bounds.start).map_or(0, BTreeMap::len);
                        let added = new_groups.entry(bounds.start).or_insert(0);
                        if open + *added >= self.spec.max_groups {
                            overflow += 1;
                            trace!(
                                node = %self.node,
                                window = %bounds,
                                group = %entry.key(),
                                "Group limit reached, dropping record"
                            );
                            continue;
                        }
                        *added += 1;
                    }
                    entry.insert(self.new_slots())
                }
            };

            for (slot, agg) in slots.iter_mut().zip(&self.spec.aggregations) {
                if agg.field == "*" {
                    slot.fold_row()?;
                } else {
                    slot.fold(record.value(&agg.field))?;
                }
            }
        }

        // The batch folded cleanly; merge it into the open state
        for (start, groups) in partials {
            if groups.is_empty() {
                continue;
            }
            let window = self.windows.entry(start).or_default();
            for (key, slots) in groups {
                match window.entry(key) {
                    Entry::Occupied(mut entry) => {
                        for (open, partial) in entry.get_mut().iter_mut().zip(&slots) {
                            open.merge(partial)?;
                        }
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(slots);
                    }
                }
            }
        }

        self.watermark = watermark;
        self.watermark.advance();

        let (output, closed_windows) = self.emit_closed();

        if late > 0 {
            warn!(
                node = %self.node,
                late_dropped = late,
                watermark = %watermark_at_start,
                "Dropped records that arrived after their window closed"
            );
        }
        if overflow > 0 {
            warn!(
                node = %self.node,
                overflow_dropped = overflow,
                max_groups = self.spec.max_groups,
                "Dropped records for groups beyond the per-window limit"
            );
        }

        self.late_dropped += late;
        self.overflow_dropped += overflow;
        self.emitted += output.len() as u64;

        debug!(
            node = %self.node,
            input = records.len(),
            emitted = output.len(),
            closed_windows,
            open_windows = self.windows.len(),
            watermark = %self.watermark.current(),
            "Window batch processed"
        );

        Ok(WindowBatch {
            output,
            late_dropped: late,
            overflow_dropped: overflow,
            closed_windows,
        })
    }

    fn emit_closed(&mut self) -> (Vec<Record>, usize) {
        let watermark = self.watermark.current();
        let duration = self.spec.duration();
        let mut closed = Vec::new();

        while let Some(entry) = self.windows.first_entry() {
            let bounds = WindowBounds::new(*entry.key(), entry.key().saturating_add(duration));
            if !watermark.closes(bounds.end) {
                break;
            }
            closed.push((bounds, entry.remove()));
        }

        let windows = closed.len();
        let output = closed
            .into_iter()
            .flat_map(|(bounds, groups)| {
                groups
                    .into_iter()
                    .map(move |(key, slots)| (bounds, key, slots))
            })
            .map(|(bounds, key, slots)| self.finalize(bounds, key, &slots))
            .collect();
        (output, windows)
    }

    /// Build the output record of one (window, group)
    fn finalize(&self, bounds: WindowBounds, key: GroupKey, slots: &[AggregateSlot]) -> Record {
        let mut record = Record::new(bounds.start_time().unwrap_or_default())
            .with_field(&self.spec.start_alias, bounds.start_time())
            .with_field(&self.spec.end_alias, bounds.end_time());

        for (field, value) in self.spec.group_by.iter().zip(key.0) {
            record = record.with_field(field, value);
        }

        let finalized: Vec<Value> = slots.iter().map(AggregateSlot::finalize).collect();
        for (agg, value) in self.spec.aggregations.iter().zip(&finalized) {
            record = record.with_field(&agg.alias, round(value.clone(), agg.round));
        }

        // Derived fields use the unrounded aggregates
        let lookup = |alias: &str| {
            self.spec
                .aggregations
                .iter()
                .position(|agg| agg.alias == alias)
                .and_then(|i| finalized.get(i))
                .and_then(Value::as_f64)
        };
        for derived in &self.spec.derived {
            let value = match (lookup(&derived.numerator), lookup(&derived.denominator)) {
                (Some(n), Some(d)) if d != 0.0 => Value::Float(n / d * derived.scale),
                _ => Value::Null,
            };
            record = record.with_field(&derived.alias, round(value, derived.round));
        }

        record
    }

    /// Serialize watermark, open windows and counters
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let snapshot = WindowSnapshot {
            fingerprint: self.spec.fingerprint(),
            watermark: self.watermark.clone(),
            windows: self
                .windows
                .iter()
                .map(|(start, groups)| {
                    let groups = groups
                        .iter()
                        .map(|(key, slots)| {
                            (key.clone(), slots.iter().map(AggregateSlot::snapshot).collect())
                        })
                        .collect();
                    (*start, groups)
                })
                .collect(),
            late_dropped: self.late_dropped,
            overflow_dropped: self.overflow_dropped,
            emitted: self.emitted,
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    /// Replace the state with a snapshot taken under the same window spec
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let snapshot: WindowSnapshot = bincode::deserialize(bytes)?;
        let expected = self.spec.fingerprint();
        if snapshot.fingerprint != expected {
            return Err(WindowError::SnapshotMismatch {
                expected,
                actual: snapshot.fingerprint,
            }
            .into());
        }

        let mut windows = BTreeMap::new();
        for (start, groups) in snapshot.windows {
            let mut restored = Groups::new();
            for (key, slots) in groups {
                let slots = slots
                    .into_iter()
                    .map(AggregateSlot::restore)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                restored.insert(key, slots);
            }
            windows.insert(start, restored);
        }

        self.watermark = snapshot.watermark;
        self.windows = windows;
        self.late_dropped = snapshot.late_dropped;
        self.overflow_dropped = snapshot.overflow_dropped;
        self.emitted = snapshot.emitted;

        debug!(
            node = %self.node,
            open_windows = self.windows.len(),
            watermark = %self.watermark.current(),
            "Window state restored"
        );
        Ok(())
    }
}

fn round(value: Value, digits: Option<u32>) -> Value {
    match (value, digits) {
        (Value::Float(v), Some(digits)) => {
            let factor = 10f64.powi(digits as i32);
            Value::Float((v * factor).round() / factor)
        }
        (value, _) => value,
    }
}
