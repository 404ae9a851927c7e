//! Per-node checkpoints
//!
//! A checkpoint records how far a node has consumed each of its inputs, the
//! next offset of its own output table and, for windowed nodes, the
//! serialized window state. Restarting from a checkpoint and replaying the
//! inputs from its offsets reproduces exactly the state the node had.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{StateError, StateResult};

/// Input name used for records pulled from the event source
pub const SOURCE_INPUT: &str = "$source";

/// Checkpoint of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub node: String,
    /// Next offset to read, per upstream name (or [`SOURCE_INPUT`])
    pub input_offsets: BTreeMap<String, u64>,
    /// Offset the next output record will be written at
    pub output_offset: u64,
    /// Number of committed micro-batches
    pub batch_id: u64,
    /// Serialized window state of windowed nodes
    pub window_state: Option<Vec<u8>>,
    pub committed_at: DateTime<Utc>,
    /// Integrity checksum over every other field except `committed_at`
    pub checksum: u64,
}

impl Checkpoint {
    /// The checkpoint of a node that has not committed anything yet
    pub fn initial(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            input_offsets: BTreeMap::new(),
            output_offset: 0,
            batch_id: 0,
            window_state: None,
            committed_at: Utc::now(),
            checksum: 0,
        }
        .sealed()
    }

    /// Next offset to read from `input`
    pub fn input_offset(&self, input: &str) -> u64 {
        self.input_offsets.get(input).copied().unwrap_or(0)
    }

    /// The checkpoint after committing one more micro-batch
    pub fn advance(
        &self,
        input_offsets: BTreeMap<String, u64>,
        output_records: u64,
        window_state: Option<Vec<u8>>,
    ) -> Self {
        Self {
            node: self.node.clone(),
            input_offsets,
            output_offset: self.output_offset + output_records,
            batch_id: self.batch_id + 1,
            window_state,
            committed_at: Utc::now(),
            checksum: 0,
        }
        .sealed()
    }

    fn sealed(mut self) -> Self {
        self.checksum = self.compute_checksum();
        self
    }

    fn compute_checksum(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update((self.node.len() as u64).to_le_bytes());
        hasher.update(self.node.as_bytes());
        for (input, offset) in &self.input_offsets {
            hasher.update((input.len() as u64).to_le_bytes());
            hasher.update(input.as_bytes());
            hasher.update(offset.to_le_bytes());
        }
        hasher.update(self.output_offset.to_le_bytes());
        hasher.update(self.batch_id.to_le_bytes());
        match &self.window_state {
            Some(state) => {
                hasher.update((state.len() as u64).to_le_bytes());
                hasher.update(state);
            }
            None => hasher.update(u64::MAX.to_le_bytes()),
        }

        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(prefix)
    }

    /// Verify the checksum
    pub fn validate(&self) -> StateResult<()> {
        let calculated = self.compute_checksum();
        if calculated != self.checksum {
            return Err(StateError::CorruptedCheckpoint {
                node: self.node.clone(),
                reason: format!(
                    "checksum mismatch: stored {:016x}, calculated {:016x}",
                    self.checksum, calculated
                ),
            });
        }
        Ok(())
    }

    /// Reject `next` if it moves any offset of this checkpoint backwards
    pub fn ensure_progress(&self, next: &Checkpoint) -> StateResult<()> {
        let regression = |input: &str, committed: u64, attempted: u64| {
            StateError::OffsetRegression {
                node: self.node.clone(),
                input: input.to_string(),
                committed,
                attempted,
            }
        };

        for (input, &committed) in &self.input_offsets {
            let attempted = next.input_offset(input);
            if attempted < committed {
                return Err(regression(input, committed, attempted));
            }
        }
        if next.output_offset < self.output_offset {
            return Err(regression("$output", self.output_offset, next.output_offset));
        }
        Ok(())
    }

    pub fn encode(&self) -> StateResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StateError::SerializationFailed {
            key: self.node.clone(),
            reason: e.to_string(),
        })
    }

    /// Decode and validate a stored checkpoint
    pub fn decode(node: &str, bytes: &[u8]) -> StateResult<Self> {
        let checkpoint: Checkpoint =
            bincode::deserialize(bytes).map_err(|e| StateError::DeserializationFailed {
                key: node.to_string(),
                reason: e.to_string(),
            })?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }
}
