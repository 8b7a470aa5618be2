//! Resume positions for concurrently handled change records
//!
//! Records of one partition are read in order but their handlers finish in any
//! order. A position may only be stored once every record before it on the same
//! partition is finished, otherwise a restart would skip work that never completed.

use std::collections::{BTreeMap, HashMap};

use super::source::ChangePosition;

#[derive(Debug, Default)]
pub(crate) struct PositionTracker {
    /// Offsets read but not yet stored, per (topic, partition); `true` once finished
    partitions: HashMap<(String, i32), BTreeMap<i64, bool>>,
}

impl PositionTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a position that has been read and is not finished yet.
    pub(crate) fn begin(&mut self, position: &ChangePosition) {
        self.partitions
            .entry((position.topic.clone(), position.partition))
            .or_default()
            .insert(position.offset, false);
    }

    /// Mark a position finished.
    ///
    /// Returns the highest position of its partition below which everything is
    /// finished, when that watermark moved.
    pub(crate) fn finish(&mut self, position: &ChangePosition) -> Option<ChangePosition> {
        let key = (position.topic.clone(), position.partition);
        let pending = self.partitions.get_mut(&key)?;
        *pending.get_mut(&position.offset)? = true;

        let mut watermark = None;
        while let Some(entry) = pending.first_entry() {
            if !*entry.get() {
                break;
            }
            watermark = Some(entry.remove_entry().0);
        }
        if pending.is_empty() {
            self.partitions.remove(&key);
        }

        watermark.map(|offset| ChangePosition {
            topic: position.topic.clone(),
            partition: position.partition,
            offset,
        })
    }

    /// Positions read but not yet stored
    pub(crate) fn pending(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }
}
