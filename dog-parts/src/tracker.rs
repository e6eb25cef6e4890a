//! Completeness bookkeeping for a single object.
//!
//! Parts for one key can land out of order, so completeness is decided from
//! the accumulated index set against the declared final index, never from
//! arrival order.

use parking_lot::Mutex;
use std::collections::BTreeSet;

use crate::{Part, PartError, PartResult};

#[derive(Debug, Default)]
struct TrackerState {
    received: BTreeSet<u64>,
    final_index: Option<u64>,
}

impl TrackerState {
    fn check(&self, part: &Part) -> PartResult<()> {
        if let Some(final_index) = self.final_index {
            if part.is_final && part.part_index != final_index {
                return Err(PartError::invalid(format!(
                    "Final part of {} already seen at index {}, got another at {}",
                    part.key, final_index, part.part_index
                )));
            }
            if part.part_index > final_index {
                return Err(PartError::invalid(format!(
                    "Part {} of {} is past the final part {}",
                    part.part_index, part.key, final_index
                )));
            }
        }

        if part.is_final {
            if let Some(highest) = self.received.last() {
                if *highest > part.part_index {
                    return Err(PartError::invalid(format!(
                        "Final part {} of {} precedes already received part {}",
                        part.part_index, part.key, highest
                    )));
                }
            }
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        // Indices are unique, so a full set below the bound means no gaps.
        match self.final_index {
            Some(final_index) => {
                self.received.last() == Some(&final_index)
                    && final_index
                        .checked_add(1)
                        .is_some_and(|expected| self.received.len() as u64 == expected)
            }
            None => false,
        }
    }
}

/// Tracks which part indices of an object have been supplied
#[derive(Debug, Default)]
pub struct CompletenessTracker {
    state: Mutex<TrackerState>,
}

impl CompletenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `part` against what has been recorded without recording it
    pub fn check(&self, part: &Part) -> PartResult<()> {
        self.state.lock().check(part)
    }

    /// Record `part` as received. Recording the same index twice is a no-op.
    pub fn add(&self, part: &Part) -> PartResult<()> {
        let mut state = self.state.lock();
        state.check(part)?;

        if part.is_final {
            state.final_index = Some(part.part_index);
        }
        state.received.insert(part.part_index);
        Ok(())
    }

    /// Record `part` and report completeness under the same lock
    pub fn add_and_check(&self, part: &Part) -> PartResult<bool> {
        let mut state = self.state.lock();
        state.check(part)?;

        if part.is_final {
            state.final_index = Some(part.part_index);
        }
        state.received.insert(part.part_index);
        Ok(state.is_complete())
    }

    /// True iff the final index is known and every index up to it is present
    pub fn is_complete(&self) -> bool {
        self.state.lock().is_complete()
    }

    pub fn received_count(&self) -> usize {
        self.state.lock().received.len()
    }

    pub fn final_index(&self) -> Option<u64> {
        self.state.lock().final_index
    }

    /// The lowest `limit` indices up to the final index that have not
    /// arrived yet. Walks the gaps between received indices, so the cost
    /// does not depend on how large the final index is.
    pub fn missing(&self, limit: usize) -> Vec<u64> {
        let state = self.state.lock();
        let Some(final_index) = state.final_index else {
            return Vec::new();
        };

        let mut missing = Vec::new();
        let mut next = 0u64;
        for &received in state.received.range(..=final_index) {
            let gap = (next..received).take(limit - missing.len());
            missing.extend(gap);
            if missing.len() == limit {
                return missing;
            }
            match received.checked_add(1) {
                Some(after) => next = after,
                None => return missing,
            }
        }
        missing.extend((next..=final_index).take(limit - missing.len()));
        missing
    }
}
