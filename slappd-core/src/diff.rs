//! Deduplication of fetched check-ins against the stored high-water mark.

use crate::entities::{CheckinEvent, HighWaterMark};
use itertools::Itertools;

/// Result of diffing one fetched batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    /// Events newer than the previous mark, ascending by id.
    pub new_events: Vec<CheckinEvent>,
    /// Mark to commit once every event in `new_events` has been delivered.
    pub new_mark: HighWaterMark,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.new_events.is_empty()
    }
}

/// Compute the events of `batch` that still have to be relayed.
///
/// The batch may be in any order. `new_mark` is taken over the whole batch,
/// not only the new events, and never drops below `previous`.
pub fn compute(previous: HighWaterMark, batch: &[CheckinEvent]) -> Diff {
    let new_events = batch
        .iter()
        .filter(|event| previous.is_none_or(|mark| event.id > mark))
        .cloned()
        .sorted_by_key(|event| event.id)
        .collect();

    let batch_max = batch.iter().map(|event| event.id).max();
    let new_mark = previous.max(batch_max);

    Diff {
        new_events,
        new_mark,
    }
}
