//! High-water-mark storage.
//!
//! The scheduler reads an account's mark before each poll and commits a new
//! one after delivery. Marks only ever move forward: a commit below the
//! stored value is ignored.
//!
//! - [`MemoryMarkStore`] keeps marks for the lifetime of the process.
//! - [`FileMarkStore`] additionally persists them to a JSON file after every
//!   commit so a restart does not relay the same check-ins again.

mod file;
mod memory;

pub use file::FileMarkStore;
pub use memory::MemoryMarkStore;

use crate::entities::{AccountId, CheckinId, HighWaterMark};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Snapshot of every stored mark, keyed by account.
pub type MarkMap = BTreeMap<AccountId, CheckinId>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("mark store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mark store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait MarkStore: Send + Sync {
    /// Current mark of `account`.
    async fn get(&self, account: &AccountId) -> Result<HighWaterMark, StoreError>;

    /// Advance the mark of `account` to `mark`.
    ///
    /// Returns the stored mark afterwards, which is `mark` unless a larger
    /// value was already committed.
    async fn commit(&self, account: &AccountId, mark: CheckinId) -> Result<CheckinId, StoreError>;

    /// All stored marks.
    async fn snapshot(&self) -> Result<MarkMap, StoreError>;
}

/// Monotonic update shared by the store implementations.
fn advance(marks: &mut MarkMap, account: &AccountId, mark: CheckinId) -> CheckinId {
    let stored = marks.entry(account.clone()).or_insert(mark);
    *stored = (*stored).max(mark);
    *stored
}
