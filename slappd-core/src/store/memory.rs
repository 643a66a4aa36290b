use super::{MarkMap, MarkStore, StoreError, advance};
use crate::entities::{AccountId, CheckinId, HighWaterMark};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Process-lifetime mark store.
#[derive(Debug, Default)]
pub struct MemoryMarkStore {
    marks: RwLock<MarkMap>,
}

impl MemoryMarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously known marks.
    pub fn with_marks(marks: MarkMap) -> Self {
        Self {
            marks: RwLock::new(marks),
        }
    }
}

#[async_trait]
impl MarkStore for MemoryMarkStore {
    async fn get(&self, account: &AccountId) -> Result<HighWaterMark, StoreError> {
        Ok(self.marks.read().await.get(account).copied())
    }

    async fn commit(&self, account: &AccountId, mark: CheckinId) -> Result<CheckinId, StoreError> {
        let mut marks = self.marks.write().await;
        Ok(advance(&mut marks, account, mark))
    }

    async fn snapshot(&self) -> Result<MarkMap, StoreError> {
        Ok(self.marks.read().await.clone())
    }
}
