//! Processed-ids ledger
//!
//! Ids of inbound objects whose dispatch completed. Replay skips them.

use std::collections::HashSet;
use std::sync::Arc;

use super::record::{KeyedRecordStore, Record, StoreError, Table};

pub struct ProcessedLedger {
    store: Arc<dyn KeyedRecordStore>,
}

impl ProcessedLedger {
    pub fn new(store: Arc<dyn KeyedRecordStore>) -> Self {
        Self { store }
    }

    pub async fn mark(&self, id: &str) -> Result<(), StoreError> {
        self.store
            .append(&Table::Processed, Record::new().with("id", id))
            .await
    }

    pub async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(!self.store.search(&Table::Processed, "id", id).await?.is_empty())
    }

    /// Snapshot of every processed id.
    pub async fn ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .store
            .scan(&Table::Processed)
            .await?
            .iter()
            .filter_map(|record| record.get("id").map(str::to_string))
            .collect())
    }
}
