use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{position_changed, RecordStore, StoreError, UpsertOutcome};
use crate::interfaces::{ActivityRecord, PositionRecord};

/// Process-local store with the same keying rules as the MongoDB backend.
/// Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    activities: Mutex<HashMap<String, ActivityRecord>>,
    positions: Mutex<HashMap<(String, String), PositionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn activity_count(&self) -> usize {
        self.activities.lock().await.len()
    }

    pub async fn position_count(&self) -> usize {
        self.positions.lock().await.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_activity(&self, record: &ActivityRecord) -> UpsertOutcome<ActivityRecord> {
        let mut activities = self.activities.lock().await;
        if activities.contains_key(&record.unique_activity_key) {
            return UpsertOutcome::Unchanged;
        }
        activities.insert(record.unique_activity_key.clone(), record.clone());
        UpsertOutcome::Inserted
    }

    async fn upsert_position(&self, record: &PositionRecord) -> UpsertOutcome<PositionRecord> {
        let key = (record.asset.clone(), record.proxy_wallet.clone());
        let mut positions = self.positions.lock().await;
        match positions.get_mut(&key) {
            None => {
                positions.insert(key, record.clone());
                UpsertOutcome::Inserted
            }
            Some(stored) if position_changed(stored, record) => {
                let previous = std::mem::replace(stored, record.clone());
                UpsertOutcome::Updated { previous }
            }
            Some(_) => UpsertOutcome::Unchanged,
        }
    }

    async fn find_position(&self, proxy_wallet: &str, asset: &str) -> Result<Option<PositionRecord>, StoreError> {
        let key = (asset.to_string(), proxy_wallet.to_string());
        Ok(self.positions.lock().await.get(&key).cloned())
    }
}
