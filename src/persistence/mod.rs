//! Idempotent storage for observed activity and positions.
//!
//! Both the change-feed path and the poller write through [`RecordStore`],
//! so every write is keyed (unique activity key, or asset + wallet) and
//! safe to race.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use thiserror::Error;

use crate::interfaces::{ActivityRecord, PositionRecord};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// A position only counts as changed when its size moves by more than this.
pub const POSITION_SIZE_TOLERANCE: f64 = 0.1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("could not encode record: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("could not decode stored record: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    #[error("concurrent write to {0} lost the race")]
    Conflict(String),
}

#[derive(Debug)]
pub enum UpsertOutcome<T> {
    Inserted,
    Updated { previous: T },
    Unchanged,
    Failed(StoreError),
}

impl<T> UpsertOutcome<T> {
    pub fn is_write(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Updated { .. })
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts the activity unless its unique key is already stored.
    async fn upsert_activity(&self, record: &ActivityRecord) -> UpsertOutcome<ActivityRecord>;

    /// Inserts the position, or updates it when the size changed beyond
    /// [`POSITION_SIZE_TOLERANCE`].
    async fn upsert_position(&self, record: &PositionRecord) -> UpsertOutcome<PositionRecord>;

    async fn find_position(&self, proxy_wallet: &str, asset: &str) -> Result<Option<PositionRecord>, StoreError>;
}

pub fn position_changed(stored: &PositionRecord, incoming: &PositionRecord) -> bool {
    (stored.size - incoming.size).abs() > POSITION_SIZE_TOLERANCE
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl UpsertSummary {
    pub fn record<T>(&mut self, outcome: &UpsertOutcome<T>) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated { .. } => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.failed
    }
}

pub async fn upsert_activities(store: &dyn RecordStore, records: &[ActivityRecord]) -> UpsertSummary {
    let mut summary = UpsertSummary::default();
    for record in records {
        let outcome = store.upsert_activity(record).await;
        if let UpsertOutcome::Failed(e) = &outcome {
            tracing::warn!(key = %record.unique_activity_key, error = %e, "activity upsert failed");
        }
        summary.record(&outcome);
    }
    summary
}

pub async fn upsert_positions(store: &dyn RecordStore, records: &[PositionRecord]) -> UpsertSummary {
    let mut summary = UpsertSummary::default();
    for record in records {
        let outcome = store.upsert_position(record).await;
        if let UpsertOutcome::Failed(e) = &outcome {
            tracing::warn!(asset = %record.asset, wallet = %record.proxy_wallet, error = %e, "position upsert failed");
        }
        summary.record(&outcome);
    }
    summary
}
