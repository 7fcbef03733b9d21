use async_trait::async_trait;
use mongodb::bson::{doc, from_document, to_document, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::UpdateOptions;
use mongodb::{Collection, Database};

use super::{position_changed, RecordStore, StoreError, UpsertOutcome};
use crate::config::{get_positions_collection, get_trades_collection, Env};
use crate::interfaces::{ActivityRecord, PositionRecord};

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStore {
    trades: Collection<Document>,
    positions: Collection<Document>,
}

impl MongoStore {
    pub fn new(db: &Database, env: &Env) -> Self {
        Self {
            trades: get_trades_collection(db, env),
            positions: get_positions_collection(db, env),
        }
    }

    async fn try_upsert_activity(&self, record: &ActivityRecord) -> Result<UpsertOutcome<ActivityRecord>, StoreError> {
        let filter = doc! { "unique_activity_key": record.unique_activity_key.as_str() };
        let update = doc! { "$setOnInsert": to_document(record)? };
        let options = UpdateOptions::builder().upsert(true).build();

        match self.trades.update_one(filter, update, options).await {
            Ok(result) if result.upserted_id.is_some() => Ok(UpsertOutcome::Inserted),
            Ok(_) => Ok(UpsertOutcome::Unchanged),
            // Two writers upserting the same key: the loser sees E11000.
            Err(e) if is_duplicate_key(&e) => Ok(UpsertOutcome::Unchanged),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_upsert_position(&self, record: &PositionRecord) -> Result<UpsertOutcome<PositionRecord>, StoreError> {
        let filter = doc! { "asset": record.asset.as_str(), "proxy_wallet": record.proxy_wallet.as_str() };

        let Some(stored) = self.positions.find_one(filter.clone(), None).await? else {
            return match self.positions.insert_one(to_document(record)?, None).await {
                Ok(_) => Ok(UpsertOutcome::Inserted),
                Err(e) if is_duplicate_key(&e) => Ok(UpsertOutcome::Unchanged),
                Err(e) => Err(e.into()),
            };
        };

        let previous: PositionRecord = from_document(stored)?;
        if !position_changed(&previous, record) {
            return Ok(UpsertOutcome::Unchanged);
        }

        // Only overwrite the row we compared against.
        let mut guarded = filter;
        guarded.insert("size", previous.size);
        let result = self
            .positions
            .update_one(guarded, doc! { "$set": to_document(record)? }, None)
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::Conflict(format!("{}/{}", record.proxy_wallet, record.asset)));
        }
        Ok(UpsertOutcome::Updated { previous })
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl RecordStore for MongoStore {
    async fn upsert_activity(&self, record: &ActivityRecord) -> UpsertOutcome<ActivityRecord> {
        self.try_upsert_activity(record)
            .await
            .unwrap_or_else(UpsertOutcome::Failed)
    }

    async fn upsert_position(&self, record: &PositionRecord) -> UpsertOutcome<PositionRecord> {
        self.try_upsert_position(record)
            .await
            .unwrap_or_else(UpsertOutcome::Failed)
    }

    async fn find_position(&self, proxy_wallet: &str, asset: &str) -> Result<Option<PositionRecord>, StoreError> {
        let filter = doc! { "asset": asset, "proxy_wallet": proxy_wallet };
        match self.positions.find_one(filter, None).await? {
            Some(stored) => Ok(Some(from_document(stored)?)),
            None => Ok(None),
        }
    }
}
