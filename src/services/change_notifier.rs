//! Event sources feeding the decision handler.
//!
//! [`MongoChangeFeed`] pushes row-level changes from MongoDB change streams;
//! the poller is the poll-derived alternative. Both deliver the same
//! [`ChangeEvent`]s into one channel.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use mongodb::bson::{doc, from_document, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType, ResumeToken};
use mongodb::change_stream::ChangeStream;
use mongodb::options::{ChangeStreamOptions, FullDocumentBeforeChangeType, FullDocumentType};
use mongodb::{Collection, Database};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{get_positions_collection, get_trades_collection, Env};
use crate::interfaces::{ActivityRecord, ChangeEvent, PositionRecord};
use crate::utils::logger::Logger;

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const RECONNECT_DELAY_SECS: u64 = 5;

#[async_trait]
pub trait EventSource: Send {
    fn name(&self) -> &'static str;

    /// Delivers events until `shutdown` fires or the source gives up.
    async fn run(self: Box<Self>, events: mpsc::Sender<ChangeEvent>, shutdown: CancellationToken) -> Result<()>;
}

/// Linear backoff capped at five steps.
pub fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_secs(RECONNECT_DELAY_SECS * attempt.clamp(1, 5) as u64)
}

pub struct MongoChangeFeed {
    trades: Collection<Document>,
    positions: Collection<Document>,
    trader_wallet: String,
    trades_resume: Option<ResumeToken>,
    positions_resume: Option<ResumeToken>,
    connected: bool,
}

enum FeedExit {
    Shutdown,
    ReceiverClosed,
}

impl MongoChangeFeed {
    pub fn new(db: &Database, env: &Env) -> Self {
        Self {
            trades: get_trades_collection(db, env),
            positions: get_positions_collection(db, env),
            trader_wallet: env.trader_wallet.to_lowercase(),
            trades_resume: None,
            positions_resume: None,
            connected: false,
        }
    }

    fn options(resume: Option<ResumeToken>) -> ChangeStreamOptions {
        ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .full_document_before_change(Some(FullDocumentBeforeChangeType::WhenAvailable))
            .resume_after(resume)
            .build()
    }

    async fn open(&self) -> Result<(ChangeStream<ChangeStreamEvent<Document>>, ChangeStream<ChangeStreamEvent<Document>>)> {
        let inserts = [doc! { "$match": { "operationType": "insert" } }];
        let writes = [doc! { "$match": { "operationType": { "$in": ["insert", "update", "replace"] } } }];

        let trades = self
            .trades
            .watch(inserts, Self::options(self.trades_resume.clone()))
            .await?;
        let positions = self
            .positions
            .watch(writes, Self::options(self.positions_resume.clone()))
            .await?;
        Ok((trades, positions))
    }

    /// Runs until shutdown, a closed receiver, or a stream error.
    async fn pump(&mut self, events: &mpsc::Sender<ChangeEvent>, shutdown: &CancellationToken) -> Result<FeedExit> {
        let (mut trades, mut positions) = self.open().await?;
        self.connected = true;
        Logger::success("Change streams open on trades and positions");

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return Ok(FeedExit::Shutdown),
                change = trades.next() => {
                    let change = change.ok_or_else(|| anyhow!("trades change stream ended"))??;
                    self.trades_resume = trades.resume_token();
                    trade_event(change)
                }
                change = positions.next() => {
                    let change = change.ok_or_else(|| anyhow!("positions change stream ended"))??;
                    self.positions_resume = positions.resume_token();
                    position_event(change)
                }
            };

            let Some(event) = event else { continue };
            if event.wallet().to_lowercase() != self.trader_wallet {
                debug!(wallet = event.wallet(), kind = event.kind(), "ignoring change for untracked wallet");
                continue;
            }
            if events.send(event).await.is_err() {
                return Ok(FeedExit::ReceiverClosed);
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(document: Option<Document>, what: &str) -> Option<T> {
    let document = document?;
    match from_document(document) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "could not decode {} from change stream", what);
            None
        }
    }
}

fn trade_event(change: ChangeStreamEvent<Document>) -> Option<ChangeEvent> {
    match change.operation_type {
        OperationType::Insert => decode::<ActivityRecord>(change.full_document, "trade").map(ChangeEvent::TradeInserted),
        _ => None,
    }
}

fn position_event(change: ChangeStreamEvent<Document>) -> Option<ChangeEvent> {
    match change.operation_type {
        OperationType::Insert => {
            decode::<PositionRecord>(change.full_document, "position").map(ChangeEvent::PositionInserted)
        }
        OperationType::Update | OperationType::Replace => {
            let new = decode::<PositionRecord>(change.full_document, "position")?;
            let Some(old) = decode::<PositionRecord>(change.full_document_before_change, "previous position") else {
                warn!(asset = %new.asset, "position update without pre-image, enable changeStreamPreAndPostImages");
                return None;
            };
            Some(ChangeEvent::PositionUpdated { old, new })
        }
        _ => None,
    }
}

#[async_trait]
impl EventSource for MongoChangeFeed {
    fn name(&self) -> &'static str {
        "mongo-change-feed"
    }

    async fn run(mut self: Box<Self>, events: mpsc::Sender<ChangeEvent>, shutdown: CancellationToken) -> Result<()> {
        let mut reconnect_attempts = 0;

        loop {
            match self.pump(&events, &shutdown).await {
                Ok(FeedExit::Shutdown) => {
                    info!("change feed stopped");
                    return Ok(());
                }
                Ok(FeedExit::ReceiverClosed) => {
                    info!("event receiver closed, change feed stopping");
                    return Ok(());
                }
                Err(e) => {
                    // A feed that was up before failing starts a fresh backoff.
                    if std::mem::take(&mut self.connected) {
                        reconnect_attempts = 0;
                    }
                    reconnect_attempts += 1;
                    if reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
                        Logger::error(&format!(
                            "Max reconnection attempts ({}) reached for change streams",
                            MAX_RECONNECT_ATTEMPTS
                        ));
                        return Err(e);
                    }
                    let delay = reconnect_delay(reconnect_attempts);
                    Logger::warning(&format!(
                        "Change stream error: {}. Reconnecting in {}s (attempt {}/{})...",
                        e,
                        delay.as_secs(),
                        reconnect_attempts,
                        MAX_RECONNECT_ATTEMPTS
                    ));
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
