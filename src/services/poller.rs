use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Env;
use crate::interfaces::ChangeEvent;
use crate::persistence::{RecordStore, UpsertOutcome, UpsertSummary};
use crate::services::change_notifier::EventSource;
use crate::utils::data_api::MarketData;
use crate::utils::fetch_data::MarketDataError;
use crate::utils::logger::Logger;
use crate::utils::transform::{transform_activity, transform_position};

/// Periodically pulls activity and positions for the tracked wallets into
/// the store. With `emit_events` set, every insert or update it causes is
/// also forwarded as a [`ChangeEvent`], which makes it a complete event
/// source on its own.
pub struct Poller {
    market_data: Arc<dyn MarketData>,
    store: Arc<dyn RecordStore>,
    wallets: Vec<String>,
    activity_interval: Duration,
    position_interval: Duration,
    activity_limit: u32,
    position_limit: u32,
    emit_events: bool,
}

#[derive(Debug, Default)]
pub struct TickResult {
    pub summary: UpsertSummary,
    pub rejected: usize,
    pub events: Vec<ChangeEvent>,
}

impl Poller {
    pub fn new(env: &Env, market_data: Arc<dyn MarketData>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            market_data,
            store,
            wallets: vec![env.trader_wallet.clone()],
            activity_interval: env.activity_poll_interval,
            position_interval: env.position_poll_interval,
            activity_limit: env.activity_page_limit,
            position_limit: env.position_page_limit,
            emit_events: false,
        }
    }

    pub fn emitting_events(mut self, emit: bool) -> Self {
        self.emit_events = emit;
        self
    }

    /// One activity tick: newest page, transformed and upserted. Events are
    /// returned oldest first.
    pub async fn poll_activity(&self, wallet: &str) -> Result<TickResult, MarketDataError> {
        let page = self
            .market_data
            .fetch_activity(wallet, self.activity_limit, 0, None)
            .await?;

        let mut tick = TickResult::default();
        for raw in page.into_iter().rev() {
            let record = match transform_activity(raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(wallet, error = %e, "dropping malformed activity");
                    tick.rejected += 1;
                    continue;
                }
            };
            let outcome = self.store.upsert_activity(&record).await;
            if let UpsertOutcome::Failed(e) = &outcome {
                warn!(key = %record.unique_activity_key, error = %e, "activity upsert failed");
            }
            tick.summary.record(&outcome);
            if matches!(outcome, UpsertOutcome::Inserted) {
                tick.events.push(ChangeEvent::TradeInserted(record));
            }
        }
        Ok(tick)
    }

    pub async fn poll_positions(&self, wallet: &str) -> Result<TickResult, MarketDataError> {
        let page = self
            .market_data
            .fetch_positions(wallet, self.position_limit, 0, None)
            .await?;

        let mut tick = TickResult::default();
        for raw in page {
            let record = match transform_position(raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(wallet, error = %e, "dropping malformed position");
                    tick.rejected += 1;
                    continue;
                }
            };
            let outcome = self.store.upsert_position(&record).await;
            tick.summary.record(&outcome);
            match outcome {
                UpsertOutcome::Inserted => tick.events.push(ChangeEvent::PositionInserted(record)),
                UpsertOutcome::Updated { previous } => tick.events.push(ChangeEvent::PositionUpdated {
                    old: previous,
                    new: record,
                }),
                UpsertOutcome::Unchanged => {}
                UpsertOutcome::Failed(e) => {
                    warn!(asset = %record.asset, error = %e, "position upsert failed");
                }
            }
        }
        Ok(tick)
    }

    /// Seeds the store with the current state of every wallet without
    /// producing events, so history that predates startup is not mirrored.
    pub async fn sync_once(&self) {
        for wallet in &self.wallets {
            match self.poll_activity(wallet).await {
                Ok(tick) => Logger::info(&format!(
                    "Synced activity for {}: {} new, {} known",
                    Logger::format_address(wallet),
                    tick.summary.inserted,
                    tick.summary.unchanged
                )),
                Err(e) => Logger::warning(&format!("Initial activity sync failed: {}", e)),
            }
            match self.poll_positions(wallet).await {
                Ok(tick) => Logger::info(&format!(
                    "Synced positions for {}: {} new, {} updated, {} unchanged",
                    Logger::format_address(wallet),
                    tick.summary.inserted,
                    tick.summary.updated,
                    tick.summary.unchanged
                )),
                Err(e) => Logger::warning(&format!("Initial position sync failed: {}", e)),
            }
        }
    }

    /// Returns false once the receiving side is gone.
    async fn forward(&self, events: &mpsc::Sender<ChangeEvent>, tick: TickResult) -> bool {
        if !self.emit_events {
            return true;
        }
        for event in tick.events {
            if events.send(event).await.is_err() {
                return false;
            }
        }
        true
    }

    async fn activity_loop(&self, wallet: &str, events: &mpsc::Sender<ChangeEvent>, shutdown: &CancellationToken) {
        let mut ticker = interval(self.activity_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match self.poll_activity(wallet).await {
                Ok(tick) => {
                    debug!(wallet, inserted = tick.summary.inserted, "activity tick");
                    if !self.forward(events, tick).await {
                        return;
                    }
                }
                Err(e) => warn!(wallet, error = %e, "activity poll failed, retrying next tick"),
            }
        }
    }

    async fn position_loop(&self, wallet: &str, events: &mpsc::Sender<ChangeEvent>, shutdown: &CancellationToken) {
        let mut ticker = interval(self.position_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match self.poll_positions(wallet).await {
                Ok(tick) => {
                    debug!(
                        wallet,
                        inserted = tick.summary.inserted,
                        updated = tick.summary.updated,
                        "position tick"
                    );
                    if !self.forward(events, tick).await {
                        return;
                    }
                }
                Err(e) => warn!(wallet, error = %e, "position poll failed, retrying next tick"),
            }
        }
    }
}

#[async_trait]
impl EventSource for Poller {
    fn name(&self) -> &'static str {
        "poller"
    }

    async fn run(self: Box<Self>, events: mpsc::Sender<ChangeEvent>, shutdown: CancellationToken) -> Result<()> {
        info!(
            wallets = self.wallets.len(),
            activity_secs = self.activity_interval.as_secs(),
            position_secs = self.position_interval.as_secs(),
            emit_events = self.emit_events,
            "poller started"
        );

        let poller: &Poller = &self;
        let loops = self.wallets.iter().map(|wallet| {
            let events = events.clone();
            let shutdown = shutdown.clone();
            async move {
                tokio::join!(
                    poller.activity_loop(wallet, &events, &shutdown),
                    poller.position_loop(wallet, &events, &shutdown),
                );
            }
        });
        futures_util::future::join_all(loops).await;

        info!("poller stopped");
        Ok(())
    }
}
