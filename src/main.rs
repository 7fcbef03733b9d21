use anyhow::{anyhow, Result};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use polymarket_copy_relay::config::{connect_db, ensure_indexes, load_env, EventSourceKind, StoreBackend};
use polymarket_copy_relay::persistence::{MemoryStore, MongoStore, RecordStore};
use polymarket_copy_relay::services::{start_trade_executor, EventSource, MongoChangeFeed, OrderDecisionHandler, Poller};
use polymarket_copy_relay::utils::{
    create_clob_client, ClobOrderSubmitter, DataApiClient, Logger, MarketData, OrderSubmitter, PreviewSubmitter,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let env = match load_env() {
        Ok(env) => Arc::new(env),
        Err(e) => {
            eprintln!("{}", "Configuration error, nothing was started:".red().bold());
            for problem in e.problems() {
                eprintln!("  - {}", problem);
            }
            std::process::exit(1);
        }
    };

    Logger::startup(&env);

    let market_data: Arc<dyn MarketData> = Arc::new(DataApiClient::from_env(&env)?);

    let (store, db): (Arc<dyn RecordStore>, _) = match env.store_backend {
        StoreBackend::Mongo => {
            let uri = env
                .mongo_uri
                .as_deref()
                .ok_or_else(|| anyhow!("MONGO_URI is required for the mongo backend"))?;
            let db = connect_db(uri, &env.mongo_database).await?;
            ensure_indexes(&db, &env).await?;
            (Arc::new(MongoStore::new(&db, &env)), Some(db))
        }
        StoreBackend::Memory => {
            Logger::warning("Using the in-memory store: nothing is persisted across restarts");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let submitter: Arc<dyn OrderSubmitter> = if env.preview_mode {
        Logger::warning("PREVIEW MODE: orders are logged, not placed");
        Arc::new(PreviewSubmitter::new())
    } else {
        Logger::info("Initializing CLOB client...");
        let (client, signer) = create_clob_client(&env).await?;
        Logger::success("CLOB client ready");
        Arc::new(ClobOrderSubmitter::new(client, signer))
    };

    let poller = Poller::new(&env, market_data.clone(), store.clone());
    Logger::info("Syncing current state before mirroring...");
    poller.sync_once().await;

    let mut sources: Vec<Box<dyn EventSource>> = Vec::new();
    match (env.event_source, db.as_ref()) {
        (EventSourceKind::Push, Some(db)) => {
            sources.push(Box::new(MongoChangeFeed::new(db, &env)));
            // Keeps the store reconciled; the change feed reports what it writes.
            sources.push(Box::new(poller.emitting_events(false)));
        }
        _ => sources.push(Box::new(poller.emitting_events(true))),
    }

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let handler = Arc::new(OrderDecisionHandler::new(&env, market_data, submitter));

    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
    {
        let shutdown = shutdown.clone();
        tasks.push((
            "trade-executor",
            tokio::spawn(async move {
                if let Err(e) = start_trade_executor(events_rx, handler, shutdown.clone()).await {
                    Logger::error(&format!("Trade executor failed: {}", e));
                    shutdown.cancel();
                }
            }),
        ));
    }
    for source in sources {
        let name = source.name();
        let events = events_tx.clone();
        let shutdown = shutdown.clone();
        Logger::info(&format!("Starting {}...", name));
        tasks.push((
            name,
            tokio::spawn(async move {
                if let Err(e) = source.run(events, shutdown.clone()).await {
                    Logger::error(&format!("{} stopped: {}", name, e));
                    shutdown.cancel();
                }
            }),
        ));
    }
    drop(events_tx);

    Logger::success(&format!("Mirroring {}", Logger::format_address(&env.trader_wallet)));
    Logger::separator();

    tokio::select! {
        result = signal::ctrl_c() => {
            Logger::separator();
            match result {
                Ok(()) => Logger::info("Received SIGINT, initiating graceful shutdown..."),
                Err(err) => Logger::error(&format!("Unable to listen for shutdown signal: {}", err)),
            }
        }
        _ = shutdown.cancelled() => {
            Logger::error("A service failed, shutting down");
        }
    }
    shutdown.cancel();

    let deadline = tokio::time::Instant::now() + SHUTDOWN_TIMEOUT;
    for (name, mut handle) in tasks {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => info!(task = name, "stopped"),
            Ok(Err(e)) => warn!(task = name, error = %e, "task panicked"),
            Err(_) => {
                warn!(task = name, "did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    Logger::success("Graceful shutdown completed");
    Ok(())
}
