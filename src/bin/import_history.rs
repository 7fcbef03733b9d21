//! Backfill a wallet's activity history and open positions into the store.
//!
//! Usage: import_history <wallet> [days]   (default: 365 days)

use anyhow::{anyhow, bail, Result};
use colored::Colorize;
use regex::Regex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use polymarket_copy_relay::config::{connect_db, ensure_indexes, load_env, StoreBackend};
use polymarket_copy_relay::persistence::{upsert_activities, upsert_positions, MongoStore, RecordStore, UpsertSummary};
use polymarket_copy_relay::utils::data_api::{fetch_activity_since, fetch_all_positions};
use polymarket_copy_relay::utils::{transform_activity, transform_position, DataApiClient, Logger};

const DEFAULT_HISTORY_DAYS: i64 = 365;

fn parse_args(args: &[String]) -> Result<(String, i64)> {
    let wallet = args
        .first()
        .ok_or_else(|| anyhow!("usage: import_history <wallet> [days]"))?
        .to_lowercase();
    if !Regex::new(r"^0x[a-f0-9]{40}$")?.is_match(&wallet) {
        bail!("{} is not a wallet address", wallet);
    }
    let days = match args.get(1) {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| anyhow!("days must be a positive integer, got {}", raw))?,
        None => DEFAULT_HISTORY_DAYS,
    };
    Ok((wallet, days))
}

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Unix cutoff `days` before `now`.
fn cutoff_timestamp(now: i64, days: i64) -> Result<i64> {
    days.checked_mul(SECONDS_PER_DAY)
        .and_then(|span| now.checked_sub(span))
        .ok_or_else(|| anyhow!("{} days is too far back", days))
}

fn print_summary(label: &str, summary: &UpsertSummary, rejected: usize) {
    println!("{}", format!("{} ({} processed):", label, summary.total()).cyan());
    println!("   New:        {}", summary.inserted.to_string().green());
    println!("   Updated:    {}", summary.updated);
    println!("   Duplicates: {}", summary.unchanged.to_string().bright_black());
    println!("   Failed:     {}", summary.failed.to_string().red());
    if rejected > 0 {
        println!("   Malformed:  {}", rejected.to_string().yellow());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (wallet, days) = parse_args(&args)?;
    let cutoff = cutoff_timestamp(chrono::Utc::now().timestamp(), days)?;

    let env = load_env().map_err(|e| anyhow!("{}", e))?;
    if env.store_backend != StoreBackend::Mongo {
        bail!("import_history writes to MongoDB; set STORE_BACKEND=mongo");
    }
    let uri = env
        .mongo_uri
        .as_deref()
        .ok_or_else(|| anyhow!("MONGO_URI is not set"))?;

    Logger::header(&format!("📥 IMPORTING HISTORY FOR {}", Logger::format_address(&wallet)));
    println!("📅 Period: last {} days\n", days);
    if wallet == env.trader_wallet {
        Logger::warning("This is the copied wallet: a running relay in push mode will see these inserts");
    }

    let db = connect_db(uri, &env.mongo_database).await?;
    ensure_indexes(&db, &env).await?;
    let store: Arc<dyn RecordStore> = Arc::new(MongoStore::new(&db, &env));
    let api = DataApiClient::from_env(&env)?;

    let raw_activity = fetch_activity_since(&api, &wallet, cutoff).await?;
    Logger::info(&format!("Fetched {} activities", raw_activity.len()));

    let mut rejected = 0;
    let activities: Vec<_> = raw_activity
        .into_iter()
        .rev()
        .filter_map(|raw| match transform_activity(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                rejected += 1;
                tracing::warn!(error = %e, "skipping malformed activity");
                None
            }
        })
        .collect();
    let activity_summary = upsert_activities(store.as_ref(), &activities).await;

    let raw_positions = fetch_all_positions(&api, &wallet).await?;
    Logger::info(&format!("Fetched {} open positions", raw_positions.len()));

    let mut rejected_positions = 0;
    let positions: Vec<_> = raw_positions
        .into_iter()
        .filter_map(|raw| match transform_position(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                rejected_positions += 1;
                tracing::warn!(error = %e, "skipping malformed position");
                None
            }
        })
        .collect();
    let position_summary = upsert_positions(store.as_ref(), &positions).await;

    println!();
    print_summary("📊 Activity", &activity_summary, rejected);
    print_summary("📈 Positions", &position_summary, rejected_positions);
    Logger::success("Import completed");
    Ok(())
}
