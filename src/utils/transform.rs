//! Maps data API records onto the stored schema.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::interfaces::{ActivityRecord, ActivityType, ApiActivity, ApiPosition, PositionRecord, Side};

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("timestamp {0} is out of range")]
    BadTimestamp(i64),
}

/// Millisecond timestamps are normalised to seconds.
pub fn normalize_timestamp(ts: i64) -> i64 {
    if ts > 1_000_000_000_000 {
        ts / 1000
    } else {
        ts
    }
}

/// Python-compatible float rendering (`1.0`, `0.071`) so keys stay stable
/// across ingestion paths.
fn render_price(price: f64) -> String {
    let rendered = price.to_string();
    if rendered.contains(['.', 'e', 'E']) || !price.is_finite() {
        rendered
    } else {
        format!("{}.0", rendered)
    }
}

/// Deduplication key over (transaction hash, condition id, price).
pub fn unique_activity_key(transaction_hash: &str, condition_id: Option<&str>, price: Option<f64>) -> String {
    let condition = condition_id.filter(|c| !c.is_empty()).unwrap_or("null");
    let price = price.map(render_price).unwrap_or_else(|| "null".to_string());
    format!("{}_{}_{}", transaction_hash, condition, price)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn transform_activity(raw: ApiActivity) -> Result<ActivityRecord, TransformError> {
    let transaction_hash =
        non_empty(raw.transaction_hash).ok_or(TransformError::MissingField("transactionHash"))?;
    let proxy_wallet = non_empty(raw.proxy_wallet)
        .ok_or(TransformError::MissingField("proxyWallet"))?
        .to_lowercase();
    let timestamp = normalize_timestamp(raw.timestamp.ok_or(TransformError::MissingField("timestamp"))?);
    let activity_datetime =
        DateTime::<Utc>::from_timestamp(timestamp, 0).ok_or(TransformError::BadTimestamp(timestamp))?;

    let condition_id = non_empty(raw.condition_id);
    let unique_activity_key = unique_activity_key(&transaction_hash, condition_id.as_deref(), raw.price);

    Ok(ActivityRecord {
        proxy_wallet,
        timestamp,
        activity_datetime,
        condition_id,
        activity_type: raw
            .activity_type
            .map(ActivityType::from)
            .unwrap_or(ActivityType::Other(String::new())),
        asset: non_empty(raw.asset),
        side: raw.side.as_deref().and_then(Side::parse),
        size: raw.size.unwrap_or(0.0),
        usdc_size: raw.usdc_size.unwrap_or(0.0),
        price: raw.price,
        transaction_hash,
        outcome_index: raw.outcome_index,
        outcome: raw.outcome,
        title: raw.title,
        slug: raw.slug,
        event_slug: raw.event_slug,
        icon: raw.icon,
        trader_name: non_empty(raw.name),
        pseudonym: non_empty(raw.pseudonym),
        bio: non_empty(raw.bio),
        profile_image: non_empty(raw.profile_image),
        profile_image_optimized: non_empty(raw.profile_image_optimized),
        unique_activity_key,
    })
}

/// Accepts `2025-11-04` as well as full RFC 3339 timestamps.
fn parse_end_date(value: Option<String>) -> Option<NaiveDate> {
    let value = non_empty(value)?;
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(&value).ok().map(|dt| dt.date_naive()))
        .or_else(|| value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

pub fn transform_position(raw: ApiPosition) -> Result<PositionRecord, TransformError> {
    let asset = non_empty(raw.asset).ok_or(TransformError::MissingField("asset"))?;
    let proxy_wallet = non_empty(raw.proxy_wallet)
        .ok_or(TransformError::MissingField("proxyWallet"))?
        .to_lowercase();

    Ok(PositionRecord {
        proxy_wallet,
        asset,
        condition_id: non_empty(raw.condition_id),
        size: raw.size.unwrap_or(0.0),
        avg_price: raw.avg_price.unwrap_or(0.0),
        initial_value: raw.initial_value.unwrap_or(0.0),
        current_value: raw.current_value.unwrap_or(0.0),
        cash_pnl: raw.cash_pnl,
        percent_pnl: raw.percent_pnl,
        total_bought: raw.total_bought,
        realized_pnl: raw.realized_pnl,
        percent_realized_pnl: raw.percent_realized_pnl,
        cur_price: raw.cur_price,
        redeemable: raw.redeemable.unwrap_or(false),
        mergeable: raw.mergeable.unwrap_or(false),
        negative_risk: raw.negative_risk.unwrap_or(false),
        title: raw.title,
        slug: raw.slug,
        icon: raw.icon,
        event_id: raw.event_id,
        event_slug: raw.event_slug,
        outcome: raw.outcome,
        outcome_index: raw.outcome_index,
        opposite_outcome: raw.opposite_outcome,
        opposite_asset: raw.opposite_asset,
        end_date: parse_end_date(raw.end_date),
    })
}
