use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity kind as reported by the data API. Unknown kinds are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    #[default]
    Trade,
    Yield,
    Other(String),
}

impl From<String> for ActivityType {
    fn from(value: String) -> Self {
        match value.to_uppercase().as_str() {
            "TRADE" => ActivityType::Trade,
            "YIELD" => ActivityType::Yield,
            _ => ActivityType::Other(value),
        }
    }
}

impl From<ActivityType> for String {
    fn from(value: ActivityType) -> Self {
        match value {
            ActivityType::Trade => "TRADE".to_string(),
            ActivityType::Yield => "YIELD".to_string(),
            ActivityType::Other(other) => other,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityType::Trade => f.write_str("TRADE"),
            ActivityType::Yield => f.write_str("YIELD"),
            ActivityType::Other(other) => f.write_str(other),
        }
    }
}

/// Accepts a JSON number, a numeric string, or null.
fn opt_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn opt_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

/// Raw `/activity` record, keys are camelCase on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiActivity {
    pub proxy_wallet: Option<String>,
    #[serde(default, deserialize_with = "opt_integer")]
    pub timestamp: Option<i64>,
    pub condition_id: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: Option<String>,
    #[serde(default, deserialize_with = "opt_number")]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub usdc_size: Option<f64>,
    pub transaction_hash: Option<String>,
    #[serde(default, deserialize_with = "opt_number")]
    pub price: Option<f64>,
    pub asset: Option<String>,
    pub side: Option<String>,
    #[serde(default, deserialize_with = "opt_integer")]
    pub outcome_index: Option<i64>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub icon: Option<String>,
    pub event_slug: Option<String>,
    pub outcome: Option<String>,
    pub name: Option<String>,
    pub pseudonym: Option<String>,
    pub bio: Option<String>,
    pub profile_image: Option<String>,
    pub profile_image_optimized: Option<String>,
}

/// Raw `/positions` record, keys are camelCase on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPosition {
    pub proxy_wallet: Option<String>,
    pub asset: Option<String>,
    pub condition_id: Option<String>,
    #[serde(default, deserialize_with = "opt_number")]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub avg_price: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub initial_value: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub current_value: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub cash_pnl: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub percent_pnl: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub total_bought: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub realized_pnl: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub percent_realized_pnl: Option<f64>,
    #[serde(default, deserialize_with = "opt_number")]
    pub cur_price: Option<f64>,
    pub redeemable: Option<bool>,
    pub mergeable: Option<bool>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "opt_integer")]
    pub event_id: Option<i64>,
    pub event_slug: Option<String>,
    pub outcome: Option<String>,
    #[serde(default, deserialize_with = "opt_integer")]
    pub outcome_index: Option<i64>,
    pub opposite_outcome: Option<String>,
    pub opposite_asset: Option<String>,
    pub end_date: Option<String>,
    pub negative_risk: Option<bool>,
}

/// Normalized trade/yield event as stored in the trades collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub proxy_wallet: String,
    pub timestamp: i64,
    pub activity_datetime: DateTime<Utc>,
    pub condition_id: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub asset: Option<String>,
    pub side: Option<Side>,
    pub size: f64,
    pub usdc_size: f64,
    pub price: Option<f64>,
    pub transaction_hash: String,
    pub outcome_index: Option<i64>,
    pub outcome: Option<String>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub event_slug: Option<String>,
    pub icon: Option<String>,
    pub trader_name: Option<String>,
    pub pseudonym: Option<String>,
    pub bio: Option<String>,
    pub profile_image: Option<String>,
    pub profile_image_optimized: Option<String>,
    pub unique_activity_key: String,
}

/// Normalized open position, unique by (asset, proxy_wallet).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub proxy_wallet: String,
    pub asset: String,
    pub condition_id: Option<String>,
    pub size: f64,
    pub avg_price: f64,
    pub initial_value: f64,
    pub current_value: f64,
    pub cash_pnl: Option<f64>,
    pub percent_pnl: Option<f64>,
    pub total_bought: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub percent_realized_pnl: Option<f64>,
    pub cur_price: Option<f64>,
    pub redeemable: bool,
    pub mergeable: bool,
    pub negative_risk: bool,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub icon: Option<String>,
    pub event_id: Option<i64>,
    pub event_slug: Option<String>,
    pub outcome: Option<String>,
    pub outcome_index: Option<i64>,
    pub opposite_outcome: Option<String>,
    pub opposite_asset: Option<String>,
    pub end_date: Option<NaiveDate>,
}

/// Mirror order produced by the decision handler. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

/// A row-level change observed on one of the two collections.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    TradeInserted(ActivityRecord),
    PositionInserted(PositionRecord),
    PositionUpdated {
        old: PositionRecord,
        new: PositionRecord,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::TradeInserted(_) => "trade_inserted",
            ChangeEvent::PositionInserted(_) => "position_inserted",
            ChangeEvent::PositionUpdated { .. } => "position_updated",
        }
    }

    pub fn wallet(&self) -> &str {
        match self {
            ChangeEvent::TradeInserted(trade) => &trade.proxy_wallet,
            ChangeEvent::PositionInserted(position) => &position.proxy_wallet,
            ChangeEvent::PositionUpdated { new, .. } => &new.proxy_wallet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_activity_accepts_numeric_strings_and_nulls() {
        let raw: ApiActivity = serde_json::from_value(serde_json::json!({
            "proxyWallet": "0xabc",
            "timestamp": 1_700_000_000,
            "type": "TRADE",
            "size": "12.5",
            "usdcSize": null,
            "price": 0.42,
            "transactionHash": "0xhash"
        }))
        .unwrap();

        assert_eq!(raw.size, Some(12.5));
        assert_eq!(raw.usdc_size, None);
        assert_eq!(raw.price, Some(0.42));
        assert_eq!(raw.condition_id, None);
    }

    #[test]
    fn activity_type_keeps_unknown_kinds() {
        assert_eq!(ActivityType::from("trade".to_string()), ActivityType::Trade);
        let other = ActivityType::from("REDEEM".to_string());
        assert_eq!(other, ActivityType::Other("REDEEM".to_string()));
        assert_eq!(String::from(other), "REDEEM");
    }

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse(" SELL "), Some(Side::Sell));
        assert_eq!(Side::parse(""), None);
    }
}
