//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use polymarket_copy_relay::config::Env;
use polymarket_copy_relay::interfaces::{ApiActivity, ApiPosition, OrderRequest};
use polymarket_copy_relay::utils::{MarketData, MarketDataError, OrderAck, OrderSubmitter, SubmitError};

pub const TRADER: &str = "0x1111111111111111111111111111111111111111";
pub const OWN: &str = "0x3333333333333333333333333333333333333333";
pub const CONDITION: &str = "0xcond";
pub const ASSET: &str = "71321045679252212594626385532706912750332728571942532289631379312455583992563";

/// Memory-backed, poll-driven, preview configuration with overrides.
pub fn test_env(overrides: &[(&str, &str)]) -> Env {
    let mut values: HashMap<String, String> = [
        ("TRADER_WALLET", TRADER),
        ("POLY_FUNDER", OWN),
        ("STORE_BACKEND", "memory"),
        ("PREVIEW_MODE", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (key, value) in overrides {
        values.insert(key.to_string(), value.to_string());
    }
    Env::from_map(&values).expect("test env is valid")
}

pub fn api_trade(hash: &str, side: &str, usdc_size: f64, size: f64, price: f64, timestamp: i64) -> ApiActivity {
    ApiActivity {
        proxy_wallet: Some(TRADER.to_string()),
        timestamp: Some(timestamp),
        condition_id: Some(CONDITION.to_string()),
        activity_type: Some("TRADE".to_string()),
        size: Some(size),
        usdc_size: Some(usdc_size),
        transaction_hash: Some(hash.to_string()),
        price: Some(price),
        asset: Some(ASSET.to_string()),
        side: Some(side.to_string()),
        ..Default::default()
    }
}

pub fn api_position(wallet: &str, size: f64, avg_price: f64, initial_value: f64, current_value: f64) -> ApiPosition {
    ApiPosition {
        proxy_wallet: Some(wallet.to_string()),
        asset: Some(ASSET.to_string()),
        condition_id: Some(CONDITION.to_string()),
        size: Some(size),
        avg_price: Some(avg_price),
        initial_value: Some(initial_value),
        current_value: Some(current_value),
        ..Default::default()
    }
}

fn unavailable() -> MarketDataError {
    MarketDataError::Status {
        url: "stub://data-api".to_string(),
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Data API stand-in whose responses are swapped between steps.
#[derive(Default)]
pub struct StubMarketData {
    activity: Mutex<HashMap<String, Vec<ApiActivity>>>,
    positions: Mutex<HashMap<String, Vec<ApiPosition>>>,
    failing: Mutex<bool>,
    pub position_lookups: AtomicUsize,
}

impl StubMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest first, as the API returns them.
    pub fn set_activity(&self, wallet: &str, page: Vec<ApiActivity>) {
        self.activity.lock().unwrap().insert(wallet.to_string(), page);
    }

    pub fn set_positions(&self, wallet: &str, page: Vec<ApiPosition>) {
        self.positions.lock().unwrap().insert(wallet.to_string(), page);
    }

    pub fn fail_requests(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl MarketData for StubMarketData {
    async fn fetch_activity(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
        since: Option<i64>,
    ) -> Result<Vec<ApiActivity>, MarketDataError> {
        if *self.failing.lock().unwrap() {
            return Err(unavailable());
        }
        let page = self.activity.lock().unwrap().get(wallet).cloned().unwrap_or_default();
        Ok(page
            .into_iter()
            .filter(|a| since.map_or(true, |cutoff| a.timestamp.unwrap_or(0) >= cutoff))
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn fetch_positions(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
        condition_id: Option<&str>,
    ) -> Result<Vec<ApiPosition>, MarketDataError> {
        self.position_lookups.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            return Err(unavailable());
        }
        let page = self.positions.lock().unwrap().get(wallet).cloned().unwrap_or_default();
        Ok(page
            .into_iter()
            .filter(|p| condition_id.map_or(true, |c| p.condition_id.as_deref() == Some(c)))
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

/// Records every order it is handed; optionally rejects them all.
#[derive(Default)]
pub struct RecordingSubmitter {
    orders: Mutex<Vec<OrderRequest>>,
    reject: Mutex<bool>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        let submitter = Self::default();
        *submitter.reject.lock().unwrap() = true;
        submitter
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderSubmitter for RecordingSubmitter {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, SubmitError> {
        self.orders.lock().unwrap().push(order.clone());
        if *self.reject.lock().unwrap() {
            return Err(SubmitError::Rejected("not enough balance / allowance".to_string()));
        }
        let n = self.orders.lock().unwrap().len();
        Ok(OrderAck {
            order_id: format!("test-{}", n),
            preview: true,
        })
    }
}
