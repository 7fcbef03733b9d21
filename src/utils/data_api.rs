//! Client for the public Polymarket data API (`/activity`, `/positions`).

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Env;
use crate::interfaces::{ApiActivity, ApiPosition};
use crate::utils::fetch_data::{build_http_client, fetch_data, MarketDataError, RetryPolicy};

/// Hard page size ceiling enforced by the data API.
pub const MAX_PAGE_LIMIT: u32 = 500;

const PAGE_DELAY: Duration = Duration::from_millis(500);

#[async_trait]
pub trait MarketData: Send + Sync {
    /// One page of activity, newest first. Records older than `since`
    /// (unix seconds) are dropped.
    async fn fetch_activity(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
        since: Option<i64>,
    ) -> Result<Vec<ApiActivity>, MarketDataError>;

    /// One page of open positions, largest initial value first.
    async fn fetch_positions(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
        condition_id: Option<&str>,
    ) -> Result<Vec<ApiPosition>, MarketDataError>;
}

pub struct DataApiClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl DataApiClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> reqwest::Result<Self> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn from_env(env: &Env) -> reqwest::Result<Self> {
        Self::new(
            &env.data_api_url,
            env.request_timeout(),
            RetryPolicy {
                attempts: env.network_retry_limit,
                ..Default::default()
            },
        )
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, MarketDataError> {
        let url = format!("{}/{}", self.base_url, path);
        let body = fetch_data(&self.http, &url, query, self.retry).await?;
        serde_json::from_value(body).map_err(|source| MarketDataError::Decode { url, source })
    }
}

pub fn activity_query(wallet: &str, limit: u32, offset: u32) -> Vec<(&'static str, String)> {
    vec![
        ("user", wallet.to_string()),
        ("limit", limit.min(MAX_PAGE_LIMIT).to_string()),
        ("offset", offset.to_string()),
        ("sortBy", "TIMESTAMP".to_string()),
        ("sortDirection", "DESC".to_string()),
    ]
}

pub fn positions_query(
    wallet: &str,
    limit: u32,
    offset: u32,
    condition_id: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("user", wallet.to_string()),
        ("limit", limit.min(MAX_PAGE_LIMIT).to_string()),
        ("offset", offset.to_string()),
        ("sortBy", "INITIAL".to_string()),
        ("sortDirection", "DESC".to_string()),
    ];
    if let Some(condition_id) = condition_id {
        query.push(("conditionId", condition_id.to_string()));
    }
    query
}

#[async_trait]
impl MarketData for DataApiClient {
    async fn fetch_activity(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
        since: Option<i64>,
    ) -> Result<Vec<ApiActivity>, MarketDataError> {
        let mut page: Vec<ApiActivity> = self
            .get_list("activity", &activity_query(wallet, limit, offset))
            .await?;
        if let Some(since) = since {
            page.retain(|a| a.timestamp.map_or(false, |ts| ts >= since));
        }
        debug!(wallet, offset, count = page.len(), "fetched activity page");
        Ok(page)
    }

    async fn fetch_positions(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
        condition_id: Option<&str>,
    ) -> Result<Vec<ApiPosition>, MarketDataError> {
        let page: Vec<ApiPosition> = self
            .get_list("positions", &positions_query(wallet, limit, offset, condition_id))
            .await?;
        debug!(wallet, offset, count = page.len(), "fetched positions page");
        Ok(page)
    }
}

/// Walks offset-based pages until a short page is returned or `keep`
/// rejects a record (records arrive newest first, so the first rejected
/// record ends the walk).
pub async fn paginate<T, F, Fut>(
    limit: u32,
    page_delay: Duration,
    mut fetch_page: F,
    keep: impl Fn(&T) -> bool,
) -> Result<Vec<T>, MarketDataError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, MarketDataError>>,
{
    let limit = limit.clamp(1, MAX_PAGE_LIMIT);
    let mut offset = 0;
    let mut collected = Vec::new();

    loop {
        let page = fetch_page(offset).await?;
        let page_len = page.len();

        let mut reached_cutoff = false;
        for record in page {
            if keep(&record) {
                collected.push(record);
            } else {
                reached_cutoff = true;
                break;
            }
        }

        if reached_cutoff || page_len < limit as usize {
            return Ok(collected);
        }

        offset += limit;
        if !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
    }
}

/// Every activity at or after `cutoff` (unix seconds), newest first.
pub async fn fetch_activity_since(
    api: &dyn MarketData,
    wallet: &str,
    cutoff: i64,
) -> Result<Vec<ApiActivity>, MarketDataError> {
    paginate(
        MAX_PAGE_LIMIT,
        PAGE_DELAY,
        |offset| api.fetch_activity(wallet, MAX_PAGE_LIMIT, offset, None),
        |activity: &ApiActivity| activity.timestamp.map_or(false, |ts| ts >= cutoff),
    )
    .await
}

pub async fn fetch_all_positions(
    api: &dyn MarketData,
    wallet: &str,
) -> Result<Vec<ApiPosition>, MarketDataError> {
    paginate(
        MAX_PAGE_LIMIT,
        PAGE_DELAY,
        |offset| api.fetch_positions(wallet, MAX_PAGE_LIMIT, offset, None),
        |_: &ApiPosition| true,
    )
    .await
}

/// Size held by `wallet` in a market. With `asset` given only that outcome
/// counts; without it the first row is used. `Ok(None)` means no open
/// position.
pub async fn position_size(
    api: &dyn MarketData,
    wallet: &str,
    condition_id: &str,
    asset: Option<&str>,
) -> Result<Option<f64>, MarketDataError> {
    let positions = api
        .fetch_positions(wallet, MAX_PAGE_LIMIT, 0, Some(condition_id))
        .await?;

    let matching = match asset {
        Some(asset) => positions.iter().find(|p| p.asset.as_deref() == Some(asset)),
        None => {
            if positions.len() > 1 {
                warn!(wallet, condition_id, count = positions.len(), "several positions in market, using the first");
            }
            positions.first()
        }
    };

    Ok(matching.and_then(|p| p.size))
}
