//! Order submission: live CLOB orders or preview logging.

use alloy::primitives::U256;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::Normal;
use polymarket_client_sdk::clob::types::{OrderType, Side as ClobSide};
use polymarket_client_sdk::clob::Client as ClobClient;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{info, warn};

use crate::interfaces::{OrderRequest, Side};
use crate::utils::logger::Logger;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub preview: bool,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order rejected by venue: {0}")]
    Rejected(String),

    #[error("order submission failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, SubmitError>;
}

/// Price and size in the venue's precision (3 dp price, 2 dp size).
pub fn order_amounts(order: &OrderRequest) -> Result<(Decimal, Decimal), SubmitError> {
    if !order.price.is_finite() || order.price <= 0.0 || order.price >= 1.0 {
        return Err(SubmitError::InvalidOrder(format!(
            "price {} outside (0, 1)",
            order.price
        )));
    }
    let price = Decimal::from_str(&format!("{:.6}", order.price))
        .map_err(|e| SubmitError::InvalidOrder(e.to_string()))?
        .round_dp(3);
    let size = Decimal::from_str(&format!("{:.6}", order.size.abs()))
        .map_err(|e| SubmitError::InvalidOrder(e.to_string()))?
        .round_dp(2);

    if size.is_zero() {
        return Err(SubmitError::InvalidOrder(format!(
            "size {} rounds to zero",
            order.size
        )));
    }
    Ok((price, size))
}

pub struct ClobOrderSubmitter {
    client: ClobClient<Authenticated<Normal>>,
    signer: PrivateKeySigner,
}

impl ClobOrderSubmitter {
    pub fn new(client: ClobClient<Authenticated<Normal>>, signer: PrivateKeySigner) -> Self {
        Self { client, signer }
    }
}

#[async_trait]
impl OrderSubmitter for ClobOrderSubmitter {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, SubmitError> {
        let (price, size) = order_amounts(order)?;
        let token_id = U256::from_str(&order.token_id)
            .map_err(|e| SubmitError::InvalidOrder(format!("token id {}: {}", order.token_id, e)))?;
        let side = match order.side {
            Side::Buy => ClobSide::Buy,
            Side::Sell => ClobSide::Sell,
        };

        let built = self
            .client
            .limit_order()
            .token_id(token_id)
            .size(size)
            .price(price)
            .side(side)
            .order_type(OrderType::GTC)
            .build()
            .await
            .map_err(|e| SubmitError::InvalidOrder(e.to_string()))?;

        let signed = self
            .client
            .sign(&self.signer, built)
            .await
            .map_err(|e| SubmitError::Transport(format!("signing failed: {}", e)))?;

        let response = self
            .client
            .post_order(signed)
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        if let Some(error_msg) = response.error_msg.as_deref().filter(|m| !m.is_empty()) {
            warn!(token_id = %order.token_id, side = %order.side, %error_msg, "order rejected");
            return Err(SubmitError::Rejected(error_msg.to_string()));
        }

        let order_id = response.order_id.to_string();
        info!(%order_id, token_id = %order.token_id, side = %order.side, %price, %size, "order placed");
        Ok(OrderAck {
            order_id,
            preview: false,
        })
    }
}

/// Logs the order instead of placing it.
#[derive(Default)]
pub struct PreviewSubmitter {
    counter: AtomicU64,
}

impl PreviewSubmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderSubmitter for PreviewSubmitter {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, SubmitError> {
        let (price, size) = order_amounts(order)?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Logger::info(&format!(
            "🔍 PREVIEW: would {} {} tokens of {} at ${}",
            order.side,
            size,
            Logger::format_address(&order.token_id),
            price
        ));
        Ok(OrderAck {
            order_id: format!("preview-{}", n),
            preview: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(price: f64, size: f64) -> OrderRequest {
        OrderRequest {
            token_id: "123".to_string(),
            side: Side::Buy,
            price,
            size,
        }
    }

    #[test]
    fn amounts_are_rounded_to_venue_precision() {
        let (price, size) = order_amounts(&order(0.83456, 3.14159)).unwrap();
        assert_eq!(price, Decimal::from_str("0.835").unwrap());
        assert_eq!(size, Decimal::from_str("3.14").unwrap());
    }

    #[test]
    fn size_rounding_to_zero_is_rejected() {
        let err = order_amounts(&order(0.5, 0.004)).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidOrder(_)));
    }

    #[test]
    fn price_outside_unit_interval_is_rejected() {
        assert!(order_amounts(&order(0.0, 10.0)).is_err());
        assert!(order_amounts(&order(1.2, 10.0)).is_err());
    }

    #[tokio::test]
    async fn preview_acks_without_placing() {
        let submitter = PreviewSubmitter::new();
        let first = submitter.submit(&order(0.5, 2.0)).await.unwrap();
        let second = submitter.submit(&order(0.5, 2.0)).await.unwrap();
        assert!(first.preview);
        assert_eq!(first.order_id, "preview-1");
        assert_eq!(second.order_id, "preview-2");
    }
}
