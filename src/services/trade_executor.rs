//! Turns observed changes into mirror orders.
//!
//! The sizing rules live in the pure `decide_*` functions; the handler only
//! gathers the inputs they need (position lookups), submits the result and
//! reports what happened. Nothing in here returns an error to the caller:
//! every failure ends as [`HandlerOutcome::Failed`] so the dispatch loop
//! keeps draining events.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Env, SizedAmount, SizingConfig};
use crate::interfaces::{ActivityRecord, ActivityType, ChangeEvent, OrderRequest, PositionRecord, Side};
use crate::utils::data_api::{position_size, MarketData};
use crate::utils::logger::Logger;
use crate::utils::post_order::{OrderAck, OrderSubmitter};

/// Smallest sized USDC amount worth mirroring for a BUY trade.
const MIN_TRADE_USDC: f64 = 1.0;
/// Position-driven orders need strictly more than this (and at most its
/// negation for SELLs).
const MIN_POSITION_DELTA: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Place(OrderRequest),
    Skip(String),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Placed { order: OrderRequest, ack: OrderAck },
    Skipped(String),
    Failed(String),
}

/// Token quantity matching a sized notional. Unclamped amounts run the
/// token size through the same multiplication; clamped ones reuse the
/// effective factor so tokens and USDC stay consistent.
fn sized_tokens(sizing: &SizingConfig, sized: &SizedAmount, tokens: f64) -> f64 {
    if sized.clamped {
        tokens * sized.scale(sizing.mirror_fraction)
    } else {
        sizing.size(tokens).value
    }
}

fn trade_order_inputs(trade: &ActivityRecord) -> Result<(String, f64), String> {
    let asset = trade
        .asset
        .clone()
        .ok_or_else(|| format!("trade {} has no asset", trade.unique_activity_key))?;
    let price = trade
        .price
        .filter(|p| *p > 0.0)
        .ok_or_else(|| format!("trade {} has no usable price", trade.unique_activity_key))?;
    Ok((asset, price))
}

pub fn decide_buy_trade(trade: &ActivityRecord, sizing: &SizingConfig) -> Decision {
    let (token_id, price) = match trade_order_inputs(trade) {
        Ok(inputs) => inputs,
        Err(reason) => return Decision::Fail(reason),
    };

    // Thresholds apply to the unclamped amount.
    let sized = sizing.size(trade.usdc_size);
    if sized.raw < MIN_TRADE_USDC {
        return Decision::Skip(format!(
            "sized BUY ${:.4} is below ${} (trade ${:.2})",
            sized.raw, MIN_TRADE_USDC, trade.usdc_size
        ));
    }

    Decision::Place(OrderRequest {
        token_id,
        side: Side::Buy,
        price,
        size: sized_tokens(sizing, &sized, trade.size),
    })
}

/// SELL sized by the share of the trader's position that was sold, applied
/// to our own position in the same market.
pub fn decide_sell_trade(trade: &ActivityRecord, trader_size: Option<f64>, own_size: Option<f64>) -> Decision {
    let (token_id, price) = match trade_order_inputs(trade) {
        Ok(inputs) => inputs,
        Err(reason) => return Decision::Fail(reason),
    };

    let trader_size = match trader_size {
        Some(size) if size > 0.0 => size,
        other => {
            return Decision::Fail(format!(
                "trader position size is {:?} for {}, cannot size SELL",
                other,
                trade.condition_id.as_deref().unwrap_or("unknown market")
            ))
        }
    };
    let own_size = match own_size {
        Some(size) if size > 0.0 => size,
        _ => return Decision::Skip("no position of our own to sell".to_string()),
    };

    let ratio = trade.usdc_size / trader_size;
    let target = (ratio * own_size).min(own_size);
    if target <= 0.0 {
        return Decision::Skip(format!("SELL ratio {:.4} leaves nothing to sell", ratio));
    }

    Decision::Place(OrderRequest {
        token_id,
        side: Side::Sell,
        price,
        size: target,
    })
}

pub fn decide_new_position(position: &PositionRecord, sizing: &SizingConfig) -> Decision {
    let sized = sizing.size(position.initial_value);
    if sized.raw <= MIN_POSITION_DELTA {
        return Decision::Skip(format!(
            "sized position ${:.4} is not above ${} (initial ${:.2})",
            sized.raw, MIN_POSITION_DELTA, position.initial_value
        ));
    }
    if position.avg_price <= 0.0 {
        return Decision::Fail(format!("position {} has no average price", position.asset));
    }

    Decision::Place(OrderRequest {
        token_id: position.asset.clone(),
        side: Side::Buy,
        price: position.avg_price,
        size: sized_tokens(sizing, &sized, position.size),
    })
}

pub fn decide_position_update(old: &PositionRecord, new: &PositionRecord, sizing: &SizingConfig) -> Decision {
    let delta = new.current_value - old.current_value;
    let sized = sizing.size(delta);

    let side = if sized.raw > MIN_POSITION_DELTA {
        Side::Buy
    } else if sized.raw <= -MIN_POSITION_DELTA {
        Side::Sell
    } else {
        return Decision::Skip(format!(
            "sized delta {:.4} inside (-{}, {}) (value {:.2} -> {:.2})",
            sized.raw, MIN_POSITION_DELTA, MIN_POSITION_DELTA, old.current_value, new.current_value
        ));
    };
    if new.avg_price <= 0.0 {
        return Decision::Fail(format!("position {} has no average price", new.asset));
    }

    Decision::Place(OrderRequest {
        token_id: new.asset.clone(),
        side,
        price: new.avg_price,
        size: sized.value.abs(),
    })
}

/// Remembers handled events for a window so a change delivered twice
/// (feed replay, overlapping sources) is mirrored once.
pub struct OrderDeduplicator {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl OrderDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(event: &ChangeEvent) -> String {
        match event {
            ChangeEvent::TradeInserted(trade) => format!("trade:{}", trade.unique_activity_key),
            ChangeEvent::PositionInserted(p) => format!("open:{}:{}", p.proxy_wallet, p.asset),
            ChangeEvent::PositionUpdated { old, new } => format!(
                "update:{}:{}:{}:{}->{}:{}",
                new.proxy_wallet, new.asset, old.size, old.current_value, new.size, new.current_value
            ),
        }
    }

    /// True the first time `key` is seen inside the window.
    pub fn first_sighting(&self, key: &str) -> bool {
        if self.window.is_zero() {
            return true;
        }
        let now = Instant::now();
        let Ok(mut seen) = self.seen.lock() else {
            return true;
        };
        seen.retain(|_, at| now.duration_since(*at) < self.window);
        if seen.contains_key(key) {
            false
        } else {
            seen.insert(key.to_string(), now);
            true
        }
    }
}

pub struct OrderDecisionHandler {
    market_data: Arc<dyn MarketData>,
    submitter: Arc<dyn OrderSubmitter>,
    sizing: SizingConfig,
    trader_wallet: String,
    own_wallet: String,
    skip_if_already_open: bool,
    dedup: OrderDeduplicator,
}

impl OrderDecisionHandler {
    pub fn new(env: &Env, market_data: Arc<dyn MarketData>, submitter: Arc<dyn OrderSubmitter>) -> Self {
        Self {
            market_data,
            submitter,
            sizing: env.sizing.clone(),
            trader_wallet: env.trader_wallet.to_lowercase(),
            own_wallet: env.funder_address.to_lowercase(),
            skip_if_already_open: env.skip_if_already_open,
            dedup: OrderDeduplicator::new(env.order_dedup_window),
        }
    }

    pub async fn handle(&self, event: &ChangeEvent) -> HandlerOutcome {
        if event.wallet().to_lowercase() != self.trader_wallet {
            return HandlerOutcome::Skipped(format!(
                "{} for untracked wallet {}",
                event.kind(),
                event.wallet()
            ));
        }
        if !self.dedup.first_sighting(&OrderDeduplicator::key(event)) {
            debug!(kind = event.kind(), "event already handled");
            return HandlerOutcome::Skipped("event already handled".to_string());
        }

        let decision = match event {
            ChangeEvent::TradeInserted(trade) => self.decide_trade(trade).await,
            ChangeEvent::PositionInserted(position) => {
                Logger::position("NEW POSITION DETECTED", position, None);
                self.decide_position_open(position).await
            }
            ChangeEvent::PositionUpdated { old, new } => {
                Logger::position("POSITION CHANGED", new, Some(old));
                decide_position_update(old, new, &self.sizing)
            }
        };

        self.execute(event, decision).await
    }

    async fn decide_trade(&self, trade: &ActivityRecord) -> Decision {
        if trade.activity_type != ActivityType::Trade {
            return Decision::Skip(format!("{} activity is not mirrored", trade.activity_type));
        }
        Logger::trade(trade);

        match trade.side {
            Some(Side::Buy) => decide_buy_trade(trade, &self.sizing),
            Some(Side::Sell) => {
                let Some(condition_id) = trade.condition_id.as_deref() else {
                    return Decision::Fail(format!("SELL {} has no condition id", trade.unique_activity_key));
                };
                let asset = trade.asset.as_deref();

                let trader_size = match position_size(self.market_data.as_ref(), &self.trader_wallet, condition_id, asset).await {
                    Ok(size) => size,
                    Err(e) => return Decision::Fail(format!("trader position lookup failed: {}", e)),
                };
                let own_size = match position_size(self.market_data.as_ref(), &self.own_wallet, condition_id, asset).await {
                    Ok(size) => size,
                    Err(e) => return Decision::Fail(format!("own position lookup failed: {}", e)),
                };

                debug!(?trader_size, ?own_size, condition_id, "sizing SELL");
                decide_sell_trade(trade, trader_size, own_size)
            }
            None => Decision::Fail(format!("trade {} has no side", trade.unique_activity_key)),
        }
    }

    async fn decide_position_open(&self, position: &PositionRecord) -> Decision {
        if self.skip_if_already_open {
            if let Some(condition_id) = position.condition_id.as_deref() {
                match position_size(self.market_data.as_ref(), &self.own_wallet, condition_id, None).await {
                    Ok(Some(size)) if size > 0.0 => {
                        return Decision::Skip(format!(
                            "already holding {:.2} tokens in {}",
                            size, condition_id
                        ))
                    }
                    Ok(_) => {}
                    Err(e) => return Decision::Fail(format!("open position check failed: {}", e)),
                }
            }
        }
        decide_new_position(position, &self.sizing)
    }

    async fn execute(&self, event: &ChangeEvent, decision: Decision) -> HandlerOutcome {
        match decision {
            Decision::Skip(reason) => {
                Logger::skipped(&reason);
                info!(kind = event.kind(), %reason, "no mirror order");
                HandlerOutcome::Skipped(reason)
            }
            Decision::Fail(reason) => {
                Logger::error(&reason);
                error!(kind = event.kind(), %reason, "mirror order aborted");
                HandlerOutcome::Failed(reason)
            }
            Decision::Place(order) => {
                let summary = Logger::order_summary(&order);
                match self.submitter.submit(&order).await {
                    Ok(ack) => {
                        Logger::order_result(true, &format!("{} ({})", summary, ack.order_id));
                        HandlerOutcome::Placed { order, ack }
                    }
                    Err(e) => {
                        Logger::order_result(false, &format!("{}: {}", summary, e));
                        warn!(kind = event.kind(), error = %e, "mirror order not placed");
                        HandlerOutcome::Failed(e.to_string())
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    pub placed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Single dispatch loop: events are handled one at a time in arrival order
/// until the channel closes or shutdown is requested.
pub async fn start_trade_executor(
    mut events: mpsc::Receiver<ChangeEvent>,
    handler: Arc<OrderDecisionHandler>,
    shutdown: CancellationToken,
) -> Result<ExecutorStats> {
    Logger::success("Trade executor ready");
    let mut stats = ExecutorStats::default();

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match handler.handle(&event).await {
            HandlerOutcome::Placed { .. } => stats.placed += 1,
            HandlerOutcome::Skipped(_) => stats.skipped += 1,
            HandlerOutcome::Failed(_) => stats.failed += 1,
        }
    }

    info!(placed = stats.placed, skipped = stats.skipped, failed = stats.failed, "trade executor stopped");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClampPolicy;

    fn sizing(fraction: f64) -> SizingConfig {
        SizingConfig {
            mirror_fraction: fraction,
            ..Default::default()
        }
    }

    fn trade(side: Side, usdc_size: f64, size: f64, price: f64) -> ActivityRecord {
        ActivityRecord {
            proxy_wallet: "0xtrader".to_string(),
            condition_id: Some("0xcond".to_string()),
            activity_type: ActivityType::Trade,
            asset: Some("123".to_string()),
            side: Some(side),
            size,
            usdc_size,
            price: Some(price),
            transaction_hash: "0xhash".to_string(),
            unique_activity_key: format!("0xhash_0xcond_{}", price),
            ..Default::default()
        }
    }

    fn position(current_value: f64, avg_price: f64) -> PositionRecord {
        PositionRecord {
            proxy_wallet: "0xtrader".to_string(),
            asset: "123".to_string(),
            condition_id: Some("0xcond".to_string()),
            avg_price,
            current_value,
            ..Default::default()
        }
    }

    #[test]
    fn small_buy_is_skipped() {
        let decision = decide_buy_trade(&trade(Side::Buy, 150.0, 200.0, 0.75), &sizing(0.005));
        assert!(matches!(decision, Decision::Skip(_)));
    }

    #[test]
    fn buy_mirrors_scaled_token_size_at_trade_price() {
        let decision = decide_buy_trade(&trade(Side::Buy, 250.0, 300.0, 0.83), &sizing(0.01));
        assert_eq!(
            decision,
            Decision::Place(OrderRequest {
                token_id: "123".to_string(),
                side: Side::Buy,
                price: 0.83,
                size: 3.0,
            })
        );
    }

    #[test]
    fn clamped_buy_scales_tokens_by_effective_factor() {
        let sizing = SizingConfig {
            mirror_fraction: 0.5,
            clamp: ClampPolicy::Enabled,
            ..Default::default()
        };
        // 1000 * 0.5 = 500 clamps to 20, i.e. 2% of the notional.
        match decide_buy_trade(&trade(Side::Buy, 1000.0, 2000.0, 0.5), &sizing) {
            Decision::Place(order) => assert!((order.size - 40.0).abs() < 1e-9),
            other => panic!("expected order, got {:?}", other),
        }
    }

    fn clamped(fraction: f64) -> SizingConfig {
        SizingConfig {
            mirror_fraction: fraction,
            clamp: ClampPolicy::Enabled,
            ..Default::default()
        }
    }

    #[test]
    fn clamping_does_not_lift_dust_over_thresholds() {
        assert!(matches!(
            decide_buy_trade(&trade(Side::Buy, 0.20, 0.4, 0.5), &clamped(0.005)),
            Decision::Skip(_)
        ));

        let old = position(100.0, 0.5);
        let new = position(99.8, 0.5);
        assert!(matches!(decide_position_update(&old, &new, &clamped(0.005)), Decision::Skip(_)));
        assert!(matches!(decide_position_update(&new, &old, &clamped(0.005)), Decision::Skip(_)));

        let mut open = position(0.0, 0.5);
        open.initial_value = 0.20;
        open.size = 0.4;
        assert!(matches!(decide_new_position(&open, &clamped(0.005)), Decision::Skip(_)));
    }

    #[test]
    fn clamped_position_decrease_past_threshold_sells_stake_floor() {
        // -400 * 0.005 = -2 passes the threshold, then clamps to -5.
        let old = position(500.0, 0.5);
        let new = position(100.0, 0.5);
        match decide_position_update(&old, &new, &clamped(0.005)) {
            Decision::Place(order) => {
                assert_eq!(order.side, Side::Sell);
                assert_eq!(order.size, 5.0);
            }
            other => panic!("expected order, got {:?}", other),
        }
    }

    #[test]
    fn sell_with_zero_trader_position_fails_without_panicking() {
        let decision = decide_sell_trade(&trade(Side::Sell, 50.0, 100.0, 0.5), Some(0.0), Some(10.0));
        assert!(matches!(decision, Decision::Fail(_)));

        let decision = decide_sell_trade(&trade(Side::Sell, 50.0, 100.0, 0.5), None, Some(10.0));
        assert!(matches!(decision, Decision::Fail(_)));
    }

    #[test]
    fn sell_without_own_position_is_skipped() {
        let decision = decide_sell_trade(&trade(Side::Sell, 50.0, 100.0, 0.5), Some(200.0), None);
        assert!(matches!(decision, Decision::Skip(_)));
    }

    #[test]
    fn sell_uses_ratio_of_trader_position_and_caps_at_own_size() {
        match decide_sell_trade(&trade(Side::Sell, 50.0, 100.0, 0.5), Some(200.0), Some(40.0)) {
            Decision::Place(order) => {
                assert_eq!(order.side, Side::Sell);
                assert_eq!(order.size, 10.0);
                assert_eq!(order.price, 0.5);
            }
            other => panic!("expected order, got {:?}", other),
        }

        match decide_sell_trade(&trade(Side::Sell, 500.0, 100.0, 0.5), Some(100.0), Some(40.0)) {
            Decision::Place(order) => assert_eq!(order.size, 40.0),
            other => panic!("expected order, got {:?}", other),
        }
    }

    #[test]
    fn position_update_buys_sized_delta() {
        let old = position(100.0, 0.4);
        let new = position(350.0, 0.45);
        assert_eq!(
            decide_position_update(&old, &new, &sizing(0.01)),
            Decision::Place(OrderRequest {
                token_id: "123".to_string(),
                side: Side::Buy,
                price: 0.45,
                size: 2.5,
            })
        );
    }

    #[test]
    fn position_update_sells_magnitude_of_negative_delta() {
        let old = position(350.0, 0.45);
        let new = position(100.0, 0.45);
        match decide_position_update(&old, &new, &sizing(0.01)) {
            Decision::Place(order) => {
                assert_eq!(order.side, Side::Sell);
                assert_eq!(order.size, 2.5);
            }
            other => panic!("expected order, got {:?}", other),
        }
    }

    #[test]
    fn position_update_inside_band_is_skipped() {
        let old = position(100.0, 0.4);
        let new = position(150.0, 0.4);
        assert!(matches!(
            decide_position_update(&old, &new, &sizing(0.01)),
            Decision::Skip(_)
        ));
        // Exactly -1 sells, exactly +1 does not buy.
        let down = position(0.0, 0.4);
        assert!(matches!(
            decide_position_update(&old, &down, &sizing(0.01)),
            Decision::Place(OrderRequest { side: Side::Sell, .. })
        ));
        let up = position(200.0, 0.4);
        assert!(matches!(decide_position_update(&old, &up, &sizing(0.01)), Decision::Skip(_)));
    }

    #[test]
    fn new_position_requires_sized_value_above_one() {
        let mut open = position(0.0, 0.25);
        open.initial_value = 200.0;
        open.size = 800.0;
        assert!(matches!(decide_new_position(&open, &sizing(0.005)), Decision::Skip(_)));

        open.initial_value = 400.0;
        match decide_new_position(&open, &sizing(0.005)) {
            Decision::Place(order) => {
                assert_eq!(order.side, Side::Buy);
                assert_eq!(order.price, 0.25);
                assert_eq!(order.size, 4.0);
            }
            other => panic!("expected order, got {:?}", other),
        }
    }

    #[test]
    fn dedup_remembers_keys_within_window() {
        let dedup = OrderDeduplicator::new(Duration::from_secs(60));
        assert!(dedup.first_sighting("a"));
        assert!(!dedup.first_sighting("a"));
        assert!(dedup.first_sighting("b"));

        let disabled = OrderDeduplicator::new(Duration::ZERO);
        assert!(disabled.first_sighting("a"));
        assert!(disabled.first_sighting("a"));
    }
}
