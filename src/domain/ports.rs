use crate::domain::market::prediction_market::PredictionMarket;
use crate::domain::trading::types::OrderSide;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub platform: String,
    pub pnl: Option<Decimal>,
}

/// Position as reported by a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub platform: String,
    pub cash: Decimal,
    pub equity: Decimal,
}

/// Order-placement capability of one venue. One implementation per asset class.
///
/// `quantity` is the order size in the venue's unit; the orchestrator passes a
/// notional amount and adapters convert as needed.
#[async_trait]
pub trait TradingAdapter: Send + Sync {
    fn platform(&self) -> &str;
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<OrderResult>;
    async fn get_positions(&self) -> Result<Vec<VenuePosition>>;
    async fn get_account_status(&self) -> Result<AccountStatus>;
    async fn is_market_open(&self) -> Result<bool>;

    /// True when the venue publishes `TradeExecuted` for its own fills, so
    /// callers must not publish them again.
    fn publishes_fills(&self) -> bool {
        false
    }
}

/// Source of binary-market snapshots for arbitrage scanning.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    fn platform(&self) -> &str;
    async fn fetch_markets(&self, limit: usize) -> Result<Vec<PredictionMarket>>;
}
