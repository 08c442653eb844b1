use crate::domain::market::prediction_market::PredictionMarket;
use crate::domain::ports::{AccountStatus, MarketFeed, OrderResult, TradingAdapter, VenuePosition};
use crate::domain::trading::types::OrderSide;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Paper-trading adapter with scriptable failures.
///
/// Fills every order at the requested price (or `default_price`), converting
/// the notional into units at that price, and keeps the fills in memory.
#[derive(Clone)]
pub struct MockTradingAdapter {
    platform: String,
    default_price: Decimal,
    cash: Decimal,
    market_open: Arc<AtomicBool>,
    fail_orders: Arc<AtomicU32>,
    always_fail: Arc<AtomicBool>,
    fail_symbol: Arc<RwLock<Option<String>>>,
    order_calls: Arc<AtomicUsize>,
    fills: Arc<RwLock<Vec<OrderResult>>>,
}

impl MockTradingAdapter {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            default_price: dec!(1),
            cash: dec!(100000),
            market_open: Arc::new(AtomicBool::new(true)),
            fail_orders: Arc::new(AtomicU32::new(0)),
            always_fail: Arc::new(AtomicBool::new(false)),
            fail_symbol: Arc::new(RwLock::new(None)),
            order_calls: Arc::new(AtomicUsize::new(0)),
            fills: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_default_price(mut self, price: Decimal) -> Self {
        self.default_price = price;
        self
    }

    pub fn set_market_open(&self, open: bool) {
        self.market_open.store(open, Ordering::SeqCst);
    }

    /// Reject the next `n` orders.
    pub fn fail_next_orders(&self, n: u32) {
        self.fail_orders.store(n, Ordering::SeqCst);
    }

    /// Simulate a full venue outage: every endpoint errors.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Reject every order whose symbol contains `pattern`.
    pub async fn fail_symbol(&self, pattern: impl Into<String>) {
        *self.fail_symbol.write().await = Some(pattern.into());
    }

    pub fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }

    pub async fn fills(&self) -> Vec<OrderResult> {
        self.fills.read().await.clone()
    }

    fn take_scripted_failure(&self) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_orders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TradingAdapter for MockTradingAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        price: Option<Decimal>,
    ) -> Result<OrderResult> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_scripted_failure() {
            anyhow::bail!("{}: order rejected (simulated outage)", self.platform);
        }
        if let Some(pattern) = self.fail_symbol.read().await.as_deref()
            && symbol.contains(pattern)
        {
            anyhow::bail!("{}: order for {} rejected", self.platform, symbol);
        }

        let fill_price = price.unwrap_or(self.default_price);
        if fill_price <= Decimal::ZERO {
            anyhow::bail!("{}: no fill price for {}", self.platform, symbol);
        }
        let fill = OrderResult {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            quantity: notional / fill_price,
            price: fill_price,
            platform: self.platform.clone(),
            pnl: None,
        };
        info!(
            "MockTradingAdapter [{}]: filled {} {} {} @ {}",
            self.platform, side, fill.quantity, symbol, fill.price
        );
        self.fills.write().await.push(fill.clone());
        Ok(fill)
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>> {
        let fills = self.fills.read().await;
        let mut net: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();
        for fill in fills.iter() {
            let entry = net.entry(fill.symbol.clone()).or_default();
            let signed = match fill.side {
                OrderSide::Buy => fill.quantity,
                OrderSide::Sell => -fill.quantity,
            };
            entry.0 += signed;
            entry.1 = fill.price;
        }
        Ok(net
            .into_iter()
            .filter(|(_, (qty, _))| !qty.is_zero())
            .map(|(symbol, (quantity, price))| VenuePosition {
                symbol,
                quantity,
                average_price: price,
                current_price: price,
            })
            .collect())
    }

    async fn get_account_status(&self) -> Result<AccountStatus> {
        if self.always_fail.load(Ordering::SeqCst) {
            anyhow::bail!("{}: account endpoint unavailable", self.platform);
        }
        Ok(AccountStatus {
            platform: self.platform.clone(),
            cash: self.cash,
            equity: self.cash,
        })
    }

    async fn is_market_open(&self) -> Result<bool> {
        if self.always_fail.load(Ordering::SeqCst) {
            anyhow::bail!("{}: clock endpoint unavailable", self.platform);
        }
        Ok(self.market_open.load(Ordering::SeqCst))
    }
}

/// Market feed serving a fixed, replaceable list of markets.
#[derive(Clone)]
pub struct StaticMarketFeed {
    platform: String,
    markets: Arc<RwLock<Vec<PredictionMarket>>>,
    failing: Arc<AtomicBool>,
}

impl StaticMarketFeed {
    pub fn new(platform: impl Into<String>, markets: Vec<PredictionMarket>) -> Self {
        Self {
            platform: platform.into(),
            markets: Arc::new(RwLock::new(markets)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn set_markets(&self, markets: Vec<PredictionMarket>) {
        *self.markets.write().await = markets;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketFeed for StaticMarketFeed {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn fetch_markets(&self, limit: usize) -> Result<Vec<PredictionMarket>> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{}: market listing unavailable", self.platform);
        }
        Ok(self.markets.read().await.iter().take(limit).cloned().collect())
    }
}
