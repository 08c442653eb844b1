use crate::application::ledger::trade_engine::{TradeEngine, TradeRequest};
use crate::application::risk_management::sizing_engine::SizingEngine;
use crate::domain::ports::{AccountStatus, OrderResult, TradingAdapter, VenuePosition};
use crate::domain::trading::types::{AssetClass, OrderSide, PortfolioId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Paper venue settling orders directly on a ledger portfolio.
///
/// Orders arrive as a notional amount; the adapter converts them into units
/// at the order price (or the last quote it was given) and runs them
/// through the trade engine. Sells are capped at the held quantity.
pub struct LedgerTradingAdapter {
    engine: Arc<TradeEngine>,
    portfolio_id: PortfolioId,
    asset_class: AssetClass,
    platform: String,
    quotes: RwLock<HashMap<String, Decimal>>,
    market_open: AtomicBool,
}

impl LedgerTradingAdapter {
    pub fn new(
        engine: Arc<TradeEngine>,
        portfolio_id: PortfolioId,
        asset_class: AssetClass,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            portfolio_id,
            asset_class,
            platform: platform.into(),
            quotes: RwLock::new(HashMap::new()),
            market_open: AtomicBool::new(true),
        }
    }

    pub fn asset_class(&self) -> AssetClass {
        self.asset_class
    }

    pub async fn set_quote(&self, symbol: &str, price: Decimal) {
        self.quotes
            .write()
            .await
            .insert(ledger_symbol(symbol), price);
    }

    pub fn set_market_open(&self, open: bool) {
        self.market_open.store(open, Ordering::SeqCst);
    }
}

/// Pairs like "BTC/USD" settle under "BTCUSD".
fn ledger_symbol(pair: &str) -> String {
    pair.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

#[async_trait]
impl TradingAdapter for LedgerTradingAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<OrderResult> {
        let ledger_symbol = ledger_symbol(symbol);
        let price = match price {
            Some(p) => p,
            None => self
                .quotes
                .read()
                .await
                .get(&ledger_symbol)
                .copied()
                .with_context(|| format!("No quote for {}", symbol))?,
        };

        let scale = self.asset_class.quantity_scale();
        let mut units = SizingEngine::notional_to_quantity(quantity, price, scale, &ledger_symbol);
        if side == OrderSide::Sell {
            let held = self
                .engine
                .store()
                .open_positions(self.portfolio_id)
                .await?
                .into_iter()
                .find(|p| p.symbol == ledger_symbol)
                .map(|p| p.quantity)
                .unwrap_or(Decimal::ZERO);
            if units > held {
                debug!(
                    "LedgerTradingAdapter [{}]: capping sell of {} at held {}",
                    self.platform, ledger_symbol, held
                );
                units = held;
            }
        }

        let request = TradeRequest::new(self.portfolio_id, &ledger_symbol, side, units, price)
            .with_asset_class(self.asset_class)
            .with_platform(&self.platform);
        let result = self.engine.execute_trade(request).await?;

        info!(
            "LedgerTradingAdapter [{}]: {} {} {} @ {}",
            self.platform, side, result.trade.quantity, ledger_symbol, result.trade.price
        );
        Ok(OrderResult {
            order_id: result.trade.id.to_string(),
            symbol: result.trade.symbol,
            side,
            quantity: result.trade.quantity,
            price: result.trade.price,
            platform: self.platform.clone(),
            pnl: result.realized_pnl,
        })
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>> {
        let positions = self.engine.store().open_positions(self.portfolio_id).await?;
        Ok(positions
            .into_iter()
            .map(|p| VenuePosition {
                symbol: p.symbol,
                quantity: p.quantity,
                average_price: p.average_price,
                current_price: p.current_price,
            })
            .collect())
    }

    async fn get_account_status(&self) -> Result<AccountStatus> {
        let portfolio = self
            .engine
            .store()
            .find_portfolio(self.portfolio_id)
            .await?
            .with_context(|| format!("Portfolio {} not found", self.portfolio_id))?;
        Ok(AccountStatus {
            platform: self.platform.clone(),
            cash: portfolio.balance,
            equity: portfolio.total_value,
        })
    }

    async fn is_market_open(&self) -> Result<bool> {
        Ok(self.asset_class == AssetClass::Crypto || self.market_open.load(Ordering::SeqCst))
    }

    /// The trade engine publishes every settled fill.
    fn publishes_fills(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::trade_engine::LedgerConfig;
    use crate::domain::errors::{TradingError, ValidationError};
    use crate::infrastructure::repositories::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    async fn adapter(asset_class: AssetClass) -> LedgerTradingAdapter {
        let store = InMemoryLedgerStore::new();
        let engine = Arc::new(TradeEngine::new(Arc::new(store), LedgerConfig::default()));
        let portfolio = engine.open_portfolio("paper").await.unwrap();
        LedgerTradingAdapter::new(engine, portfolio.id, asset_class, "paper")
    }

    #[test]
    fn test_pair_symbols_are_flattened() {
        assert_eq!(ledger_symbol("btc/usd"), "BTCUSD");
        assert_eq!(ledger_symbol("EUR_USD"), "EURUSD");
    }

    #[tokio::test]
    async fn test_notional_converted_to_units() {
        let adapter = adapter(AssetClass::Crypto).await;

        let fill = adapter
            .place_order("BTC/USD", OrderSide::Buy, dec!(400), Some(dec!(30000)))
            .await
            .unwrap();

        assert_eq!(fill.symbol, "BTCUSD");
        assert_eq!(fill.quantity, dec!(0.013333));
        let status = adapter.get_account_status().await.unwrap();
        assert_eq!(status.cash, dec!(10000) - dec!(0.013333) * dec!(30000));
    }

    #[tokio::test]
    async fn test_sell_capped_at_holdings_and_quotes_used() {
        let adapter = adapter(AssetClass::Stocks).await;
        adapter.set_quote("AAPL", dec!(100)).await;
        adapter
            .place_order("AAPL", OrderSide::Buy, dec!(500), None)
            .await
            .unwrap();

        let fill = adapter
            .place_order("AAPL", OrderSide::Sell, dec!(900), Some(dec!(110)))
            .await
            .unwrap();

        assert_eq!(fill.quantity, dec!(5));
        assert_eq!(fill.pnl, Some(dec!(50)));
        assert!(adapter.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_quote_is_error_and_validation_surfaces() {
        let adapter = adapter(AssetClass::Stocks).await;
        assert!(
            adapter
                .place_order("MSFT", OrderSide::Buy, dec!(100), None)
                .await
                .is_err()
        );

        let err = adapter
            .place_order("MSFT", OrderSide::Sell, dec!(100), Some(dec!(10)))
            .await
            .unwrap_err();
        let trading = err.downcast_ref::<TradingError>().unwrap();
        assert!(matches!(
            trading,
            TradingError::ValidationFailed(ValidationError::NonPositiveQuantity { .. })
        ));
    }

    #[tokio::test]
    async fn test_market_hours_only_gate_non_crypto() {
        let stocks = adapter(AssetClass::Stocks).await;
        stocks.set_market_open(false);
        assert!(!stocks.is_market_open().await.unwrap());

        let crypto = adapter(AssetClass::Crypto).await;
        crypto.set_market_open(false);
        assert!(crypto.is_market_open().await.unwrap());
    }
}
