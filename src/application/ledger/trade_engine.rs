//! Atomic trade execution against the ledger.
//!
//! Every fill runs the same protocol:
//! 1. normalize and range-check the intent
//! 2. validate against an unlocked snapshot (reject without locking)
//! 3. take the non-blocking portfolio lock, re-validate against the locked state
//! 4. insert the trade, upsert the position, update the portfolio, commit
//! 5. publish events only after the commit succeeded
//!
//! Any failure after the lock rolls the whole transaction back.

use crate::domain::errors::{StoreError, TradingError, ValidationError};
use crate::domain::events::{DomainEvent, EventPayload, PositionClosed, TradeExecuted};
use crate::domain::repositories::{LedgerStore, LedgerTransaction};
use crate::domain::trading::portfolio::{Portfolio, Position, round_money};
use crate::domain::trading::types::{
    AssetClass, ExitReason, OrderSide, PortfolioId, PositionId, Trade,
};
use crate::domain::trading::validation::{
    normalize_symbol, validate_percentage, validate_price, validate_quantity,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Platform tag used on events for fills settled by the ledger itself.
pub const LEDGER_PLATFORM: &str = "ledger";

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// Balance that must remain after any buy
    pub min_balance: Decimal,
    /// Maximum cost of one buy as a fraction of total value
    pub max_position_fraction: Decimal,
    pub max_positions: usize,
    /// Balance of lazily created portfolios
    pub initial_balance: Decimal,
    /// Charged on every fill's notional
    pub commission_rate: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_balance: dec!(100.00),
            max_position_fraction: dec!(0.10),
            max_positions: 50,
            initial_balance: dec!(10000.00),
            commission_rate: Decimal::ZERO,
        }
    }
}

impl LedgerConfig {
    pub fn commission(&self, notional: Decimal) -> Decimal {
        round_money(notional * self.commission_rate)
    }
}

/// Order intent submitted to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub portfolio_id: PortfolioId,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub asset_class: AssetClass,
    /// Venue named in the `TradeExecuted` event; the bare ledger when unset
    pub platform: Option<String>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
}

impl TradeRequest {
    pub fn new(
        portfolio_id: PortfolioId,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            portfolio_id,
            symbol: symbol.into(),
            side,
            quantity,
            price,
            asset_class: AssetClass::Stocks,
            platform: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            trailing_stop_pct: None,
        }
    }

    pub fn buy(portfolio_id: PortfolioId, symbol: impl Into<String>, quantity: Decimal, price: Decimal) -> Self {
        Self::new(portfolio_id, symbol, OrderSide::Buy, quantity, price)
    }

    pub fn sell(portfolio_id: PortfolioId, symbol: impl Into<String>, quantity: Decimal, price: Decimal) -> Self {
        Self::new(portfolio_id, symbol, OrderSide::Sell, quantity, price)
    }

    pub fn with_asset_class(mut self, asset_class: AssetClass) -> Self {
        self.asset_class = asset_class;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_protection(mut self, stop_loss_pct: Option<Decimal>, take_profit_pct: Option<Decimal>) -> Self {
        self.stop_loss_pct = stop_loss_pct;
        self.take_profit_pct = take_profit_pct;
        self
    }

    pub fn with_trailing_stop(mut self, pct: Decimal) -> Self {
        self.trailing_stop_pct = Some(pct);
        self
    }
}

/// Settled outcome of a successful `execute_trade`.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    pub trade: Trade,
    pub position: Position,
    pub portfolio: Portfolio,
    pub realized_pnl: Option<Decimal>,
    pub position_closed: bool,
}

/// Intent after normalization: symbol upper-cased, price and quantity quantized.
#[derive(Debug, Clone)]
struct Intent {
    request: TradeRequest,
    scale: u32,
}

impl Intent {
    fn notional(&self) -> Decimal {
        self.request.quantity * self.request.price
    }
}

pub struct TradeEngine {
    store: Arc<dyn LedgerStore>,
    event_bus: Option<EventBus>,
    metrics: Option<Metrics>,
    config: LedgerConfig,
}

impl TradeEngine {
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            event_bus: None,
            metrics: None,
            config,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Get or lazily create the single portfolio of `owner`.
    pub async fn open_portfolio(&self, owner: &str) -> Result<Portfolio, TradingError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(ValidationError::EmptySymbol.into());
        }
        Ok(self
            .store
            .get_or_create_portfolio(owner, self.config.initial_balance)
            .await?)
    }

    /// Settle one fill atomically.
    pub async fn execute_trade(&self, request: TradeRequest) -> Result<TradeResult, TradingError> {
        let result = self.execute_inner(request).await;
        if let Err(e) = &result {
            self.record_rejection(e);
        }
        result
    }

    async fn execute_inner(&self, request: TradeRequest) -> Result<TradeResult, TradingError> {
        let intent = self.normalize(request)?;
        let portfolio_id = intent.request.portfolio_id;

        // Fail fast on the unlocked snapshot
        let snapshot = self
            .store
            .find_portfolio(portfolio_id)
            .await?
            .ok_or(ValidationError::PortfolioNotFound { portfolio_id })?;
        let positions = self.store.open_positions(portfolio_id).await?;
        validate_intent(&self.config, &snapshot, &positions, &intent)?;

        let mut tx = self.store.begin().await?;
        let outcome = self.settle_locked(tx.as_mut(), &intent).await;
        let result = match outcome {
            Ok(result) => {
                tx.commit().await?;
                result
            }
            Err(e) => {
                rollback(tx, portfolio_id).await;
                return Err(e);
            }
        };

        info!(
            "TradeEngine: {} {} {} @ {} settled on portfolio {} (balance {}, total {})",
            result.trade.side,
            result.trade.quantity,
            result.trade.symbol,
            result.trade.price,
            portfolio_id,
            result.portfolio.balance,
            result.portfolio.total_value
        );
        self.publish_fill(&result, &intent.request);
        Ok(result)
    }

    async fn settle_locked(
        &self,
        tx: &mut dyn LedgerTransaction,
        intent: &Intent,
    ) -> Result<TradeResult, TradingError> {
        let request = &intent.request;
        let mut portfolio = tx.lock_portfolio_for_update(request.portfolio_id).await?;
        let mut positions = tx.open_positions(request.portfolio_id).await?;

        // Authoritative check against the locked state
        validate_intent(&self.config, &portfolio, &positions, intent)?;

        let existing = positions.iter().position(|p| p.symbol == request.symbol);
        let quantity = match (request.side, existing) {
            (OrderSide::Sell, Some(idx)) => positions[idx].sell_quantity(request.quantity, intent.scale),
            _ => request.quantity,
        };
        let notional = quantity * request.price;
        let commission = self.config.commission(notional);

        let (position, pnl) = match request.side {
            OrderSide::Buy => {
                portfolio.balance -= notional + commission;
                let mut position = match existing {
                    Some(idx) => {
                        let mut p = positions[idx].clone();
                        p.apply_buy(request.quantity, request.price);
                        p
                    }
                    None => Position::open(
                        request.portfolio_id,
                        &request.symbol,
                        request.quantity,
                        request.price,
                    ),
                };
                if request.stop_loss_pct.is_some() || request.take_profit_pct.is_some() {
                    position.set_protection(request.stop_loss_pct, request.take_profit_pct);
                }
                if let Some(pct) = request.trailing_stop_pct {
                    position.trailing_stop_pct = Some(pct);
                }
                (position, None)
            }
            OrderSide::Sell => {
                let idx = existing.ok_or_else(|| ValidationError::NoOpenPosition {
                    symbol: request.symbol.clone(),
                })?;
                let mut position = positions[idx].clone();
                let pnl = position.apply_sell(quantity, request.price, intent.scale);
                portfolio.balance += notional - commission;
                (position, Some(pnl))
            }
        };

        let trade = tx
            .insert_trade(&Trade::pending(
                request.portfolio_id,
                &request.symbol,
                request.side,
                quantity,
                request.price,
                commission,
                pnl,
            ))
            .await?;
        let position = tx.upsert_position(&position).await?;

        match existing {
            Some(idx) => positions[idx] = position.clone(),
            None => positions.push(position.clone()),
        }
        portfolio.recompute_total_value(&positions);
        tx.update_portfolio(&portfolio).await?;

        Ok(TradeResult {
            trade,
            position_closed: !position.is_open(),
            position,
            portfolio,
            realized_pnl: pnl,
        })
    }

    /// Update marks of open positions and recompute total value under the lock.
    pub async fn mark_to_market(
        &self,
        portfolio_id: PortfolioId,
        prices: &HashMap<String, Decimal>,
    ) -> Result<Portfolio, TradingError> {
        let mut tx = self.store.begin().await?;
        let outcome = async {
            let mut portfolio = tx.lock_portfolio_for_update(portfolio_id).await?;
            let mut positions = tx.open_positions(portfolio_id).await?;
            for position in positions.iter_mut() {
                if let Some(price) = prices.get(&position.symbol)
                    && *price > Decimal::ZERO
                    && *price != position.current_price
                {
                    position.current_price = *price;
                    *position = tx.upsert_position(position).await?;
                }
            }
            portfolio.recompute_total_value(&positions);
            tx.update_portfolio(&portfolio).await?;
            Ok::<Portfolio, StoreError>(portfolio)
        }
        .await;

        match outcome {
            Ok(portfolio) => {
                tx.commit().await?;
                debug!(
                    "TradeEngine: marked portfolio {} to market (total {})",
                    portfolio_id, portfolio.total_value
                );
                Ok(portfolio)
            }
            Err(e) => {
                rollback(tx, portfolio_id).await;
                Err(e.into())
            }
        }
    }

    /// Set stop-loss / take-profit (relative to average entry) and trailing percentage.
    pub async fn set_protection(
        &self,
        position_id: PositionId,
        stop_loss_pct: Option<Decimal>,
        take_profit_pct: Option<Decimal>,
        trailing_stop_pct: Option<Decimal>,
    ) -> Result<Position, TradingError> {
        if let Some(pct) = stop_loss_pct {
            validate_percentage("stop_loss_pct", pct)?;
        }
        if let Some(pct) = take_profit_pct {
            validate_percentage("take_profit_pct", pct)?;
        }
        if let Some(pct) = trailing_stop_pct {
            validate_percentage("trailing_stop_pct", pct)?;
        }

        let position = self
            .store
            .find_position(position_id)
            .await?
            .ok_or(ValidationError::PositionNotFound { position_id })?;
        let portfolio_id = position.portfolio_id;

        let mut tx = self.store.begin().await?;
        let outcome = async {
            tx.lock_portfolio_for_update(portfolio_id).await?;
            let mut position = tx
                .find_position(position_id)
                .await?
                .filter(Position::is_open)
                .ok_or(ValidationError::NoOpenPosition {
                    symbol: position.symbol.clone(),
                })?;
            position.set_protection(stop_loss_pct, take_profit_pct);
            if trailing_stop_pct.is_some() {
                position.trailing_stop_pct = trailing_stop_pct;
            }
            Ok::<Position, TradingError>(tx.upsert_position(&position).await?)
        }
        .await;

        match outcome {
            Ok(position) => {
                tx.commit().await?;
                info!(
                    "TradeEngine: protection on {} set (stop {:?}, target {:?}, trail {:?})",
                    position.symbol,
                    position.stop_loss_price,
                    position.take_profit_price,
                    position.trailing_stop_pct
                );
                Ok(position)
            }
            Err(e) => {
                rollback(tx, portfolio_id).await;
                Err(e)
            }
        }
    }

    fn normalize(&self, mut request: TradeRequest) -> Result<Intent, ValidationError> {
        request.symbol = normalize_symbol(&request.symbol)?;
        request.price = validate_price(request.price)?;
        request.quantity = validate_quantity(request.quantity, request.asset_class)?;
        if let Some(pct) = request.stop_loss_pct {
            validate_percentage("stop_loss_pct", pct)?;
        }
        if let Some(pct) = request.take_profit_pct {
            validate_percentage("take_profit_pct", pct)?;
        }
        if let Some(pct) = request.trailing_stop_pct {
            validate_percentage("trailing_stop_pct", pct)?;
        }
        let scale = request.asset_class.quantity_scale();
        Ok(Intent { request, scale })
    }

    fn publish_fill(&self, result: &TradeResult, request: &TradeRequest) {
        let Some(bus) = &self.event_bus else {
            return;
        };
        let source = format!("portfolio:{}", result.portfolio.id);
        bus.publish(DomainEvent::trade_executed(
            source.clone(),
            TradeExecuted {
                symbol: result.trade.symbol.clone(),
                side: result.trade.side,
                quantity: result.trade.quantity,
                price: result.trade.price,
                pnl: result.realized_pnl,
                platform: request
                    .platform
                    .clone()
                    .unwrap_or_else(|| LEDGER_PLATFORM.to_string()),
                asset_class: Some(request.asset_class),
            },
        ));
        if result.position_closed {
            bus.publish(DomainEvent::new(
                source,
                EventPayload::PositionClosed(PositionClosed {
                    position_id: result.position.id,
                    symbol: result.position.symbol.clone(),
                    exit_price: result.trade.price,
                    exit_reason: result.position.exit_reason.unwrap_or(ExitReason::Sold),
                    pnl: result.realized_pnl.unwrap_or(Decimal::ZERO),
                }),
            ));
        }
    }

    fn record_rejection(&self, err: &TradingError) {
        let reason = match err {
            TradingError::ValidationFailed(_) => "validation",
            TradingError::ConcurrencyConflict { .. } => "conflict",
            TradingError::DependencyUnavailable { .. } => "dependency",
            TradingError::PersistenceFailure(_) => "persistence",
        };
        warn!("TradeEngine: trade rejected ({}): {}", reason, err);
        if let Some(metrics) = &self.metrics {
            metrics.inc_rejected(reason);
        }
    }
}

/// Pre-trade checks shared by the unlocked and locked passes.
fn validate_intent(
    config: &LedgerConfig,
    portfolio: &Portfolio,
    positions: &[Position],
    intent: &Intent,
) -> Result<(), ValidationError> {
    let request = &intent.request;
    let existing = positions
        .iter()
        .find(|p| p.symbol == request.symbol && p.is_open());

    match request.side {
        OrderSide::Buy => {
            let notional = intent.notional();
            let cost = notional + config.commission(notional);
            if portfolio.balance < cost {
                return Err(ValidationError::InsufficientBalance {
                    need: cost,
                    available: portfolio.balance,
                });
            }
            let remaining = portfolio.balance - cost;
            if remaining < config.min_balance {
                return Err(ValidationError::MinBalanceViolation {
                    remaining,
                    floor: config.min_balance,
                });
            }
            let limit = portfolio.total_value * config.max_position_fraction;
            if cost > limit {
                return Err(ValidationError::PositionSizeExceeded { cost, limit });
            }
            if existing.is_none() && positions.len() >= config.max_positions {
                return Err(ValidationError::MaxPositionsReached {
                    max: config.max_positions,
                });
            }
        }
        OrderSide::Sell => {
            let position = existing.ok_or_else(|| ValidationError::NoOpenPosition {
                symbol: request.symbol.clone(),
            })?;
            if request.quantity > position.quantity {
                return Err(ValidationError::InsufficientQuantity {
                    symbol: request.symbol.clone(),
                    requested: request.quantity,
                    held: position.quantity,
                });
            }
        }
    }
    Ok(())
}

async fn rollback(tx: Box<dyn LedgerTransaction>, portfolio_id: PortfolioId) {
    if let Err(e) = tx.rollback().await {
        error!(
            "TradeEngine: rollback of portfolio {} failed: {}",
            portfolio_id, e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::{FailurePoint, InMemoryLedgerStore};

    async fn engine_with(config: LedgerConfig) -> (TradeEngine, InMemoryLedgerStore, Portfolio) {
        let store = InMemoryLedgerStore::new();
        let engine = TradeEngine::new(Arc::new(store.clone()), config);
        let portfolio = engine.open_portfolio("alice").await.unwrap();
        (engine, store, portfolio)
    }

    async fn engine() -> (TradeEngine, InMemoryLedgerStore, Portfolio) {
        engine_with(LedgerConfig::default()).await
    }

    #[tokio::test]
    async fn test_closing_sell_credits_sub_scale_dust() {
        let (engine, store, portfolio) = engine().await;
        engine
            .execute_trade(
                TradeRequest::buy(portfolio.id, "BTC", dec!(1.000001), dec!(100))
                    .with_asset_class(AssetClass::Crypto),
            )
            .await
            .unwrap();

        // 4 dp sell leaves 0.000001 behind, which goes with it
        let result = engine
            .execute_trade(TradeRequest::sell(portfolio.id, "BTC", dec!(1), dec!(100)))
            .await
            .unwrap();

        assert!(result.position_closed);
        assert_eq!(result.trade.quantity, dec!(1.000001));
        assert_eq!(result.portfolio.balance, dec!(10000));
        assert!(store.open_positions(portfolio.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_buy_debits_balance_and_opens_position() {
        let (engine, _store, portfolio) = engine().await;

        let result = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "aapl", dec!(5), dec!(150)))
            .await
            .unwrap();

        assert_eq!(result.trade.symbol, "AAPL");
        assert_eq!(result.portfolio.balance, dec!(9250));
        // Position marked at fill price keeps total value unchanged
        assert_eq!(result.portfolio.total_value, dec!(10000));
        assert_eq!(result.position.quantity, dec!(5));
        assert!(result.trade.id > 0);
        assert!(result.position.id > 0);
    }

    #[tokio::test]
    async fn test_round_trip_realizes_pnl_and_closes() {
        let (engine, store, portfolio) = engine().await;
        engine
            .execute_trade(TradeRequest::buy(portfolio.id, "AAPL", dec!(5), dec!(150)))
            .await
            .unwrap();

        let result = engine
            .execute_trade(TradeRequest::sell(portfolio.id, "AAPL", dec!(5), dec!(160)))
            .await
            .unwrap();

        assert_eq!(result.realized_pnl, Some(dec!(50)));
        assert!(result.position_closed);
        assert_eq!(result.position.exit_reason, Some(ExitReason::Sold));
        assert_eq!(result.portfolio.balance, dec!(10050));
        assert_eq!(result.portfolio.total_value, dec!(10050));
        assert!(store.open_positions(portfolio.id).await.unwrap().is_empty());
        assert_eq!(store.trades(portfolio.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_commission_charged_both_ways() {
        let (engine, _store, portfolio) = engine_with(LedgerConfig {
            commission_rate: dec!(0.001),
            ..LedgerConfig::default()
        })
        .await;

        let buy = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "MSFT", dec!(2), dec!(300)))
            .await
            .unwrap();
        assert_eq!(buy.trade.commission, dec!(0.60));
        assert_eq!(buy.portfolio.balance, dec!(9399.40));

        let sell = engine
            .execute_trade(TradeRequest::sell(portfolio.id, "MSFT", dec!(2), dec!(300)))
            .await
            .unwrap();
        assert_eq!(sell.portfolio.balance, dec!(9998.80));
    }

    #[tokio::test]
    async fn test_validation_rejections() {
        let (engine, _store, portfolio) = engine().await;

        // 10% of 10000 = 1000 limit
        let err = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "TSLA", dec!(10), dec!(200)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradingError::ValidationFailed(ValidationError::PositionSizeExceeded { .. })
        ));

        let err = engine
            .execute_trade(TradeRequest::sell(portfolio.id, "TSLA", dec!(1), dec!(200)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradingError::ValidationFailed(ValidationError::NoOpenPosition { .. })
        ));

        let err = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "BAD-SYM", dec!(1), dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradingError::ValidationFailed(ValidationError::InvalidSymbol { .. })
        ));
    }

    #[tokio::test]
    async fn test_min_balance_floor() {
        let (engine, _store, portfolio) = engine_with(LedgerConfig {
            initial_balance: dec!(150),
            max_position_fraction: Decimal::ONE,
            ..LedgerConfig::default()
        })
        .await;

        let err = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "F", dec!(6), dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradingError::ValidationFailed(ValidationError::MinBalanceViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_max_positions_ceiling() {
        let (engine, _store, portfolio) = engine_with(LedgerConfig {
            max_positions: 2,
            ..LedgerConfig::default()
        })
        .await;
        for symbol in ["A", "B"] {
            engine
                .execute_trade(TradeRequest::buy(portfolio.id, symbol, dec!(1), dec!(10)))
                .await
                .unwrap();
        }
        // Adding to an existing position is still allowed
        assert!(
            engine
                .execute_trade(TradeRequest::buy(portfolio.id, "A", dec!(1), dec!(10)))
                .await
                .is_ok()
        );
        let err = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "C", dec!(1), dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradingError::ValidationFailed(ValidationError::MaxPositionsReached { max: 2 })
        ));
    }

    #[tokio::test]
    async fn test_locked_portfolio_is_concurrency_conflict() {
        let (engine, store, portfolio) = engine().await;
        let mut held = store.begin().await.unwrap();
        held.lock_portfolio_for_update(portfolio.id).await.unwrap();

        let err = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "AAPL", dec!(1), dec!(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::ConcurrencyConflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_failure_inside_lock_rolls_back_everything() {
        let (engine, store, portfolio) = engine().await;
        store.fail_next(FailurePoint::UpdatePortfolio, "io error").await;

        let err = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "AAPL", dec!(1), dec!(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::PersistenceFailure(_)));

        assert_eq!(store.trade_count().await, 0);
        assert!(store.open_positions(portfolio.id).await.unwrap().is_empty());
        let after = store.find_portfolio(portfolio.id).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(10000));
    }

    #[tokio::test]
    async fn test_protection_set_from_entry() {
        let (engine, _store, portfolio) = engine().await;
        let result = engine
            .execute_trade(
                TradeRequest::buy(portfolio.id, "NVDA", dec!(2), dec!(400))
                    .with_protection(Some(dec!(0.05)), Some(dec!(0.10))),
            )
            .await
            .unwrap();
        assert_eq!(result.position.stop_loss_price, Some(dec!(380)));
        assert_eq!(result.position.take_profit_price, Some(dec!(440)));

        let updated = engine
            .set_protection(result.position.id, Some(dec!(0.02)), None, Some(dec!(0.03)))
            .await
            .unwrap();
        assert_eq!(updated.stop_loss_price, Some(dec!(392)));
        assert_eq!(updated.take_profit_price, Some(dec!(440)));
        assert_eq!(updated.trailing_stop_pct, Some(dec!(0.03)));
    }

    #[tokio::test]
    async fn test_mark_to_market_recomputes_total_value() {
        let (engine, _store, portfolio) = engine().await;
        engine
            .execute_trade(TradeRequest::buy(portfolio.id, "AAPL", dec!(5), dec!(150)))
            .await
            .unwrap();

        let prices = HashMap::from([("AAPL".to_string(), dec!(170))]);
        let marked = engine.mark_to_market(portfolio.id, &prices).await.unwrap();

        // 9250 cash + 5 * 170
        assert_eq!(marked.total_value, dec!(10100));
    }

    #[tokio::test]
    async fn test_trade_event_published_after_commit() {
        let store = InMemoryLedgerStore::new();
        let bus = EventBus::new();
        let engine = TradeEngine::new(Arc::new(store.clone()), LedgerConfig::default())
            .with_event_bus(bus.clone());
        let portfolio = engine.open_portfolio("bob").await.unwrap();

        engine
            .execute_trade(TradeRequest::buy(portfolio.id, "AAPL", dec!(1), dec!(100)))
            .await
            .unwrap();
        let _ = engine
            .execute_trade(TradeRequest::sell(portfolio.id, "MSFT", dec!(1), dec!(100)))
            .await;

        // Only the committed fill produced an event
        assert_eq!(bus.stats().await.queued, 1);
    }
}
