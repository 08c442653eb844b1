//! Multi-Asset Orchestrator
//!
//! Single entry point from a `TradingSignal` to a placed order:
//! 1. HOLD or low confidence: skipped, no adapter touched
//! 2. adapter looked up by asset class (missing adapter is a configuration error)
//! 3. market closed: deferred, nothing reserved
//! 4. half-Kelly notional
//! 5. order placed through the adapter's circuit breaker
//! 6. `TradeExecuted` published (notification only), unless the venue
//!    already publishes its own fills
//!
//! Every adapter call, including the market-hours check, goes through the
//! breaker named after the adapter's platform, so one failing venue cannot
//! starve the others.

use crate::application::idempotency::IdempotencyCache;
use crate::application::risk_management::sizing_engine::{SizingConfig, SizingEngine};
use crate::application::saga::SagaCoordinator;
use crate::domain::errors::OrchestratorError;
use crate::domain::events::{DomainEvent, EventPayload, SignalGenerated, TradeExecuted};
use crate::domain::market::prediction_market::{ArbitrageLeg, ArbitrageOpportunity};
use crate::domain::ports::{AccountStatus, OrderResult, TradingAdapter, VenuePosition};
use crate::domain::trading::types::{AssetClass, OrderSide, SignalAction, TradingSignal};
use crate::infrastructure::core::{CircuitBreaker, CircuitBreakerError, CircuitBreakerRegistry};
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Signals below this confidence are skipped
    pub min_confidence: f64,
    pub sizing: SizingConfig,
    pub idempotency_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.60,
            sizing: SizingConfig::default(),
            idempotency_ttl: Duration::from_secs(86_400),
        }
    }
}

/// Outcome of `execute_signal`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Not actionable; no adapter was called
    Skipped { reason: String },
    /// Market closed; the caller may re-queue the signal
    Deferred {
        asset_class: AssetClass,
        reason: String,
    },
    Executed {
        asset_class: AssetClass,
        notional: Decimal,
        order: OrderResult,
    },
}

impl ExecutionResult {
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionResult::Executed { .. })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, ExecutionResult::Deferred { .. })
    }
}

/// Both legs of a settled arbitrage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageExecution {
    pub saga_id: String,
    /// Contract pairs bought
    pub contracts: Decimal,
    pub leg_a: OrderResult,
    pub leg_b: OrderResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueSnapshot {
    pub platform: String,
    pub account: AccountStatus,
    pub positions: Vec<VenuePosition>,
}

/// Cross-venue view; a failing venue shows up in `errors`, not as a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub taken_at: DateTime<Utc>,
    pub venues: BTreeMap<AssetClass, VenueSnapshot>,
    pub errors: BTreeMap<AssetClass, String>,
    pub total_equity: Decimal,
}

#[derive(Clone)]
struct RegisteredAdapter {
    adapter: Arc<dyn TradingAdapter>,
    breaker: Arc<CircuitBreaker>,
}

pub struct MultiAssetOrchestrator {
    adapters: RwLock<HashMap<AssetClass, RegisteredAdapter>>,
    breakers: CircuitBreakerRegistry,
    event_bus: EventBus,
    idempotency: IdempotencyCache<ExecutionResult>,
    config: OrchestratorConfig,
}

impl MultiAssetOrchestrator {
    pub fn new(config: OrchestratorConfig, breakers: CircuitBreakerRegistry, event_bus: EventBus) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            breakers,
            event_bus,
            idempotency: IdempotencyCache::new(config.idempotency_ttl),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Route `asset_class` to `adapter`, guarded by the breaker of its platform.
    pub async fn register_adapter(&self, asset_class: AssetClass, adapter: Arc<dyn TradingAdapter>) {
        let breaker = self.breakers.get_or_create(adapter.platform()).await;
        info!(
            "Orchestrator: {} routed to {} (breaker [{}])",
            asset_class,
            adapter.platform(),
            breaker.name()
        );
        self.adapters
            .write()
            .await
            .insert(asset_class, RegisteredAdapter { adapter, breaker });
    }

    pub async fn registered_asset_classes(&self) -> Vec<AssetClass> {
        let mut classes: Vec<AssetClass> = self.adapters.read().await.keys().copied().collect();
        classes.sort();
        classes
    }

    async fn adapter_for(&self, asset_class: AssetClass) -> Result<RegisteredAdapter, OrchestratorError> {
        self.adapters
            .read()
            .await
            .get(&asset_class)
            .cloned()
            .ok_or(OrchestratorError::AdapterNotRegistered { asset_class })
    }

    pub async fn execute_signal(&self, signal: &TradingSignal) -> Result<ExecutionResult, OrchestratorError> {
        let Some(side) = signal.action.side() else {
            debug!("Orchestrator: HOLD on {}, skipping", signal.pair);
            return Ok(ExecutionResult::Skipped {
                reason: "hold signal".to_string(),
            });
        };
        if signal.confidence.is_nan() || signal.confidence < self.config.min_confidence {
            debug!(
                "Orchestrator: {} confidence {:.2} below {:.2}, skipping",
                signal.pair, signal.confidence, self.config.min_confidence
            );
            return Ok(ExecutionResult::Skipped {
                reason: format!(
                    "confidence {:.2} below minimum {:.2}",
                    signal.confidence, self.config.min_confidence
                ),
            });
        }

        let registered = self.adapter_for(signal.asset_class).await?;
        self.publish_signal(signal);

        if !market_open(&registered).await? {
            info!(
                "Orchestrator: {} market closed, deferring {}",
                signal.asset_class, signal.pair
            );
            return Ok(ExecutionResult::Deferred {
                asset_class: signal.asset_class,
                reason: format!("{} market closed", signal.asset_class),
            });
        }

        let notional = SizingEngine::half_kelly_notional(&self.config.sizing, signal.confidence);
        let order = place_order(&registered, &signal.pair, side, notional, None).await?;

        info!(
            "Orchestrator: {} {} on {} filled ({} @ {}, notional ${})",
            side, signal.pair, order.platform, order.quantity, order.price, notional
        );
        self.publish_fill(&registered, &order, signal.asset_class);

        Ok(ExecutionResult::Executed {
            asset_class: signal.asset_class,
            notional,
            order,
        })
    }

    /// `execute_signal` at most once per live `key`. Deferred results are not cached.
    pub async fn execute_signal_idempotent(
        &self,
        key: &str,
        signal: &TradingSignal,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let (result, cached) = self
            .idempotency
            .get_or_try_insert_if(key, || self.execute_signal(signal), |r| !r.is_deferred())
            .await?;
        if cached {
            info!("Orchestrator: duplicate signal key {}, returning cached result", key);
        }
        Ok(result)
    }

    /// Forget every cached signal result.
    pub async fn clear_idempotency(&self) {
        self.idempotency.clear().await;
    }

    /// Buy both legs of `opportunity` as a two-step saga.
    ///
    /// Both legs size to the same number of contracts; a failed second leg
    /// sells back the first through the same breaker.
    pub async fn execute_arbitrage(
        &self,
        opportunity: &ArbitrageOpportunity,
        confidence: f64,
    ) -> Result<Option<ArbitrageExecution>, OrchestratorError> {
        let registered = self.adapter_for(AssetClass::PredictionMarkets).await?;
        if !market_open(&registered).await? {
            info!(
                "Orchestrator: prediction markets closed, deferring arbitrage on '{}'",
                opportunity.description
            );
            return Ok(None);
        }

        let budget = SizingEngine::half_kelly_notional(&self.config.sizing, confidence);
        let contracts =
            (budget / opportunity.cost).round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if contracts <= Decimal::ZERO {
            warn!(
                "Orchestrator: budget ${} buys no contracts at cost {}",
                budget, opportunity.cost
            );
            return Ok(None);
        }

        let fill_a: Arc<Mutex<Option<OrderResult>>> = Arc::default();
        let fill_b: Arc<Mutex<Option<OrderResult>>> = Arc::default();
        let mut saga = SagaCoordinator::new();
        let saga_id = saga.saga_id().to_string();
        add_leg(&mut saga, "leg_a", &registered, &opportunity.leg_a, contracts, fill_a.clone());
        add_leg(&mut saga, "leg_b", &registered, &opportunity.leg_b, contracts, fill_b.clone());

        info!(
            "Orchestrator: executing arbitrage '{}' ({}), {} contracts",
            opportunity.description, opportunity.strategy_description, contracts
        );
        saga.execute().await?;

        let (Some(leg_a), Some(leg_b)) = (fill_a.lock().await.take(), fill_b.lock().await.take())
        else {
            error!("Orchestrator: saga {} finished without both fills", saga_id);
            return Ok(None);
        };
        self.publish_fill(&registered, &leg_a, AssetClass::PredictionMarkets);
        self.publish_fill(&registered, &leg_b, AssetClass::PredictionMarkets);

        Ok(Some(ArbitrageExecution {
            saga_id,
            contracts,
            leg_a,
            leg_b,
        }))
    }

    /// Positions and account status of every venue, fetched concurrently.
    pub async fn get_portfolio_snapshot(&self) -> PortfolioSnapshot {
        let adapters: Vec<(AssetClass, RegisteredAdapter)> = self
            .adapters
            .read()
            .await
            .iter()
            .map(|(class, registered)| (*class, registered.clone()))
            .collect();

        let fetches = adapters.into_iter().map(|(class, registered)| async move {
            let result = async {
                let account = registered
                    .breaker
                    .call(registered.adapter.get_account_status())
                    .await?;
                let positions = registered
                    .breaker
                    .call(registered.adapter.get_positions())
                    .await?;
                Ok::<_, CircuitBreakerError<anyhow::Error>>(VenueSnapshot {
                    platform: registered.adapter.platform().to_string(),
                    account,
                    positions,
                })
            }
            .await;
            (class, result)
        });

        let mut snapshot = PortfolioSnapshot {
            taken_at: Utc::now(),
            venues: BTreeMap::new(),
            errors: BTreeMap::new(),
            total_equity: Decimal::ZERO,
        };
        for (class, result) in join_all(fetches).await {
            match result {
                Ok(venue) => {
                    snapshot.total_equity += venue.account.equity;
                    snapshot.venues.insert(class, venue);
                }
                Err(e) => {
                    warn!("Orchestrator: snapshot of {} failed: {}", class, e);
                    snapshot.errors.insert(class, e.to_string());
                }
            }
        }
        snapshot
    }

    pub fn publish_signal(&self, signal: &TradingSignal) {
        self.event_bus.publish(DomainEvent::new(
            format!("signal:{}", signal.pair),
            EventPayload::SignalGenerated(SignalGenerated {
                pair: signal.pair.clone(),
                action: signal_action_name(signal.action).to_string(),
                confidence: signal.confidence,
                asset_class: signal.asset_class,
            }),
        ));
    }

    fn publish_fill(&self, registered: &RegisteredAdapter, order: &OrderResult, asset_class: AssetClass) {
        if registered.adapter.publishes_fills() {
            return;
        }
        self.event_bus.publish(DomainEvent::trade_executed(
            format!("venue:{}", order.platform),
            TradeExecuted {
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: order.quantity,
                price: order.price,
                pnl: order.pnl,
                platform: order.platform.clone(),
                asset_class: Some(asset_class),
            },
        ));
    }
}

fn signal_action_name(action: SignalAction) -> &'static str {
    match action {
        SignalAction::Buy => "BUY",
        SignalAction::Sell => "SELL",
        SignalAction::Hold => "HOLD",
    }
}

fn dependency_error(
    registered: &RegisteredAdapter,
    err: CircuitBreakerError<anyhow::Error>,
) -> OrchestratorError {
    let dependency = registered.adapter.platform().to_string();
    match err {
        CircuitBreakerError::Open { retry_after, .. } => OrchestratorError::DependencyUnavailable {
            dependency,
            reason: "circuit breaker open".to_string(),
            retry_after: Some(retry_after),
        },
        CircuitBreakerError::Inner(e) => OrchestratorError::DependencyUnavailable {
            dependency,
            reason: format!("{:#}", e),
            retry_after: None,
        },
    }
}

async fn market_open(registered: &RegisteredAdapter) -> Result<bool, OrchestratorError> {
    registered
        .breaker
        .call(registered.adapter.is_market_open())
        .await
        .map_err(|e| dependency_error(registered, e))
}

async fn place_order(
    registered: &RegisteredAdapter,
    pair: &str,
    side: OrderSide,
    notional: Decimal,
    price: Option<Decimal>,
) -> Result<OrderResult, OrchestratorError> {
    registered
        .breaker
        .call(registered.adapter.place_order(pair, side, notional, price))
        .await
        .map_err(|e| dependency_error(registered, e))
}

/// Saga step buying `contracts` of one leg; the compensation sells the fill back.
fn add_leg(
    saga: &mut SagaCoordinator,
    name: &str,
    registered: &RegisteredAdapter,
    leg: &ArbitrageLeg,
    contracts: Decimal,
    fill: Arc<Mutex<Option<OrderResult>>>,
) {
    let pair = leg.pair();
    let price = leg.price;
    let notional = contracts * price;

    let action = {
        let registered = registered.clone();
        let pair = pair.clone();
        let fill = fill.clone();
        move || async move {
            let order = place_order(&registered, &pair, OrderSide::Buy, notional, Some(price)).await?;
            *fill.lock().await = Some(order);
            Ok::<(), anyhow::Error>(())
        }
    };
    let compensation = {
        let registered = registered.clone();
        move || async move {
            let Some(order) = fill.lock().await.take() else {
                return Ok::<(), anyhow::Error>(());
            };
            warn!(
                "Orchestrator: unwinding {} {} on {}",
                order.quantity, pair, order.platform
            );
            let notional = order.quantity * order.price;
            place_order(&registered, &pair, OrderSide::Sell, notional, Some(order.price)).await?;
            Ok(())
        }
    };
    saga.add_step(format!("{}:{}", name, leg.pair()), action, compensation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::prediction_market::PredictionMarket;
    use crate::infrastructure::core::{CircuitBreakerConfig, CircuitState};
    use crate::infrastructure::mock::MockTradingAdapter;
    use rust_decimal_macros::dec;

    fn orchestrator() -> MultiAssetOrchestrator {
        MultiAssetOrchestrator::new(
            OrchestratorConfig::default(),
            CircuitBreakerRegistry::new(CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                ..CircuitBreakerConfig::default()
            }),
            EventBus::new(),
        )
    }

    fn buy(asset_class: AssetClass, confidence: f64) -> TradingSignal {
        TradingSignal::new(SignalAction::Buy, confidence, "BTC/USD", asset_class, "test")
    }

    #[tokio::test]
    async fn test_hold_and_low_confidence_skip_without_adapter() {
        let orch = orchestrator();
        let hold = TradingSignal::new(SignalAction::Hold, 0.99, "X", AssetClass::Crypto, "");
        assert!(matches!(
            orch.execute_signal(&hold).await.unwrap(),
            ExecutionResult::Skipped { .. }
        ));
        assert!(matches!(
            orch.execute_signal(&buy(AssetClass::Crypto, 0.3)).await.unwrap(),
            ExecutionResult::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_adapter_is_configuration_error() {
        let orch = orchestrator();
        let err = orch.execute_signal(&buy(AssetClass::Forex, 0.9)).await.unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_closed_market_defers() {
        let orch = orchestrator();
        let adapter = MockTradingAdapter::new("alpaca");
        adapter.set_market_open(false);
        orch.register_adapter(AssetClass::Stocks, Arc::new(adapter.clone())).await;

        let result = orch.execute_signal(&buy(AssetClass::Stocks, 0.9)).await.unwrap();
        assert!(result.is_deferred());
        assert_eq!(adapter.order_calls(), 0);
    }

    #[tokio::test]
    async fn test_executes_with_half_kelly_notional() {
        let orch = orchestrator();
        let adapter = MockTradingAdapter::new("kraken");
        orch.register_adapter(AssetClass::Crypto, Arc::new(adapter.clone())).await;

        let result = orch.execute_signal(&buy(AssetClass::Crypto, 0.8)).await.unwrap();

        let ExecutionResult::Executed { notional, order, .. } = result else {
            panic!("expected execution");
        };
        assert_eq!(notional, dec!(400));
        assert_eq!(order.quantity, dec!(400));
        assert_eq!(adapter.order_calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_venue_trips_only_its_breaker() {
        let orch = orchestrator();
        let broken = MockTradingAdapter::new("broken");
        broken.set_always_fail(true);
        let healthy = MockTradingAdapter::new("healthy");
        orch.register_adapter(AssetClass::Stocks, Arc::new(broken.clone())).await;
        orch.register_adapter(AssetClass::Crypto, Arc::new(healthy)).await;

        for _ in 0..2 {
            let err = orch.execute_signal(&buy(AssetClass::Stocks, 0.9)).await.unwrap_err();
            assert!(matches!(
                err,
                OrchestratorError::DependencyUnavailable { retry_after: None, .. }
            ));
        }
        let err = orch.execute_signal(&buy(AssetClass::Stocks, 0.9)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::DependencyUnavailable { retry_after: Some(_), .. }
        ));
        assert_eq!(broken.order_calls(), 0);

        assert!(
            orch.execute_signal(&buy(AssetClass::Crypto, 0.9))
                .await
                .unwrap()
                .is_executed()
        );
        let breaker = orch.breakers.get("broken").await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_idempotent_execution_places_once() {
        let orch = orchestrator();
        let adapter = MockTradingAdapter::new("kraken");
        orch.register_adapter(AssetClass::Crypto, Arc::new(adapter.clone())).await;
        let signal = buy(AssetClass::Crypto, 0.9);

        let first = orch.execute_signal_idempotent("sig-1", &signal).await.unwrap();
        let second = orch.execute_signal_idempotent("sig-1", &signal).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(adapter.order_calls(), 1);
    }

    #[tokio::test]
    async fn test_cleared_cache_replays_signal() {
        let orch = orchestrator();
        let adapter = MockTradingAdapter::new("kraken");
        orch.register_adapter(AssetClass::Crypto, Arc::new(adapter.clone())).await;
        let signal = buy(AssetClass::Crypto, 0.9);

        orch.execute_signal_idempotent("sig-1", &signal).await.unwrap();
        orch.clear_idempotency().await;
        orch.execute_signal_idempotent("sig-1", &signal).await.unwrap();

        assert_eq!(adapter.order_calls(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_records_per_class_errors() {
        let orch = orchestrator();
        let broken = MockTradingAdapter::new("broken");
        broken.set_always_fail(true);
        orch.register_adapter(AssetClass::Stocks, Arc::new(broken)).await;
        orch.register_adapter(AssetClass::Crypto, Arc::new(MockTradingAdapter::new("kraken")))
            .await;

        let snapshot = orch.get_portfolio_snapshot().await;

        assert!(snapshot.venues.contains_key(&AssetClass::Crypto));
        assert!(snapshot.errors.contains_key(&AssetClass::Stocks));
        assert_eq!(snapshot.total_equity, dec!(100000));
    }

    fn opportunity() -> ArbitrageOpportunity {
        let kalshi = PredictionMarket::new("K", "Fed cuts", dec!(0.42), dec!(0.58), "kalshi");
        let poly = PredictionMarket::new("P", "Fed cuts", dec!(0.45), dec!(0.53), "polymarket");
        kalshi.arbitrage_against(&poly).unwrap()
    }

    #[tokio::test]
    async fn test_arbitrage_buys_both_legs() {
        let orch = orchestrator();
        let venue = MockTradingAdapter::new("predictions");
        orch.register_adapter(AssetClass::PredictionMarkets, Arc::new(venue.clone()))
            .await;

        let execution = orch.execute_arbitrage(&opportunity(), 0.9).await.unwrap().unwrap();

        // 450 / 0.95 = 473.68 contracts
        assert_eq!(execution.contracts, dec!(473.68));
        assert_eq!(execution.leg_a.symbol, "kalshi:K:YES");
        assert_eq!(execution.leg_b.symbol, "polymarket:P:NO");
        assert_eq!(execution.leg_a.price, dec!(0.42));
        assert_eq!(venue.fills().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_second_leg_unwinds_first() {
        let orch = orchestrator();
        let venue = MockTradingAdapter::new("predictions");
        venue.fail_symbol("polymarket").await;
        orch.register_adapter(AssetClass::PredictionMarkets, Arc::new(venue.clone()))
            .await;

        let err = orch.execute_arbitrage(&opportunity(), 0.9).await.unwrap_err();

        let OrchestratorError::Saga(saga) = err else {
            panic!("expected saga failure");
        };
        assert!(saga.failed_step().starts_with("leg_b"));
        assert!(saga.compensation_failures().is_empty());
        let fills = venue.fills().await;
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[1].side, OrderSide::Sell);
        assert_eq!(fills[1].symbol, "kalshi:K:YES");
    }
}
