use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::arbitrage::{ArbitrageDetector, ArbitrageScanner};
use crate::application::ledger::{LedgerTradingAdapter, StopLossManager, TradeEngine};
use crate::application::orchestrator::MultiAssetOrchestrator;
use crate::config::Config;
use crate::domain::ports::{MarketFeed, TradingAdapter};
use crate::domain::repositories::LedgerStore;
use crate::domain::trading::types::AssetClass;
use crate::infrastructure::core::CircuitBreakerRegistry;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::mock::{MockTradingAdapter, StaticMarketFeed};
use crate::infrastructure::observability::{Metrics, MetricsListener};
use crate::infrastructure::persistence::{Database, EventRecorder, SqliteLedgerStore};
use crate::infrastructure::repositories::InMemoryLedgerStore;

/// Asset classes settled on the internal ledger, one desk portfolio each.
const LEDGER_ASSET_CLASSES: [AssetClass; 3] = [AssetClass::Stocks, AssetClass::Crypto, AssetClass::Forex];

const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fully wired process, not yet running.
pub struct Application {
    pub config: Config,
    pub event_bus: EventBus,
    pub breakers: CircuitBreakerRegistry,
    pub metrics: Metrics,
    pub database: Option<Database>,
    pub store: Arc<dyn LedgerStore>,
    pub engine: Arc<TradeEngine>,
    pub stop_loss: Arc<StopLossManager>,
    pub orchestrator: Arc<MultiAssetOrchestrator>,
    pub scanner: Arc<ArbitrageScanner>,
    /// Ledger-backed venues; quotes are fed through these
    pub ledger_desks: BTreeMap<AssetClass, Arc<LedgerTradingAdapter>>,
}

/// Running process. Dropping it leaves the workers running; call `shutdown`.
pub struct SystemHandle {
    pub event_bus: EventBus,
    pub breakers: CircuitBreakerRegistry,
    pub metrics: Metrics,
    pub engine: Arc<TradeEngine>,
    pub orchestrator: Arc<MultiAssetOrchestrator>,
    pub scanner: Arc<ArbitrageScanner>,
    pub ledger_desks: BTreeMap<AssetClass, Arc<LedgerTradingAdapter>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Application {
    /// Build with the paper prediction-market feeds (no markets listed).
    pub async fn build(config: Config) -> Result<Self> {
        let feed_a: Arc<dyn MarketFeed> = Arc::new(StaticMarketFeed::new("kalshi", Vec::new()));
        let feed_b: Arc<dyn MarketFeed> = Arc::new(StaticMarketFeed::new("polymarket", Vec::new()));
        Self::build_with_feeds(config, feed_a, feed_b).await
    }

    pub async fn build_with_feeds(
        config: Config,
        feed_a: Arc<dyn MarketFeed>,
        feed_b: Arc<dyn MarketFeed>,
    ) -> Result<Self> {
        info!(
            "Building Tradecore Application (ledger: {})...",
            if config.in_memory { "in-memory" } else { config.database_url.as_str() }
        );

        // 1. Event bus, metrics, breakers
        let event_bus = EventBus::with_config(config.event_bus.bus_config());
        let metrics = Metrics::new()?;
        MetricsListener::attach(metrics.clone(), &event_bus).await;
        let breakers =
            CircuitBreakerRegistry::new(config.breaker.breaker_config()).with_event_bus(event_bus.clone());

        // 2. Ledger store (+ event audit log when persistent)
        let (store, database): (Arc<dyn LedgerStore>, Option<Database>) = if config.in_memory {
            (Arc::new(InMemoryLedgerStore::new()), None)
        } else {
            let db = Database::new(&config.database_url)
                .await
                .with_context(|| format!("Failed to open database {}", config.database_url))?;
            event_bus
                .subscribe_all(Arc::new(EventRecorder::new(db.pool.clone())))
                .await;
            (Arc::new(SqliteLedgerStore::new(&db)), Some(db))
        };

        // 3. Ledger engine and protective sweep
        let engine = Arc::new(
            TradeEngine::new(store.clone(), config.ledger.ledger_config())
                .with_event_bus(event_bus.clone())
                .with_metrics(metrics.clone()),
        );
        let stop_loss = Arc::new(
            StopLossManager::new(store.clone(), config.ledger.sweep_config())
                .with_event_bus(event_bus.clone()),
        );

        // 4. Orchestrator: ledger desks plus a paper prediction-market venue
        let orchestrator = Arc::new(MultiAssetOrchestrator::new(
            config.orchestrator.orchestrator_config(),
            breakers.clone(),
            event_bus.clone(),
        ));
        let mut ledger_desks = BTreeMap::new();
        for asset_class in LEDGER_ASSET_CLASSES {
            let portfolio = engine
                .open_portfolio(&format!("desk-{}", asset_class))
                .await
                .with_context(|| format!("Failed to open the {} desk portfolio", asset_class))?;
            let desk = Arc::new(LedgerTradingAdapter::new(
                engine.clone(),
                portfolio.id,
                asset_class,
                format!("ledger-{}", asset_class),
            ));
            orchestrator
                .register_adapter(asset_class, desk.clone() as Arc<dyn TradingAdapter>)
                .await;
            ledger_desks.insert(asset_class, desk);
        }
        orchestrator
            .register_adapter(
                AssetClass::PredictionMarkets,
                Arc::new(MockTradingAdapter::new("paper-predictions")),
            )
            .await;

        // 5. Arbitrage scanner
        let scanner = Arc::new(
            ArbitrageScanner::new(
                feed_a,
                feed_b,
                ArbitrageDetector::new(config.arbitrage.detector_config()),
                config.arbitrage.scanner_config(),
            )
            .with_event_bus(event_bus.clone())
            .with_orchestrator(orchestrator.clone())
            .with_breakers(breakers.clone()),
        );

        Ok(Self {
            config,
            event_bus,
            breakers,
            metrics,
            database,
            store,
            engine,
            stop_loss,
            orchestrator,
            scanner,
            ledger_desks,
        })
    }

    /// Start the bus, then spawn the sweep and scanner workers.
    pub async fn start(self) -> Result<SystemHandle> {
        info!("Starting event bus and workers...");
        self.event_bus
            .start()
            .await
            .context("Failed to start event bus")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = vec![
            (
                "stop_loss_sweep",
                tokio::spawn(self.stop_loss.clone().run(shutdown_rx.clone())),
            ),
            (
                "arbitrage_scanner",
                tokio::spawn(self.scanner.clone().run(shutdown_rx)),
            ),
        ];

        info!(
            "Tradecore running: {:?} routed",
            self.orchestrator.registered_asset_classes().await
        );

        Ok(SystemHandle {
            event_bus: self.event_bus,
            breakers: self.breakers,
            metrics: self.metrics,
            engine: self.engine,
            orchestrator: self.orchestrator,
            scanner: self.scanner,
            ledger_desks: self.ledger_desks,
            shutdown_tx,
            workers,
        })
    }
}

impl SystemHandle {
    /// Stop workers, drain and stop the bus, then clear the breaker registry
    /// and the idempotency cache.
    pub async fn shutdown(self) {
        info!("Initiating Graceful Shutdown Sequence...");

        // 1. Workers
        if self.shutdown_tx.send(true).is_err() {
            warn!("Shutdown: workers already gone");
        }
        for (name, worker) in self.workers {
            match tokio::time::timeout(WORKER_STOP_TIMEOUT, worker).await {
                Ok(Ok(())) => info!("Shutdown: {} stopped", name),
                Ok(Err(e)) => error!("Shutdown: {} ended abnormally: {}", name, e),
                Err(_) => error!("Shutdown: {} did not stop within {:?}", name, WORKER_STOP_TIMEOUT),
            }
        }

        // 2. Event bus (drains queued events)
        self.event_bus.stop().await;

        // 3. Breakers and cached signal results
        self.breakers.clear().await;
        self.orchestrator.clear_idempotency().await;

        info!("Shutdown sequence completed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::{SignalAction, TradingSignal};

    fn in_memory() -> Config {
        Config {
            in_memory: true,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_build_registers_every_asset_class() {
        let app = Application::build(in_memory()).await.unwrap();
        assert_eq!(
            app.orchestrator.registered_asset_classes().await,
            vec![
                AssetClass::Crypto,
                AssetClass::Stocks,
                AssetClass::Forex,
                AssetClass::PredictionMarkets
            ]
        );
        assert_eq!(app.breakers.names().await.len(), 4);
    }

    #[tokio::test]
    async fn test_start_then_shutdown() {
        let handle = Application::build(in_memory()).await.unwrap().start().await.unwrap();
        assert!(handle.event_bus.is_running());

        let bus = handle.event_bus.clone();
        let breakers = handle.breakers.clone();
        handle.shutdown().await;

        assert!(!bus.is_running());
        assert!(breakers.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_prediction_signal_reaches_paper_venue() {
        let handle = Application::build(in_memory()).await.unwrap().start().await.unwrap();
        let signal = TradingSignal::new(
            SignalAction::Buy,
            0.9,
            "kalshi:FED:YES",
            AssetClass::PredictionMarkets,
            "test",
        );

        let result = handle.orchestrator.execute_signal(&signal).await.unwrap();
        assert!(result.is_executed());
        handle.shutdown().await;
    }
}
