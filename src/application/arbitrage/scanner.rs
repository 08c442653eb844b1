use crate::application::arbitrage::detector::ArbitrageDetector;
use crate::application::orchestrator::MultiAssetOrchestrator;
use crate::domain::events::DomainEvent;
use crate::domain::market::prediction_market::{ArbitrageOpportunity, PredictionMarket};
use crate::domain::ports::MarketFeed;
use crate::infrastructure::core::{CircuitBreakerError, CircuitBreakerRegistry};
use crate::infrastructure::event_bus::EventBus;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub interval: Duration,
    /// Markets fetched per venue per scan
    pub market_limit: usize,
    /// Hand opportunities to the orchestrator instead of only publishing them
    pub auto_execute: bool,
    /// Confidence used to size auto-executed opportunities
    pub signal_confidence: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            market_limit: 100,
            auto_execute: false,
            signal_confidence: 0.9,
        }
    }
}

/// Periodically pulls two prediction-market venues and publishes the
/// arbitrage opportunities found between them.
pub struct ArbitrageScanner {
    feed_a: Arc<dyn MarketFeed>,
    feed_b: Arc<dyn MarketFeed>,
    detector: ArbitrageDetector,
    config: ScannerConfig,
    event_bus: Option<EventBus>,
    orchestrator: Option<Arc<MultiAssetOrchestrator>>,
    breakers: Option<CircuitBreakerRegistry>,
}

impl ArbitrageScanner {
    pub fn new(
        feed_a: Arc<dyn MarketFeed>,
        feed_b: Arc<dyn MarketFeed>,
        detector: ArbitrageDetector,
        config: ScannerConfig,
    ) -> Self {
        Self {
            feed_a,
            feed_b,
            detector,
            config,
            event_bus: None,
            orchestrator: None,
            breakers: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<MultiAssetOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Guard each feed with a breaker named `feed:<platform>`.
    pub fn with_breakers(mut self, breakers: CircuitBreakerRegistry) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    async fn fetch(&self, feed: &Arc<dyn MarketFeed>) -> Result<Vec<PredictionMarket>> {
        let limit = self.config.market_limit;
        let markets = match &self.breakers {
            Some(breakers) => {
                let breaker = breakers.get_or_create(&format!("feed:{}", feed.platform())).await;
                breaker
                    .call(feed.fetch_markets(limit))
                    .await
                    .map_err(|e| match e {
                        CircuitBreakerError::Inner(e) => e,
                        open => anyhow::anyhow!("{}", open),
                    })?
            }
            None => feed.fetch_markets(limit).await?,
        };
        debug!("ArbitrageScanner: {} returned {} markets", feed.platform(), markets.len());
        Ok(markets)
    }

    /// One scan: fetch both venues, detect, publish, optionally execute.
    pub async fn scan_once(&self) -> Result<Vec<ArbitrageOpportunity>> {
        let (markets_a, markets_b) = tokio::join!(self.fetch(&self.feed_a), self.fetch(&self.feed_b));
        let markets_a =
            markets_a.with_context(|| format!("Failed to fetch {} markets", self.feed_a.platform()))?;
        let markets_b =
            markets_b.with_context(|| format!("Failed to fetch {} markets", self.feed_b.platform()))?;

        let opportunities = self.detector.find_opportunities(&markets_a, &markets_b);
        info!(
            "ArbitrageScanner: {} x {} markets, {} opportunities",
            markets_a.len(),
            markets_b.len(),
            opportunities.len()
        );

        for opportunity in &opportunities {
            if let Some(bus) = &self.event_bus {
                bus.publish(DomainEvent::arbitrage_detected("arbitrage", opportunity.to_event()));
            }
            if self.config.auto_execute
                && let Some(orchestrator) = &self.orchestrator
            {
                match orchestrator
                    .execute_arbitrage(opportunity, self.config.signal_confidence)
                    .await
                {
                    Ok(Some(execution)) => info!(
                        "ArbitrageScanner: executed '{}' ({} contracts, saga {})",
                        opportunity.description, execution.contracts, execution.saga_id
                    ),
                    Ok(None) => debug!(
                        "ArbitrageScanner: '{}' not executed this round",
                        opportunity.description
                    ),
                    Err(e) => warn!(
                        "ArbitrageScanner: execution of '{}' failed: {}",
                        opportunity.description, e
                    ),
                }
            }
        }
        Ok(opportunities)
    }

    /// Scan every `interval` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "ArbitrageScanner: scanning {} vs {} every {:?}",
            self.feed_a.platform(),
            self.feed_b.platform(),
            self.config.interval
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!("ArbitrageScanner: scan failed: {:#}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("ArbitrageScanner: stopped");
                        return;
                    }
                }
            }
        }
    }
}
