//! Prometheus metrics definitions for tradecore
//!
//! All metrics use the `tradecore_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Prometheus metrics for the execution core
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Fills by side and platform
    pub trades_total: CounterVec,
    /// Rejected trade intents by reason
    pub trades_rejected_total: CounterVec,
    /// Protective closures by exit reason
    pub protective_exits_total: CounterVec,
    /// Transitions to Open by dependency
    pub breaker_trips_total: CounterVec,
    /// Arbitrage opportunities by venue pair
    pub arbitrage_opportunities_total: CounterVec,
    /// Event handler failures by handler name
    pub handler_failures_total: CounterVec,
    /// Domain events observed by type
    pub events_total: CounterVec,
    /// Last observed ROI of an arbitrage opportunity
    pub last_arbitrage_roi: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let trades_total = CounterVec::new(
            Opts::new("tradecore_trades_total", "Total fills by side and platform"),
            &["side", "platform"],
        )?;
        registry.register(Box::new(trades_total.clone()))?;

        let trades_rejected_total = CounterVec::new(
            Opts::new(
                "tradecore_trades_rejected_total",
                "Rejected trade intents by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(trades_rejected_total.clone()))?;

        let protective_exits_total = CounterVec::new(
            Opts::new(
                "tradecore_protective_exits_total",
                "Stop-loss and take-profit closures",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(protective_exits_total.clone()))?;

        let breaker_trips_total = CounterVec::new(
            Opts::new(
                "tradecore_breaker_trips_total",
                "Circuit breaker transitions to open",
            ),
            &["dependency"],
        )?;
        registry.register(Box::new(breaker_trips_total.clone()))?;

        let arbitrage_opportunities_total = CounterVec::new(
            Opts::new(
                "tradecore_arbitrage_opportunities_total",
                "Arbitrage opportunities detected",
            ),
            &["platform_a", "platform_b"],
        )?;
        registry.register(Box::new(arbitrage_opportunities_total.clone()))?;

        let handler_failures_total = CounterVec::new(
            Opts::new(
                "tradecore_handler_failures_total",
                "Event handler failures",
            ),
            &["handler"],
        )?;
        registry.register(Box::new(handler_failures_total.clone()))?;

        let events_total = CounterVec::new(
            Opts::new("tradecore_events_total", "Domain events by type"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let last_arbitrage_roi = Gauge::with_opts(Opts::new(
            "tradecore_last_arbitrage_roi",
            "ROI of the most recent arbitrage opportunity",
        ))?;
        registry.register(Box::new(last_arbitrage_roi.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            trades_total,
            trades_rejected_total,
            protective_exits_total,
            breaker_trips_total,
            arbitrage_opportunities_total,
            handler_failures_total,
            events_total,
            last_arbitrage_roi,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_trades(&self, side: &str, platform: &str) {
        self.trades_total.with_label_values(&[side, platform]).inc();
    }

    pub fn inc_rejected(&self, reason: &str) {
        self.trades_rejected_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_handler_failures(&self, handler: &str) {
        self.handler_failures_total
            .with_label_values(&[handler])
            .inc();
    }
}
