use crate::domain::events::{DomainEvent, EventPayload};
use crate::infrastructure::event_bus::{EventBus, EventHandler, HandlerFailure};
use crate::infrastructure::observability::metrics::Metrics;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;

/// Feeds Prometheus counters from the domain event stream.
pub struct MetricsListener {
    metrics: Metrics,
}

impl MetricsListener {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }

    /// Subscribe to every event type and count handler failures.
    pub async fn attach(metrics: Metrics, bus: &EventBus) {
        let failures = metrics.clone();
        bus.on_error(Arc::new(move |failure: &HandlerFailure| {
            failures.inc_handler_failures(&failure.handler);
        }))
        .await;
        bus.subscribe_all(Arc::new(Self::new(metrics))).await;
    }
}

#[async_trait]
impl EventHandler for MetricsListener {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let m = &self.metrics;
        m.events_total
            .with_label_values(&[event.event_type().as_str()])
            .inc();

        match event.payload() {
            EventPayload::TradeExecuted(data) => {
                m.inc_trades(data.side.as_str(), &data.platform);
            }
            EventPayload::StopLossTriggered(_) => {
                m.protective_exits_total
                    .with_label_values(&["stop_loss"])
                    .inc();
            }
            EventPayload::TakeProfitTriggered(_) => {
                m.protective_exits_total
                    .with_label_values(&["take_profit"])
                    .inc();
            }
            EventPayload::CircuitBreakerTripped(data) => {
                m.breaker_trips_total
                    .with_label_values(&[data.dependency.as_str()])
                    .inc();
            }
            EventPayload::ArbitrageDetected(data) => {
                m.arbitrage_opportunities_total
                    .with_label_values(&[data.platform_a.as_str(), data.platform_b.as_str()])
                    .inc();
                m.last_arbitrage_roi.set(data.roi.to_f64().unwrap_or(0.0));
            }
            _ => {}
        }
        Ok(())
    }
}
