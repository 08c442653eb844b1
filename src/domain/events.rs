//! Domain events flowing through the event bus.
//!
//! A [`DomainEvent`] is an immutable envelope (id, timestamp, source
//! aggregate) around a typed [`EventPayload`]. Subscribers register per
//! [`EventType`]; the type is always derived from the payload so the two can
//! never disagree.

use crate::domain::trading::types::{AssetClass, ExitReason, OrderSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TradeExecuted,
    PositionClosed,
    StopLossTriggered,
    TakeProfitTriggered,
    TrailingStopUpdated,
    CircuitBreakerTripped,
    ArbitrageDetected,
    SignalGenerated,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::TradeExecuted,
        EventType::PositionClosed,
        EventType::StopLossTriggered,
        EventType::TakeProfitTriggered,
        EventType::TrailingStopUpdated,
        EventType::CircuitBreakerTripped,
        EventType::ArbitrageDetected,
        EventType::SignalGenerated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TradeExecuted => "trade.executed",
            EventType::PositionClosed => "position.closed",
            EventType::StopLossTriggered => "position.stop_loss_triggered",
            EventType::TakeProfitTriggered => "position.take_profit_triggered",
            EventType::TrailingStopUpdated => "position.trailing_stop_updated",
            EventType::CircuitBreakerTripped => "circuit_breaker.tripped",
            EventType::ArbitrageDetected => "arbitrage.detected",
            EventType::SignalGenerated => "signal.generated",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecuted {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub pnl: Option<Decimal>,
    /// Venue that filled the order ("ledger" for internal settlement)
    pub platform: String,
    pub asset_class: Option<AssetClass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClosed {
    pub position_id: i64,
    pub symbol: String,
    pub exit_price: Decimal,
    pub exit_reason: ExitReason,
    pub pnl: Decimal,
}

/// Payload shared by stop-loss and take-profit closures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveExit {
    pub position_id: i64,
    pub symbol: String,
    pub trigger_price: Decimal,
    pub execution_price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopUpdated {
    pub position_id: i64,
    pub symbol: String,
    pub old_stop: Option<Decimal>,
    pub new_stop: Decimal,
    pub current_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerTripped {
    pub dependency: String,
    pub failure_count: u32,
    pub recovery_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageDetected {
    pub platform_a: String,
    pub platform_b: String,
    pub roi: Decimal,
    pub cost: Decimal,
    pub profit: Decimal,
    pub strategy_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalGenerated {
    pub pair: String,
    pub action: String,
    pub confidence: f64,
    pub asset_class: AssetClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    TradeExecuted(TradeExecuted),
    PositionClosed(PositionClosed),
    StopLossTriggered(ProtectiveExit),
    TakeProfitTriggered(ProtectiveExit),
    TrailingStopUpdated(TrailingStopUpdated),
    CircuitBreakerTripped(CircuitBreakerTripped),
    ArbitrageDetected(ArbitrageDetected),
    SignalGenerated(SignalGenerated),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::TradeExecuted(_) => EventType::TradeExecuted,
            EventPayload::PositionClosed(_) => EventType::PositionClosed,
            EventPayload::StopLossTriggered(_) => EventType::StopLossTriggered,
            EventPayload::TakeProfitTriggered(_) => EventType::TakeProfitTriggered,
            EventPayload::TrailingStopUpdated(_) => EventType::TrailingStopUpdated,
            EventPayload::CircuitBreakerTripped(_) => EventType::CircuitBreakerTripped,
            EventPayload::ArbitrageDetected(_) => EventType::ArbitrageDetected,
            EventPayload::SignalGenerated(_) => EventType::SignalGenerated,
        }
    }
}

/// Immutable event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_id: Uuid,
    occurred_at: DateTime<Utc>,
    source_aggregate_id: String,
    payload: EventPayload,
}

impl DomainEvent {
    pub fn new(source_aggregate_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            source_aggregate_id: source_aggregate_id.into(),
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn source_aggregate_id(&self) -> &str {
        &self.source_aggregate_id
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn trade_executed(source: impl Into<String>, data: TradeExecuted) -> Self {
        Self::new(source, EventPayload::TradeExecuted(data))
    }

    pub fn breaker_tripped(data: CircuitBreakerTripped) -> Self {
        let source = format!("breaker:{}", data.dependency);
        Self::new(source, EventPayload::CircuitBreakerTripped(data))
    }

    pub fn arbitrage_detected(source: impl Into<String>, data: ArbitrageDetected) -> Self {
        Self::new(source, EventPayload::ArbitrageDetected(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_type_follows_payload() {
        let event = DomainEvent::breaker_tripped(CircuitBreakerTripped {
            dependency: "kraken".to_string(),
            failure_count: 5,
            recovery_timeout_seconds: 60,
        });

        assert_eq!(event.event_type(), EventType::CircuitBreakerTripped);
        assert_eq!(event.source_aggregate_id(), "breaker:kraken");
        assert_eq!(event.event_type().as_str(), "circuit_breaker.tripped");
    }

    #[test]
    fn test_events_get_unique_ids() {
        let data = TradeExecuted {
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(10),
            price: dec!(150.00),
            pnl: None,
            platform: "ledger".to_string(),
            asset_class: Some(AssetClass::Stocks),
        };
        let a = DomainEvent::trade_executed("portfolio:1", data.clone());
        let b = DomainEvent::trade_executed("portfolio:1", data);
        assert_ne!(a.event_id(), b.event_id());
    }

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let payload = EventPayload::ArbitrageDetected(ArbitrageDetected {
            platform_a: "kalshi".to_string(),
            platform_b: "polymarket".to_string(),
            roi: dec!(0.0526),
            cost: dec!(0.95),
            profit: dec!(0.05),
            strategy_description: "YES on kalshi + NO on polymarket".to_string(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "arbitrage_detected");
        assert_eq!(json["data"]["platform_b"], "polymarket");
    }
}
