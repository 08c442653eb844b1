use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type PortfolioId = i64;
pub type PositionId = i64;
pub type TradeId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => anyhow::bail!("Invalid side: {}. Must be 'buy' or 'sell'", s),
        }
    }
}

/// Asset class a venue adapter trades. The orchestrator routes on this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Crypto,
    Stocks,
    Forex,
    PredictionMarkets,
}

impl AssetClass {
    pub const ALL: [AssetClass; 4] = [
        AssetClass::Crypto,
        AssetClass::Stocks,
        AssetClass::Forex,
        AssetClass::PredictionMarkets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "crypto",
            AssetClass::Stocks => "stocks",
            AssetClass::Forex => "forex",
            AssetClass::PredictionMarkets => "prediction_markets",
        }
    }

    /// Fractional digits kept on quantities for this asset class.
    pub fn quantity_scale(&self) -> u32 {
        match self {
            AssetClass::Crypto => 6,
            _ => 4,
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crypto" => Ok(AssetClass::Crypto),
            "stocks" | "stock" => Ok(AssetClass::Stocks),
            "forex" => Ok(AssetClass::Forex),
            "prediction_markets" | "prediction" => Ok(AssetClass::PredictionMarkets),
            _ => anyhow::bail!(
                "Invalid asset class: {}. Must be 'crypto', 'stocks', 'forex' or 'prediction_markets'",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    /// Order side for actionable signals, `None` for HOLD.
    pub fn side(&self) -> Option<OrderSide> {
        match self {
            SignalAction::Buy => Some(OrderSide::Buy),
            SignalAction::Sell => Some(OrderSide::Sell),
            SignalAction::Hold => None,
        }
    }
}

/// Output of the signal-producing pipeline (AI inference, indicators, arbitrage scanner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub action: SignalAction,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub pair: String,
    pub asset_class: AssetClass,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl TradingSignal {
    pub fn new(
        action: SignalAction,
        confidence: f64,
        pair: impl Into<String>,
        asset_class: AssetClass,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            action,
            confidence,
            pair: pair.into(),
            asset_class,
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PositionStatus::Open),
            "closed" => Ok(PositionStatus::Closed),
            _ => anyhow::bail!("Invalid position status: {}", s),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Sold,
    StopLoss,
    TakeProfit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Sold => "sold",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
        }
    }
}

impl FromStr for ExitReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sold" => Ok(ExitReason::Sold),
            "stop_loss" => Ok(ExitReason::StopLoss),
            "take_profit" => Ok(ExitReason::TakeProfit),
            _ => anyhow::bail!("Invalid exit reason: {}", s),
        }
    }
}

/// Immutable record of a single fill. Never updated after insertion.
///
/// `id` is zero until the store assigns one on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub portfolio_id: PortfolioId,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    /// Realized P&L, present on fills that reduce a position
    pub pnl: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    pub fn pending(
        portfolio_id: PortfolioId,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        pnl: Option<Decimal>,
    ) -> Self {
        Self {
            id: 0,
            portfolio_id,
            symbol: symbol.into(),
            side,
            quantity,
            price,
            commission,
            pnl,
            timestamp: Utc::now(),
        }
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}
