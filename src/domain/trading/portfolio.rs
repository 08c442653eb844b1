use crate::domain::trading::types::{
    ExitReason, OrderSide, PortfolioId, PositionId, PositionStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Digits kept on volume-weighted average entry prices.
pub const AVERAGE_PRICE_SCALE: u32 = 6;
/// Digits kept on money amounts (balances, P&L, commissions).
pub const MONEY_SCALE: u32 = 2;

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// One portfolio per owning principal. Mutated only under the portfolio lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: PortfolioId,
    pub owner: String,
    pub balance: Decimal,
    /// Balance plus mark-to-market value of open positions
    pub total_value: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(id: PortfolioId, owner: impl Into<String>, balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner: owner.into(),
            balance,
            total_value: balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recompute `total_value` from a lock-consistent set of positions.
    ///
    /// Closed positions and positions of other portfolios are ignored.
    pub fn recompute_total_value(&mut self, positions: &[Position]) {
        let marked: Decimal = positions
            .iter()
            .filter(|p| p.portfolio_id == self.id && p.is_open())
            .map(Position::market_value)
            .sum();
        self.total_value = self.balance + marked;
        self.updated_at = Utc::now();
    }
}

/// Open or closed holding of a symbol inside a portfolio.
///
/// `id` is zero until the store assigns one on first upsert. Quantity is
/// signed: negative quantities are short positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub portfolio_id: PortfolioId,
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    pub status: PositionStatus,
    pub exit_price: Option<Decimal>,
    pub exit_date: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which protective threshold a mark crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectiveTrigger {
    StopLoss,
    TakeProfit,
}

impl ProtectiveTrigger {
    pub fn exit_reason(&self) -> ExitReason {
        match self {
            ProtectiveTrigger::StopLoss => ExitReason::StopLoss,
            ProtectiveTrigger::TakeProfit => ExitReason::TakeProfit,
        }
    }
}

impl Position {
    pub fn open(
        portfolio_id: PortfolioId,
        symbol: impl Into<String>,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            portfolio_id,
            symbol: symbol.into(),
            quantity,
            average_price: price,
            current_price: price,
            stop_loss_price: None,
            take_profit_price: None,
            trailing_stop_pct: None,
            status: PositionStatus::Open,
            exit_price: None,
            exit_date: None,
            exit_reason: None,
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.average_price) * self.quantity
    }

    /// Add to the position at `price`, re-weighting the average entry.
    pub fn apply_buy(&mut self, quantity: Decimal, price: Decimal) {
        let total_quantity = self.quantity + quantity;
        let total_cost = self.quantity * self.average_price + quantity * price;
        if !total_quantity.is_zero() {
            self.average_price = (total_cost / total_quantity).round_dp(AVERAGE_PRICE_SCALE);
        }
        self.quantity = total_quantity;
        self.current_price = price;
        self.updated_at = Utc::now();
    }

    /// Units a sell of `requested` actually takes: the whole position when
    /// the remainder would round to zero at `scale`, so no dust is left behind
    /// uncredited.
    pub fn sell_quantity(&self, requested: Decimal, scale: u32) -> Decimal {
        let residual = self.quantity - requested;
        if residual > Decimal::ZERO && residual.round_dp(scale).is_zero() {
            self.quantity
        } else {
            requested
        }
    }

    /// Reduce the position at `price` and return the realized P&L.
    ///
    /// A sell leaving only sub-`scale` dust takes the dust too and closes the
    /// position.
    pub fn apply_sell(&mut self, quantity: Decimal, price: Decimal, scale: u32) -> Decimal {
        let quantity = self.sell_quantity(quantity, scale);
        let pnl = round_money((price - self.average_price) * quantity);
        self.quantity -= quantity;
        self.current_price = price;
        self.updated_at = Utc::now();
        if self.quantity.round_dp(scale).is_zero() {
            self.close(price, ExitReason::Sold);
        }
        pnl
    }

    /// Mark the position closed, keeping the exit details for audit.
    pub fn close(&mut self, exit_price: Decimal, reason: ExitReason) {
        let now = Utc::now();
        self.quantity = Decimal::ZERO;
        self.status = PositionStatus::Closed;
        self.exit_price = Some(exit_price);
        self.exit_date = Some(now);
        self.exit_reason = Some(reason);
        self.updated_at = now;
    }

    /// Set stop-loss / take-profit relative to the average entry price.
    ///
    /// Longs protect below and take profit above; shorts mirror that.
    pub fn set_protection(
        &mut self,
        stop_loss_pct: Option<Decimal>,
        take_profit_pct: Option<Decimal>,
    ) {
        let entry = self.average_price;
        let long = self.quantity >= Decimal::ZERO;
        if let Some(pct) = stop_loss_pct {
            let factor = if long { Decimal::ONE - pct } else { Decimal::ONE + pct };
            self.stop_loss_price = Some(round_money(entry * factor));
        }
        if let Some(pct) = take_profit_pct {
            let factor = if long { Decimal::ONE + pct } else { Decimal::ONE - pct };
            self.take_profit_price = Some(round_money(entry * factor));
        }
        self.updated_at = Utc::now();
    }

    /// Which protective threshold the current mark has crossed, stop-loss first.
    pub fn protective_trigger(&self) -> Option<ProtectiveTrigger> {
        if !self.is_open() || self.current_price <= Decimal::ZERO {
            return None;
        }
        let price = self.current_price;
        let long = self.is_long();

        if let Some(stop) = self.stop_loss_price {
            let hit = if long { price <= stop } else { price >= stop };
            if hit {
                return Some(ProtectiveTrigger::StopLoss);
            }
        }
        if let Some(target) = self.take_profit_price {
            let hit = if long { price >= target } else { price <= target };
            if hit {
                return Some(ProtectiveTrigger::TakeProfit);
            }
        }
        None
    }

    /// Side of the fill that would flatten this position.
    pub fn closing_side(&self) -> OrderSide {
        if self.is_long() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}
