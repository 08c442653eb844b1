//! Protective exit sweep.
//!
//! Scans every open position and closes the ones whose mark crossed the
//! stop-loss or take-profit threshold, at the mark itself (never the
//! threshold). Untriggered positions with a trailing percentage get their
//! stop ratcheted. Each closure and each ratchet is its own locked
//! transaction; a contended portfolio is skipped until the next sweep.

use crate::application::ledger::trade_engine::LEDGER_PLATFORM;
use crate::application::risk_management::trailing_stops::apply_trailing_stop;
use crate::domain::errors::{StoreError, TradingError};
use crate::domain::events::{
    DomainEvent, EventPayload, PositionClosed, ProtectiveExit, TradeExecuted, TrailingStopUpdated,
};
use crate::domain::repositories::{LedgerStore, LedgerTransaction};
use crate::domain::trading::portfolio::{Position, ProtectiveTrigger, round_money};
use crate::domain::trading::types::{ExitReason, OrderSide, PortfolioId, PositionId, Trade, TradeId};
use crate::infrastructure::event_bus::EventBus;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub trailing_enabled: bool,
    pub commission_rate: Decimal,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            trailing_enabled: true,
            commission_rate: Decimal::ZERO,
        }
    }
}

/// A protective closure committed by the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredClosure {
    pub position_id: PositionId,
    pub portfolio_id: PortfolioId,
    pub trade_id: TradeId,
    pub symbol: String,
    pub reason: ExitReason,
    /// Threshold that was crossed
    pub trigger_price: Decimal,
    /// Mark the position was actually closed at
    pub execution_price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
}

pub struct StopLossManager {
    store: Arc<dyn LedgerStore>,
    event_bus: Option<EventBus>,
    config: SweepConfig,
}

impl StopLossManager {
    pub fn new(store: Arc<dyn LedgerStore>, config: SweepConfig) -> Self {
        Self {
            store,
            event_bus: None,
            config,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run one sweep over all open positions.
    pub async fn check_all_positions(&self) -> Result<Vec<TriggeredClosure>, TradingError> {
        let positions = self.store.all_open_positions().await?;
        let mut closures = Vec::new();

        for snapshot in positions {
            if snapshot.protective_trigger().is_some() {
                match self.close_triggered(&snapshot).await {
                    Ok(Some(closure)) => closures.push(closure),
                    Ok(None) => {
                        debug!(
                            "StopLossManager: {} no longer triggered under lock",
                            snapshot.symbol
                        );
                    }
                    Err(TradingError::ConcurrencyConflict { portfolio_id }) => {
                        warn!(
                            "StopLossManager: portfolio {} busy, {} retried next sweep",
                            portfolio_id, snapshot.symbol
                        );
                    }
                    Err(e) => {
                        error!(
                            "StopLossManager: closing {} (position {}) failed: {}",
                            snapshot.symbol, snapshot.id, e
                        );
                    }
                }
            } else if self.config.trailing_enabled && snapshot.trailing_stop_pct.is_some() {
                if let Err(e) = self.ratchet(&snapshot).await {
                    warn!(
                        "StopLossManager: trailing update for {} skipped: {}",
                        snapshot.symbol, e
                    );
                }
            }
        }

        if !closures.is_empty() {
            info!("StopLossManager: sweep closed {} position(s)", closures.len());
        }
        Ok(closures)
    }

    async fn close_triggered(
        &self,
        snapshot: &Position,
    ) -> Result<Option<TriggeredClosure>, TradingError> {
        let portfolio_id = snapshot.portfolio_id;
        let mut tx = self.store.begin().await?;

        match self.close_locked(tx.as_mut(), snapshot).await {
            Ok(Some(closure)) => {
                tx.commit().await?;
                self.publish_closure(&closure, snapshot.closing_side());
                Ok(Some(closure))
            }
            Ok(None) => {
                rollback(tx, portfolio_id).await;
                Ok(None)
            }
            Err(e) => {
                rollback(tx, portfolio_id).await;
                Err(e.into())
            }
        }
    }

    /// Trade first, then position and portfolio, all inside one transaction.
    async fn close_locked(
        &self,
        tx: &mut dyn LedgerTransaction,
        snapshot: &Position,
    ) -> Result<Option<TriggeredClosure>, StoreError> {
        let mut portfolio = tx.lock_portfolio_for_update(snapshot.portfolio_id).await?;
        let Some(mut position) = tx.find_position(snapshot.id).await?.filter(Position::is_open)
        else {
            return Ok(None);
        };
        let Some(trigger) = position.protective_trigger() else {
            return Ok(None);
        };

        let trigger_price = match trigger {
            ProtectiveTrigger::StopLoss => position.stop_loss_price,
            ProtectiveTrigger::TakeProfit => position.take_profit_price,
        }
        .unwrap_or(position.current_price);
        let execution_price = position.current_price;
        let quantity = position.quantity.abs();
        let notional = quantity * execution_price;
        let commission = round_money(notional * self.config.commission_rate);
        let side = position.closing_side();

        let pnl = match side {
            OrderSide::Sell => {
                portfolio.balance += notional - commission;
                round_money((execution_price - position.average_price) * quantity)
            }
            OrderSide::Buy => {
                portfolio.balance -= notional + commission;
                round_money((position.average_price - execution_price) * quantity)
            }
        };

        let trade = tx
            .insert_trade(&Trade::pending(
                portfolio.id,
                &position.symbol,
                side,
                quantity,
                execution_price,
                commission,
                Some(pnl),
            ))
            .await?;

        let reason = trigger.exit_reason();
        position.close(execution_price, reason);
        tx.upsert_position(&position).await?;

        let remaining: Vec<Position> = tx
            .open_positions(portfolio.id)
            .await?
            .into_iter()
            .filter(|p| p.id != position.id)
            .collect();
        portfolio.recompute_total_value(&remaining);
        tx.update_portfolio(&portfolio).await?;

        info!(
            "StopLossManager: {} on {} closed @ {} (threshold {}), pnl {}",
            reason.as_str(),
            position.symbol,
            execution_price,
            trigger_price,
            pnl
        );

        Ok(Some(TriggeredClosure {
            position_id: position.id,
            portfolio_id: portfolio.id,
            trade_id: trade.id,
            symbol: position.symbol,
            reason,
            trigger_price,
            execution_price,
            quantity,
            pnl,
        }))
    }

    async fn ratchet(&self, snapshot: &Position) -> Result<(), TradingError> {
        let portfolio_id = snapshot.portfolio_id;
        let mut tx = self.store.begin().await?;

        let outcome = async {
            tx.lock_portfolio_for_update(portfolio_id).await?;
            let Some(mut position) = tx.find_position(snapshot.id).await?.filter(Position::is_open)
            else {
                return Ok(None);
            };
            let Some((old_stop, new_stop)) = apply_trailing_stop(&mut position) else {
                return Ok(None);
            };
            let position = tx.upsert_position(&position).await?;
            Ok::<_, StoreError>(Some((position, old_stop, new_stop)))
        }
        .await;

        match outcome {
            Ok(Some((position, old_stop, new_stop))) => {
                tx.commit().await?;
                debug!(
                    "StopLossManager: trailing stop of {} moved {:?} -> {}",
                    position.symbol, old_stop, new_stop
                );
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::new(
                        format!("portfolio:{}", portfolio_id),
                        EventPayload::TrailingStopUpdated(TrailingStopUpdated {
                            position_id: position.id,
                            symbol: position.symbol.clone(),
                            old_stop,
                            new_stop,
                            current_price: position.current_price,
                        }),
                    ));
                }
                Ok(())
            }
            Ok(None) => {
                rollback(tx, portfolio_id).await;
                Ok(())
            }
            Err(e) => {
                rollback(tx, portfolio_id).await;
                Err(e.into())
            }
        }
    }

    fn publish_closure(&self, closure: &TriggeredClosure, side: OrderSide) {
        let Some(bus) = &self.event_bus else {
            return;
        };
        let source = format!("portfolio:{}", closure.portfolio_id);
        let exit = ProtectiveExit {
            position_id: closure.position_id,
            symbol: closure.symbol.clone(),
            trigger_price: closure.trigger_price,
            execution_price: closure.execution_price,
            quantity: closure.quantity,
            pnl: closure.pnl,
        };
        let payload = match closure.reason {
            ExitReason::TakeProfit => EventPayload::TakeProfitTriggered(exit),
            _ => EventPayload::StopLossTriggered(exit),
        };
        bus.publish(DomainEvent::new(source.clone(), payload));
        bus.publish(DomainEvent::trade_executed(
            source.clone(),
            TradeExecuted {
                symbol: closure.symbol.clone(),
                side,
                quantity: closure.quantity,
                price: closure.execution_price,
                pnl: Some(closure.pnl),
                platform: LEDGER_PLATFORM.to_string(),
                asset_class: None,
            },
        ));
        bus.publish(DomainEvent::new(
            source,
            EventPayload::PositionClosed(PositionClosed {
                position_id: closure.position_id,
                symbol: closure.symbol.clone(),
                exit_price: closure.execution_price,
                exit_reason: closure.reason,
                pnl: closure.pnl,
            }),
        ));
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "StopLossManager: sweeping every {:?} (trailing {})",
            self.config.interval,
            if self.config.trailing_enabled { "on" } else { "off" }
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_all_positions().await {
                        error!("StopLossManager: sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("StopLossManager: stopped");
                        return;
                    }
                }
            }
        }
    }
}

async fn rollback(tx: Box<dyn LedgerTransaction>, portfolio_id: PortfolioId) {
    if let Err(e) = tx.rollback().await {
        error!(
            "StopLossManager: rollback of portfolio {} failed: {}",
            portfolio_id, e
        );
    }
}
