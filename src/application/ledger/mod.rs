pub mod ledger_adapter;
pub mod stop_loss_manager;
pub mod trade_engine;

pub use ledger_adapter::LedgerTradingAdapter;
pub use stop_loss_manager::{StopLossManager, SweepConfig, TriggeredClosure};
pub use trade_engine::{LedgerConfig, TradeEngine, TradeRequest, TradeResult};
