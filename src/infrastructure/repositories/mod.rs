pub mod in_memory;
pub mod portfolio_locks;

pub use in_memory::{FailurePoint, InMemoryLedgerStore};
pub use portfolio_locks::PortfolioLocks;
