pub mod database;
pub mod event_recorder;
pub mod sqlite_ledger_store;

pub use database::Database;
pub use event_recorder::EventRecorder;
pub use sqlite_ledger_store::SqliteLedgerStore;
