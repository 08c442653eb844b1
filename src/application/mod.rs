// Prediction market arbitrage detection and scanning
pub mod arbitrage;

pub mod idempotency;

// Ledger engine, protective sweep, ledger-backed venue adapter
pub mod ledger;

// Signal routing across asset classes
pub mod orchestrator;

// Position sizing and protective stop maintenance
pub mod risk_management;

pub mod saga;

// Process composition and lifecycle
pub mod system;
