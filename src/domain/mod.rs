// Prediction market snapshots
pub mod market;

// Port interfaces (venue adapters, market feeds)
pub mod ports;

// Ledger store traits
pub mod repositories;

// Core trading domain
pub mod trading;

// Domain events
pub mod events;

// Domain-specific error types
pub mod errors;
