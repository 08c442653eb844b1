//! Push-based observability for tradecore
//!
//! Prometheus counters fed from the domain event stream. There is no HTTP
//! exposition; `Metrics::render` is logged by the server on shutdown.

pub mod metrics;
pub mod metrics_listener;

pub use metrics::Metrics;
pub use metrics_listener::MetricsListener;
