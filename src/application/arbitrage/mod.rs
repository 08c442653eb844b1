// Cross-venue prediction market arbitrage
pub mod detector;
pub mod scanner;
pub mod similarity;

pub use detector::{ArbitrageDetector, DetectorConfig};
pub use scanner::{ArbitrageScanner, ScannerConfig};
