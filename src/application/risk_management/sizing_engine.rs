use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Floor of the order notional
    pub min_notional: Decimal,
    /// Cap of the order notional, also the Kelly scale
    pub max_notional: Decimal,
    /// Fraction of full Kelly to stake (0.5 = half-Kelly)
    pub kelly_fraction: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            min_notional: dec!(10),
            max_notional: dec!(1000),
            kelly_fraction: dec!(0.5),
        }
    }
}

pub struct SizingEngine;

impl SizingEngine {
    /// Order notional for a signal: `confidence × kelly_fraction × max_notional`,
    /// clamped to `[min_notional, max_notional]`.
    ///
    /// Confidence outside [0, 1] (or NaN) is clamped first.
    pub fn half_kelly_notional(config: &SizingConfig, confidence: f64) -> Decimal {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        let confidence = Decimal::from_f64_retain(confidence).unwrap_or(Decimal::ZERO);

        let raw = confidence * config.kelly_fraction * config.max_notional;
        let sized = raw
            .max(config.min_notional)
            .min(config.max_notional)
            .round_dp(2);

        debug!(
            "SizingEngine: confidence {} -> raw ${} -> sized ${}",
            confidence, raw, sized
        );
        sized
    }

    /// Convert a notional into units at `price`, truncated to `scale` digits.
    pub fn notional_to_quantity(notional: Decimal, price: Decimal, scale: u32, symbol: &str) -> Decimal {
        if price <= Decimal::ZERO {
            info!(
                "SizingEngine: Cannot size {} - price {} is not positive",
                symbol, price
            );
            return Decimal::ZERO;
        }
        let quantity = (notional / price).round_dp_with_strategy(scale, RoundingStrategy::ToZero);
        info!(
            "SizingEngine: Final quantity for {}: {} (${} / ${} per unit)",
            symbol, quantity, notional, price
        );
        quantity
    }
}
