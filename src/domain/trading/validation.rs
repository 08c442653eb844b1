//! Input validation for order intents.
//!
//! Every value reaching the ledger engine passes through here first: prices
//! and quantities are range-checked and quantized, symbols are normalized.
//! Validation never touches storage.

use crate::domain::errors::ValidationError;
use crate::domain::trading::portfolio::round_money;
use crate::domain::trading::types::AssetClass;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

pub const MIN_PRICE: Decimal = dec!(0.01);
pub const MAX_PRICE: Decimal = dec!(1000000);
pub const MAX_QUANTITY: Decimal = dec!(1000000);
pub const MAX_SYMBOL_LEN: usize = 10;

/// Quantize and range-check a price (2 fractional digits).
pub fn validate_price(price: Decimal) -> Result<Decimal, ValidationError> {
    if price <= Decimal::ZERO {
        return Err(ValidationError::NonPositivePrice { price });
    }
    let quantized = round_money(price);
    if quantized < MIN_PRICE || quantized > MAX_PRICE {
        return Err(ValidationError::PriceOutOfRange {
            price,
            min: MIN_PRICE,
            max: MAX_PRICE,
        });
    }
    Ok(quantized)
}

/// Quantize and range-check a quantity at the asset class precision.
pub fn validate_quantity(
    quantity: Decimal,
    asset_class: AssetClass,
) -> Result<Decimal, ValidationError> {
    if quantity <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveQuantity { quantity });
    }
    let scale = asset_class.quantity_scale();
    let quantized = quantity.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    let min = min_quantity_step(scale);
    if quantized < min || quantized > MAX_QUANTITY {
        return Err(ValidationError::QuantityOutOfRange {
            quantity,
            min,
            max: MAX_QUANTITY,
        });
    }
    Ok(quantized)
}

/// Smallest representable quantity at `scale` digits.
pub fn min_quantity_step(scale: u32) -> Decimal {
    Decimal::new(1, scale)
}

/// Trim and upper-case a symbol, rejecting anything not alphanumeric.
pub fn normalize_symbol(symbol: &str) -> Result<String, ValidationError> {
    let normalized = symbol.trim().to_uppercase();
    if normalized.is_empty() {
        return Err(ValidationError::EmptySymbol);
    }
    if normalized.chars().count() > MAX_SYMBOL_LEN {
        return Err(ValidationError::SymbolTooLong {
            symbol: normalized,
            max: MAX_SYMBOL_LEN,
        });
    }
    if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidSymbol { symbol: normalized });
    }
    Ok(normalized)
}

/// Percentages used for stops and targets must lie in (0, 1).
pub fn validate_percentage(name: &'static str, pct: Decimal) -> Result<Decimal, ValidationError> {
    if pct <= Decimal::ZERO || pct >= Decimal::ONE {
        return Err(ValidationError::InvalidPercentage { name, value: pct });
    }
    Ok(pct)
}

/// Reward-to-risk ratio of a planned trade, `None` when risk is zero.
pub fn risk_reward(entry: Decimal, stop: Decimal, target: Decimal) -> Option<Decimal> {
    let risk = (entry - stop).abs();
    if risk.is_zero() {
        return None;
    }
    Some(((target - entry).abs() / risk).round_dp(2))
}
