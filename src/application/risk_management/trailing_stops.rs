//! Percentage Trailing Stops
//!
//! A trailing stop follows the mark at a fixed distance and only ever moves
//! in the position's favour:
//! - long: `stop = price × (1 − pct)`, applied only if it raises the stop
//! - short: `stop = price × (1 + pct)`, applied only if it lowers the stop
//!
//! A position without a stop gets one on the first ratchet.
//!
//! # Example
//!
//! ```rust,no_run
//! use tradecore::application::risk_management::trailing_stops::ratchet_stop;
//! use rust_decimal_macros::dec;
//!
//! // Long, 5% trail, stop at 95, price rises to 110
//! let moved = ratchet_stop(dec!(10), dec!(110), Some(dec!(95)), dec!(0.05));
//! assert_eq!(moved, Some(dec!(104.50)));
//!
//! // Price falls back: stop stays put
//! assert_eq!(ratchet_stop(dec!(10), dec!(100), Some(dec!(104.50)), dec!(0.05)), None);
//! ```

use crate::domain::trading::portfolio::{Position, round_money};
use rust_decimal::Decimal;

/// New stop price if the trail moves it, `None` otherwise.
///
/// `quantity` carries the direction: positive is long, negative is short.
pub fn ratchet_stop(
    quantity: Decimal,
    current_price: Decimal,
    current_stop: Option<Decimal>,
    trail_pct: Decimal,
) -> Option<Decimal> {
    if quantity.is_zero() || current_price <= Decimal::ZERO || trail_pct <= Decimal::ZERO {
        return None;
    }

    if quantity > Decimal::ZERO {
        let candidate = round_money(current_price * (Decimal::ONE - trail_pct));
        match current_stop {
            Some(stop) if candidate <= stop => None,
            _ => Some(candidate),
        }
    } else {
        let candidate = round_money(current_price * (Decimal::ONE + trail_pct));
        match current_stop {
            Some(stop) if candidate >= stop => None,
            _ => Some(candidate),
        }
    }
}

/// Ratchet a position's stop in place. Returns `(old, new)` when it moved.
pub fn apply_trailing_stop(position: &mut Position) -> Option<(Option<Decimal>, Decimal)> {
    let pct = position.trailing_stop_pct?;
    let new_stop = ratchet_stop(
        position.quantity,
        position.current_price,
        position.stop_loss_price,
        pct,
    )?;
    let old = position.stop_loss_price.replace(new_stop);
    Some((old, new_stop))
}
