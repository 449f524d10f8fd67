//! Decimal arithmetic utilities for exchange-bound prices and quantities.

use rust_decimal::Decimal;

/// Round down to a whole multiple of `increment` (tick size or step size).
///
/// Never rounds up past a boundary the exchange would reject. A zero or
/// negative increment leaves the value untouched. `None` when the division
/// overflows the decimal range.
pub fn floor_to_increment(value: Decimal, increment: Decimal) -> Option<Decimal> {
    if increment <= Decimal::ZERO {
        return Some(value);
    }
    let steps = value.checked_div(increment)?.floor();
    Some(steps.checked_mul(increment)?.normalize())
}

/// Render a decimal for a REST query string: no exponent, no trailing zeros.
pub fn to_wire(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Absolute value below `epsilon` counts as flat.
pub fn is_flat(value: Decimal, epsilon: Decimal) -> bool {
    value.abs() < epsilon
}
