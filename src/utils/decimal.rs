//! Decimal arithmetic utilities for risk calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Signed relative change from `previous` to `current` (0.15 = +15%).
///
/// Returns zero when `previous` is zero.
pub fn relative_change(previous: Decimal, current: Decimal) -> Decimal {
    safe_div(current - previous, previous)
}

/// Calculate basis points (1 bp = 0.01%)
pub fn to_basis_points(rate: Decimal) -> Decimal {
    rate * dec!(10000)
}

/// Compact USD label for logs and alert messages: `$1.25M`, `$830.0K`, `$12.50`.
pub fn format_usd(value: Decimal) -> String {
    let sign = if value.is_sign_negative() { "-" } else { "" };
    let abs = value.abs();

    if abs >= dec!(1_000_000_000) {
        format!("{sign}${:.2}B", abs / dec!(1_000_000_000))
    } else if abs >= dec!(1_000_000) {
        format!("{sign}${:.2}M", abs / dec!(1_000_000))
    } else if abs >= dec!(1_000) {
        format!("{sign}${:.1}K", abs / dec!(1_000))
    } else {
        format!("{sign}${:.2}", abs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_relative_change() {
        assert_eq!(relative_change(dec!(100), dec!(115)), dec!(0.15));
        assert_eq!(relative_change(dec!(100), dec!(80)), dec!(-0.2));
        assert_eq!(relative_change(Decimal::ZERO, dec!(5)), Decimal::ZERO);
    }

    #[test]
    fn test_basis_points() {
        assert_eq!(to_basis_points(dec!(0.0001)), dec!(1)); // 0.01% = 1 bp
        assert_eq!(to_basis_points(dec!(0.01)), dec!(100)); // 1% = 100 bp
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(dec!(1_250_000)), "$1.25M");
        assert_eq!(format_usd(dec!(830_000)), "$830.0K");
        assert_eq!(format_usd(dec!(12.5)), "$12.50");
        assert_eq!(format_usd(dec!(-2_500_000_000)), "-$2.50B");
    }
}
