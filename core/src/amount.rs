//! Fixed-point monetary amounts.
//!
//! Values are base-10 fixed point: up to 20 integer digits and 8
//! fractional digits, carried as [`rust_decimal::Decimal`] end to end.
//! Binary floats are never used for sums or equality; the persistence
//! boundary serializes amounts as canonical decimal strings.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Maximum fractional digits an amount may carry.
pub const AMOUNT_SCALE: u32 = 8;

/// Maximum integer digits an amount may carry.
pub const MAX_INTEGER_DIGITS: u32 = 20;

/// Upper bound (exclusive) on any amount: 10^20.
pub fn max_amount() -> Decimal {
    Decimal::from_i128_with_scale(100_000_000_000_000_000_000i128, 0)
}

/// True iff `value` fits the fixed-point envelope: non-negative,
/// at most [`AMOUNT_SCALE`] fractional digits and below 10^20.
pub fn in_range(value: &Decimal) -> bool {
    if value.is_sign_negative() && !value.is_zero() {
        return false;
    }
    if value.normalize().scale() > AMOUNT_SCALE {
        return false;
    }
    *value < max_amount()
}

/// Canonical string form used at the persistence boundary.
///
/// Trailing fractional zeros are stripped so that equal amounts have
/// equal strings ("1.50000000" and "1.5" both store as "1.5").
pub fn to_db_string(value: &Decimal) -> String {
    value.normalize().to_string()
}

/// Parses a value previously written with [`to_db_string`].
pub fn from_db_str(s: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn accepts_typical_amounts() {
        assert!(in_range(&dec!(0)));
        assert!(in_range(&dec!(1000)));
        assert!(in_range(&dec!(0.00000001)));
        assert!(in_range(&dec!(99999999999999999999.99999999)));
    }

    #[test]
    fn rejects_negative_and_oversized() {
        assert!(!in_range(&dec!(-0.00000001)));
        assert!(!in_range(&max_amount()));
    }

    #[test]
    fn rejects_excess_precision() {
        let v = Decimal::from_str("0.000000001").unwrap();
        assert!(!in_range(&v));
    }

    #[test]
    fn normalized_scale_is_what_counts() {
        // Nine digits of stated scale, but trailing zero: still 8 significant.
        let v = Decimal::from_str("0.000000010").unwrap();
        assert!(in_range(&v));
    }

    #[test]
    fn db_round_trip_is_exact() {
        let v = dec!(12345.67890001);
        assert_eq!(from_db_str(&to_db_string(&v)).unwrap(), v);
        assert_eq!(to_db_string(&dec!(1.50000000)), "1.5");
        assert_eq!(to_db_string(&dec!(0)), "0");
    }

    #[test]
    fn decimal_sums_are_exact_where_floats_are_not() {
        // The classic binary-float failure this representation exists to avoid.
        let float_sum = 0.1f64 + 0.2f64;
        assert_ne!(float_sum, 0.3f64);

        let decimal_sum = dec!(0.1) + dec!(0.2);
        assert_eq!(decimal_sum, dec!(0.3));
    }
}
