//! Decimal arithmetic & precision policy shared by the pricing engine.
//!
//! Two scales are used throughout the pipeline: [`Q7`] for every
//! intermediate value and [`Q2`] for customer-facing output. Rounding is
//! half-away-from-zero everywhere, applied directly over the `BigDecimal`'s
//! unscaled integer representation rather than through `BigDecimal::with_scale`,
//! which truncates instead of rounding.

use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits carried by every intermediate computation.
pub const Q7: i64 = 7;
/// Fractional digits carried by customer-facing totals.
pub const Q2: i64 = 2;

#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("invalid decimal literal: {0}")]
    InvalidDecimal(String),
    #[error("value is not finite: {0}")]
    NotFinite(String),
}

pub type MoneyResult<T> = Result<T, MoneyError>;

/// Parse a decimal string, rejecting non-finite literals but expanding
/// exponential notation rather than rejecting it, per the normalisation
/// contract (`"1e2"` becomes `100`, not an error).
pub fn parse_decimal(raw: &str) -> MoneyResult<BigDecimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MoneyError::InvalidDecimal(raw.to_string()));
    }
    if trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("inf")
        || trimmed.eq_ignore_ascii_case("infinity")
        || trimmed.eq_ignore_ascii_case("-inf")
        || trimmed.eq_ignore_ascii_case("-infinity")
    {
        return Err(MoneyError::NotFinite(raw.to_string()));
    }
    BigDecimal::from_str(trimmed).map_err(|_| MoneyError::InvalidDecimal(raw.to_string()))
}

fn digits_sign(digits: &BigInt) -> Sign {
    if digits.is_zero() {
        Sign::NoSign
    } else {
        digits.sign()
    }
}

/// Round `value` to `scale` fractional digits, half-away-from-zero.
///
/// Scaling up (more fractional digits than currently represented) simply
/// pads with zeros; scaling down rounds the dropped digits.
pub fn round_scale(value: &BigDecimal, scale: i64) -> BigDecimal {
    let (digits, current_scale) = value.as_bigint_and_exponent();
    if current_scale <= scale {
        let pad = (scale - current_scale) as u32;
        let factor = BigInt::from(10u32).pow(pad);
        return BigDecimal::new(digits * factor, scale);
    }

    let drop = (current_scale - scale) as u32;
    let divisor = BigInt::from(10u32).pow(drop);
    let (quotient, remainder) = digits.div_rem(&divisor);
    if remainder.is_zero() {
        return BigDecimal::new(quotient, scale);
    }
    let doubled = remainder.abs() * BigInt::from(2u32);
    let rounded = if doubled >= divisor {
        match digits_sign(&digits) {
            Sign::Minus => quotient - BigInt::from(1),
            _ => quotient + BigInt::from(1),
        }
    } else {
        quotient
    };
    BigDecimal::new(rounded, scale)
}

/// Round to [`Q7`].
pub fn round_q7(value: &BigDecimal) -> BigDecimal {
    round_scale(value, Q7)
}

/// Round to [`Q2`].
pub fn round_q2(value: &BigDecimal) -> BigDecimal {
    round_scale(value, Q2)
}

/// Normalize a monetary value to two decimal places (customer facing scale).
///
/// Kept for callers migrating from the pre-pipeline money helper; equivalent
/// to [`round_q2`].
pub fn normalize_scale(value: &BigDecimal) -> BigDecimal {
    round_q2(value)
}

/// Strip a `-0` (or `-0.000...`) result down to a plain zero at the same scale.
pub fn remove_negative_zero(value: &BigDecimal) -> BigDecimal {
    let (digits, scale) = value.as_bigint_and_exponent();
    if digits.is_zero() {
        return BigDecimal::new(BigInt::zero(), scale);
    }
    value.clone()
}

/// Exact equality comparison at a given scale after rounding both sides.
/// Unlike a prior `f64`-based tolerance check, this never loses precision.
pub fn nearly_equal_at_scale(a: &BigDecimal, b: &BigDecimal, scale: i64, tolerance_ulps: u32) -> bool {
    let ra = round_scale(a, scale);
    let rb = round_scale(b, scale);
    let diff = (&ra - &rb).abs();
    let tolerance = BigDecimal::new(BigInt::from(tolerance_ulps), scale);
    diff <= tolerance
}

/// Q2-scale tolerance comparison (replaces the old float-based `nearly_equal`).
pub fn nearly_equal(a: &BigDecimal, b: &BigDecimal, cents_tolerance: i64) -> bool {
    nearly_equal_at_scale(a, b, Q2, cents_tolerance.unsigned_abs() as u32)
}

/// A monetary value normalized to [`Q2`]. Safe to hand to a caller as a
/// customer-facing total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedMoney(BigDecimal);

impl NormalizedMoney {
    pub fn new(raw: BigDecimal) -> Self {
        Self(remove_negative_zero(&round_q2(&raw)))
    }

    pub fn inner(&self) -> &BigDecimal {
        &self.0
    }

    pub fn to_decimal_string(&self) -> String {
        self.0.to_string()
    }
}

impl From<BigDecimal> for NormalizedMoney {
    fn from(value: BigDecimal) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_away_from_zero_rounds_up_on_exact_half() {
        let v = BigDecimal::from_str("1.005").unwrap();
        assert_eq!(round_q2(&v).to_string(), "1.01");
        let v = BigDecimal::from_str("-1.005").unwrap();
        assert_eq!(round_q2(&v).to_string(), "-1.01");
    }

    #[test]
    fn half_away_from_zero_matches_spec_example() {
        // Scenario 3: 10% pre-tax discount on a 525.00 subtotal is exact, no rounding needed.
        let subtotal = BigDecimal::from_str("525.00").unwrap();
        let discount = round_q7(&(&subtotal * BigDecimal::from_str("0.10").unwrap()));
        assert_eq!(discount.to_string(), "52.5000000");
    }

    #[test]
    fn scaling_up_pads_zeros() {
        let v = BigDecimal::from_str("5").unwrap();
        assert_eq!(round_q7(&v).to_string(), "5.0000000");
    }

    #[test]
    fn negative_zero_is_normalized() {
        let v = BigDecimal::from_str("-0.00").unwrap();
        let rounded = round_q2(&v);
        assert_eq!(remove_negative_zero(&rounded).to_string(), "0.00");
    }

    #[test]
    fn rejects_non_finite() {
        assert!(matches!(parse_decimal("NaN"), Err(MoneyError::NotFinite(_))));
        assert!(matches!(parse_decimal("Infinity"), Err(MoneyError::NotFinite(_))));
    }

    #[test]
    fn accepts_exponential_form() {
        let v = parse_decimal("1e2").unwrap();
        assert_eq!(round_q2(&v).to_string(), "100.00");
    }

    #[test]
    fn nearly_equal_is_exact_not_float() {
        let a = BigDecimal::from_str("10.001").unwrap();
        let b = BigDecimal::from_str("10.009").unwrap();
        assert!(nearly_equal(&a, &b, 1));
        let c = BigDecimal::from_str("10.100").unwrap();
        assert!(!nearly_equal(&a, &c, 1));
    }
}
