//! Fixed-point ledger primitives.
//!
//! Every monetary value is a `Decimal` kept at (at most) 18 decimal places,
//! the same unit the on-chain ledger settles in. Products and quotients are
//! rounded back to that scale with banker's rounding so two runs over the
//! same inputs always land on the same digits.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places carried by every ledger amount.
pub const UNIT_DECIMALS: u32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("signed add would go negative: {base} + {delta}")]
    NegativeResult { base: Decimal, delta: Decimal },

    #[error("arithmetic overflow: {x} {op} {y}")]
    Overflow { x: Decimal, op: char, y: Decimal },
}

pub fn round_unit(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(UNIT_DECIMALS, RoundingStrategy::MidpointNearestEven)
}

/// Unchecked product. callers only pass values already bounded by `checked_multiply`
/// (trade notionals) or by a ratio below one.
pub fn multiply_decimal(x: Decimal, y: Decimal) -> Decimal {
    round_unit(x * y)
}

pub fn checked_multiply(x: Decimal, y: Decimal) -> Result<Decimal, MathError> {
    x.checked_mul(y)
        .map(round_unit)
        .ok_or(MathError::Overflow { x, op: '*', y })
}

pub fn checked_add(x: Decimal, y: Decimal) -> Result<Decimal, MathError> {
    x.checked_add(y).ok_or(MathError::Overflow { x, op: '+', y })
}

pub fn divide_decimal(x: Decimal, y: Decimal) -> Result<Decimal, MathError> {
    if y.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    x.checked_div(y)
        .map(round_unit)
        .ok_or(MathError::Overflow { x, op: '/', y })
}

/// Adds a signed delta to an unsigned ledger amount, refusing to go below zero.
pub fn add_signed(base: Decimal, delta: Decimal) -> Result<Decimal, MathError> {
    let result = base + delta;
    if result < Decimal::ZERO {
        return Err(MathError::NegativeResult { base, delta });
    }
    Ok(result)
}

pub fn clamp(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn multiply_rounds_to_unit() {
        let product = multiply_decimal(dec!(0.000000001), dec!(0.0000000015));
        // 1.5e-18 rounds half-even to 2e-18
        assert_eq!(product, dec!(0.000000000000000002));
        assert_eq!(multiply_decimal(dec!(50), dec!(200)), dec!(10000));
    }

    #[test]
    fn divide_by_zero_is_an_error() {
        assert_eq!(divide_decimal(dec!(1), Decimal::ZERO), Err(MathError::DivisionByZero));
        assert_eq!(divide_decimal(dec!(1), dec!(4)).unwrap(), dec!(0.25));
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(matches!(
            checked_multiply(Decimal::MAX, dec!(2)),
            Err(MathError::Overflow { op: '*', .. })
        ));
        assert!(matches!(
            checked_add(Decimal::MAX, Decimal::ONE),
            Err(MathError::Overflow { op: '+', .. })
        ));
        assert!(matches!(
            divide_decimal(Decimal::MAX, dec!(0.5)),
            Err(MathError::Overflow { op: '/', .. })
        ));
        assert_eq!(checked_multiply(dec!(50), dec!(200)).unwrap(), dec!(10000));
    }

    #[test]
    fn one_third_is_rounded_to_eighteen_places() {
        let third = divide_decimal(dec!(1), dec!(3)).unwrap();
        assert_eq!(third.scale(), UNIT_DECIMALS);
    }

    #[test]
    fn signed_add_guards_negative() {
        assert_eq!(add_signed(dec!(10), dec!(-4)).unwrap(), dec!(6));
        assert_eq!(add_signed(dec!(10), dec!(-10)).unwrap(), Decimal::ZERO);
        assert!(matches!(
            add_signed(dec!(10), dec!(-11)),
            Err(MathError::NegativeResult { .. })
        ));
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp(dec!(2), dec!(-1), dec!(1)), dec!(1));
        assert_eq!(clamp(dec!(-2), dec!(-1), dec!(1)), dec!(-1));
        assert_eq!(clamp(dec!(0.3), dec!(-1), dec!(1)), dec!(0.3));
    }
}
