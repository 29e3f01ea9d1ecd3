//! Fixed-point money helpers.
//!
//! All amounts are [`Decimal`]; floating point never touches a balance.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use crate::{Error, Result};

/// Scale factor for exporting amounts to integer counters (6 decimal places).
pub const MICRO_SCALE_FACTOR: Decimal = dec!(1_000_000);

const HUNDRED: Decimal = dec!(100);

pub fn ensure_positive(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(amount)
}

/// `total + amount`, or `InvalidAmount` when the sum is not representable.
pub fn checked_sum(total: Decimal, amount: Decimal) -> Result<Decimal> {
    total
        .checked_add(amount)
        .ok_or(Error::InvalidAmount { amount })
}

/// Converts an amount to micro units for atomic counters, saturating at the bounds.
pub fn to_micros(amount: Decimal) -> u64 {
    let saturated = if amount.is_sign_negative() { 0 } else { u64::MAX };
    amount
        .checked_mul(MICRO_SCALE_FACTOR)
        .and_then(|micros| micros.trunc().to_u64())
        .unwrap_or(saturated)
}

/// Share of `limit` consumed by `value`, in percent. Zero limits count as
/// fully used; shares too large to represent saturate at `Decimal::MAX`.
pub fn percent_of(value: Decimal, limit: Decimal) -> Decimal {
    if limit <= Decimal::ZERO {
        return HUNDRED;
    }
    value
        .checked_mul(HUNDRED)
        .and_then(|scaled| scaled.checked_div(limit))
        .unwrap_or(Decimal::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_positive() {
        assert_eq!(ensure_positive(dec!(0.01)).unwrap(), dec!(0.01));
        assert!(matches!(
            ensure_positive(Decimal::ZERO),
            Err(Error::InvalidAmount { .. })
        ));
        assert!(ensure_positive(dec!(-5)).is_err());
    }

    #[test]
    fn test_to_micros() {
        assert_eq!(to_micros(dec!(1.5)), 1_500_000);
        assert_eq!(to_micros(dec!(-3)), 0);
        assert_eq!(to_micros(Decimal::MAX), u64::MAX);
    }

    #[test]
    fn test_checked_sum_rejects_overflow() {
        assert_eq!(checked_sum(dec!(1.5), dec!(2)).unwrap(), dec!(3.5));
        assert!(matches!(
            checked_sum(Decimal::MAX, dec!(1)),
            Err(Error::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(dec!(40000), dec!(50000)), dec!(80));
        assert_eq!(percent_of(dec!(1), Decimal::ZERO), dec!(100));
        assert_eq!(percent_of(Decimal::MAX, dec!(1000)), Decimal::MAX);
    }
}
