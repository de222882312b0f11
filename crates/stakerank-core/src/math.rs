//! Checked arithmetic helpers.
//!
//! All engine bookkeeping goes through these so overflow is a reported
//! condition (`ArithmeticOverflow` / `ArithmeticUnderflow`), never a wrap or
//! a panic, and always detected before any state commit.

use crate::{Bps, Result, StakeRankError, BPS_U64};

pub fn add_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or(StakeRankError::ArithmeticOverflow("u64 add"))
}

pub fn sub_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_sub(b)
        .ok_or(StakeRankError::ArithmeticUnderflow("u64 sub"))
}

/// `floor(a * b / denom)` with a u128 intermediate.
pub fn mul_div_floor_u64(a: u64, b: u64, denom: u64) -> Result<u64> {
    if denom == 0 {
        return Err(StakeRankError::DivisionByZero("mul_div_floor"));
    }
    let num = (a as u128) * (b as u128);
    let out = num / (denom as u128);
    u64::try_from(out).map_err(|_| StakeRankError::ArithmeticOverflow("mul_div_floor"))
}

/// `floor(amount * bps / 10_000)`; used for supply-fraction thresholds.
pub fn floor_bps(amount: u64, bps: Bps) -> Result<u64> {
    mul_div_floor_u64(amount, bps.as_u64(), BPS_U64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn add_detects_overflow() {
        assert!(add_u64(u64::MAX, 1).is_err());
        assert_eq!(add_u64(2, 3).unwrap(), 5);
    }

    #[test]
    fn sub_detects_underflow() {
        assert!(sub_u64(1, 2).is_err());
        assert_eq!(sub_u64(5, 3).unwrap(), 2);
    }

    #[test]
    fn floor_bps_basics() {
        let ten_pct = Bps::new(1_000).unwrap();
        assert_eq!(floor_bps(1_000_000, ten_pct).unwrap(), 100_000);
        assert_eq!(floor_bps(0, ten_pct).unwrap(), 0);
        assert_eq!(floor_bps(999, Bps::ZERO).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn floor_bps_never_exceeds_amount(amount in 0u64..=u64::MAX, raw in 0u16..=10_000) {
            let bps = Bps::new(raw).unwrap();
            let out = floor_bps(amount, bps).unwrap();
            prop_assert!(out <= amount);
        }

        #[test]
        fn floor_bps_monotone_in_bps(amount in 0u64..1_000_000_000u64, a in 0u16..=10_000, b in 0u16..=10_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let out_lo = floor_bps(amount, Bps::new(lo).unwrap()).unwrap();
            let out_hi = floor_bps(amount, Bps::new(hi).unwrap()).unwrap();
            prop_assert!(out_lo <= out_hi);
        }
    }
}
