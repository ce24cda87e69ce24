//! Integer price-scale arithmetic at the canonical 18-decimal scale.
//!
//! Every comparison and statistic in the pipeline runs on unsigned integers.
//! Rationals never reach this module — they are materialized as scaled
//! integers at the config edge.

use alloy::primitives::{U256, U512};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::constants::{BPS_DENOMINATOR, CANONICAL_DECIMALS, EPSILON_SCALE};

/// Power of ten as U256. `k` is a decimal count, so it is always small.
pub fn pow10(k: u8) -> U256 {
    U256::from(10u64).pow(U256::from(k))
}

/// Rescale a native-decimal price to the canonical 18-decimal scale.
///
/// Widening (`decimals <= 18`) multiplies and is exact. Narrowing divides
/// with truncation toward zero — that truncation is the contract, not an
/// approximation to be corrected elsewhere.
pub fn rescale_to_canonical(price: U256, decimals: u8) -> U256 {
    if decimals <= CANONICAL_DECIMALS {
        price * pow10(CANONICAL_DECIMALS - decimals)
    } else {
        price / pow10(decimals - CANONICAL_DECIMALS)
    }
}

/// Integer median of an ascending-sorted, non-empty sequence.
///
/// Odd length: the element at `(n - 1) / 2`. Even length: the floor of the
/// mean of the two middle elements, computed without overflow.
pub fn median_sorted(sorted: &[U256]) -> U256 {
    debug_assert!(!sorted.is_empty(), "median of empty sequence");
    debug_assert!(sorted.windows(2).all(|w| w[0] <= w[1]), "input not sorted");

    let n = sorted.len();
    if n % 2 == 1 {
        sorted[(n - 1) / 2]
    } else {
        let a = sorted[n / 2 - 1];
        let b = sorted[n / 2];
        // floor((a + b) / 2) without the intermediate sum overflowing.
        (a >> 1) + (b >> 1) + (a & b & U256::from(1u64))
    }
}

/// Absolute deviation of `value` from `reference`, in basis points.
///
/// `|value - reference| * 10_000 / reference`, via a 512-bit intermediate so
/// large prices cannot overflow the product. Saturates at `U256::MAX` in the
/// degenerate tiny-reference case.
pub fn deviation_bps(value: U256, reference: U256) -> U256 {
    if reference.is_zero() {
        return U256::MAX;
    }
    let diff = if value >= reference {
        value - reference
    } else {
        reference - value
    };
    let wide: U512 = U512::from(diff) * U512::from(BPS_DENOMINATOR) / U512::from(reference);
    U256::checked_from_limbs_slice(wide.as_limbs()).unwrap_or(U256::MAX)
}

// ---------------------------------------------------------------------------
// Config-edge materialization
// ---------------------------------------------------------------------------

/// Materialize a non-negative decimal (e.g. a USD threshold) as an integer at
/// `decimals` scale, exactly. Errors when the value is negative or carries
/// more fractional digits than the scale can represent — config values must
/// not be silently rounded.
pub fn decimal_to_scaled(d: &Decimal, decimals: u8) -> Result<U256, String> {
    if d.is_sign_negative() {
        return Err(format!("negative value {d} cannot be scaled"));
    }
    let s = d.normalize().to_string();
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s.as_str(), ""),
    };
    if frac_part.len() > decimals as usize {
        return Err(format!(
            "{d} has more than {decimals} fractional digits"
        ));
    }
    let mut digits = String::with_capacity(int_part.len() + decimals as usize);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    digits.extend(std::iter::repeat('0').take(decimals as usize - frac_part.len()));
    U256::from_str_radix(&digits, 10).map_err(|e| format!("value {d} out of range: {e}"))
}

/// `floor(ratio * 10^6)` — the epsilon-as-ppm form used by the confidence
/// gate's integer comparison. Truncates excess precision by definition.
pub fn ratio_to_ppm_floor(d: &Decimal) -> u64 {
    debug_assert!(!d.is_sign_negative());
    let scaled = d * Decimal::from(EPSILON_SCALE);
    scaled.trunc().to_u64().unwrap_or(u64::MAX)
}
