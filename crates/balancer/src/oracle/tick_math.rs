//! Fixed-point `1.0001^tick` price math for concentrated-liquidity pools.
//!
//! The sqrt price ratio at a tick is computed by integer-exponent
//! decomposition over precomputed Q128 constants — no floating point and no
//! fallback price. Ticks outside the representable range yield `None`, which
//! the TWAP adapter reports as a miss for that pool.

use alloy::primitives::{uint, U256, U512};

use crate::constants::WAD;

/// Largest tick with a representable sqrt ratio; symmetric around zero.
pub const MAX_TICK: i32 = 887_272;

/// sqrt(1.0001^tick) as a Q64.96 fixed-point number.
///
/// Decomposes `|tick|` into powers of two; each set bit multiplies in the
/// precomputed Q128 constant for `sqrt(1.0001)^(2^bit)`, and a positive tick
/// inverts the final ratio. Matches the canonical concentrated-liquidity
/// reference values bit for bit.
pub fn sqrt_ratio_at_tick(tick: i32) -> Option<U256> {
    if tick.abs() > MAX_TICK {
        return None;
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio: U256 = if abs_tick & 0x1 != 0 {
        uint!(0xfffcb933bd6fad37aa2d162d1a594001_U256)
    } else {
        uint!(0x100000000000000000000000000000000_U256)
    };

    const FACTORS: [(u32, U256); 19] = [
        (0x2, uint!(0xfff97272373d413259a46990580e213a_U256)),
        (0x4, uint!(0xfff2e50f5f656932ef12357cf3c7fdcc_U256)),
        (0x8, uint!(0xffe5caca7e10e4e61c3624eaa0941cd0_U256)),
        (0x10, uint!(0xffcb9843d60f6159c9db58835c926644_U256)),
        (0x20, uint!(0xff973b41fa98c081472e6896dfb254c0_U256)),
        (0x40, uint!(0xff2ea16466c96a3843ec78b326b52861_U256)),
        (0x80, uint!(0xfe5dee046a99a2a811c461f1969c3053_U256)),
        (0x100, uint!(0xfcbe86c7900a88aedcffc83b479aa3a4_U256)),
        (0x200, uint!(0xf987a7253ac413176f2b074cf7815e54_U256)),
        (0x400, uint!(0xf3392b0822b70005940c7a398e4b70f3_U256)),
        (0x800, uint!(0xe7159475a2c29b7443b29c7fa6e889d9_U256)),
        (0x1000, uint!(0xd097f3bdfd2022b8845ad8f792aa5825_U256)),
        (0x2000, uint!(0xa9f746462d870fdf8a65dc1f90e061e5_U256)),
        (0x4000, uint!(0x70d869a156d2a1b890bb3df62baf32f7_U256)),
        (0x8000, uint!(0x31be135f97d08fd981231505542fcfa6_U256)),
        (0x10000, uint!(0x9aa508b5b7a84e1c677de54f3e99bc9_U256)),
        (0x20000, uint!(0x5d6af8dedb81196699c329225ee604_U256)),
        (0x40000, uint!(0x2216e584f5fa1ea926041bedfe98_U256)),
        (0x80000, uint!(0x48a170391f7dc42444e8fa2_U256)),
    ];

    for (bit, factor) in FACTORS {
        if abs_tick & bit != 0 {
            ratio = mul_shift_128(ratio, factor);
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up so the result round-trips through the
    // reference tick<->ratio mapping.
    let round_up = if ratio % (U256::from(1u64) << 32) == U256::ZERO {
        U256::ZERO
    } else {
        U256::from(1u64)
    };
    Some((ratio >> 32) + round_up)
}

/// `(a * b) >> 128` without overflow, via a 512-bit intermediate.
fn mul_shift_128(a: U256, b: U256) -> U256 {
    let wide: U512 = (U512::from(a) * U512::from(b)) >> 128;
    U256::checked_from_limbs_slice(wide.as_limbs())
        .expect("Q128 product exceeds 256 bits after shift")
}

/// Spot price of the base token in quote-token terms at 18 decimals, from a
/// Q64.96 sqrt ratio.
///
/// The raw pool ratio is `token1/token0` in raw units; decimal adjustment and
/// orientation (`base_is_token0`) convert it into a human-scale price of one
/// whole base token. Returns `None` when the scaled price cannot fit 256 bits
/// or the ratio is degenerate.
pub fn price_e18_from_sqrt_ratio(
    sqrt_ratio_x96: U256,
    base_is_token0: bool,
    base_decimals: u8,
    quote_decimals: u8,
) -> Option<U256> {
    if sqrt_ratio_x96.is_zero() {
        return None;
    }

    let sq = U512::from(sqrt_ratio_x96) * U512::from(sqrt_ratio_x96);
    let wad = U512::from(WAD);
    let base_scale = U512::from(pow10_u512(base_decimals));
    let quote_scale = U512::from(pow10_u512(quote_decimals));

    let wide: U512 = if base_is_token0 {
        // price = (sqrt^2 / 2^192) * 10^base / 10^quote, at 1e18
        ((sq * wad * base_scale) >> 192) / quote_scale
    } else {
        // Inverted pool: price = (2^192 / sqrt^2) * 10^base / 10^quote, at 1e18
        ((U512::from(1u64) << 192) * wad * base_scale) / (sq * quote_scale)
    };

    U256::checked_from_limbs_slice(wide.as_limbs()).filter(|p| !p.is_zero())
}

fn pow10_u512(k: u8) -> U256 {
    U256::from(10u64).pow(U256::from(k))
}

/// Time-weighted mean tick over a window, from two tick-cumulative readings.
///
/// Floor division toward negative infinity — the reference observation
/// semantics, not Rust's truncation.
pub fn mean_tick(tick_cumulative_start: i64, tick_cumulative_end: i64, window_sec: u32) -> i32 {
    debug_assert!(window_sec > 0);
    let delta = tick_cumulative_end - tick_cumulative_start;
    let window = window_sec as i64;
    let mut tick = delta / window;
    if delta < 0 && delta % window != 0 {
        tick -= 1;
    }
    tick as i32
}

/// Harmonic-mean liquidity over a window from two X128 seconds-per-liquidity
/// cumulative readings (160-bit counters that wrap).
pub fn harmonic_mean_liquidity(
    spl_cumulative_start: U256,
    spl_cumulative_end: U256,
    window_sec: u32,
) -> Option<U256> {
    let mask = (U256::from(1u64) << 160) - U256::from(1u64);
    let delta: U256 = spl_cumulative_end.wrapping_sub(spl_cumulative_start) & mask;
    if delta.is_zero() {
        return None;
    }
    Some((U256::from(window_sec) << 128) / delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q96: u128 = 1 << 96;

    #[test]
    fn tick_zero_is_unit_price() {
        let sqrt = sqrt_ratio_at_tick(0).unwrap();
        assert_eq!(sqrt, U256::from(Q96));
        let price = price_e18_from_sqrt_ratio(sqrt, true, 18, 18).unwrap();
        assert_eq!(price, WAD);
    }

    #[test]
    fn out_of_range_tick_rejected() {
        assert!(sqrt_ratio_at_tick(MAX_TICK + 1).is_none());
        assert!(sqrt_ratio_at_tick(-(MAX_TICK + 1)).is_none());
        assert!(sqrt_ratio_at_tick(MAX_TICK).is_some());
        assert!(sqrt_ratio_at_tick(-MAX_TICK).is_some());
    }

    #[test]
    fn sqrt_ratio_monotonic_in_tick() {
        let ticks = [-887_272, -100_000, -1, 0, 1, 100_000, 887_272];
        let ratios: Vec<U256> = ticks
            .iter()
            .map(|t| sqrt_ratio_at_tick(*t).unwrap())
            .collect();
        for w in ratios.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn price_doubles_near_tick_6932() {
        // 1.0001^6931.8 ~= 2, so tick 6932 prices within 0.1% of 2e18.
        let sqrt = sqrt_ratio_at_tick(6_932).unwrap();
        let price = price_e18_from_sqrt_ratio(sqrt, true, 18, 18).unwrap();
        let two = U256::from(2u64) * WAD;
        let tolerance = two / U256::from(1_000u64);
        let diff = if price > two { price - two } else { two - price };
        assert!(diff < tolerance, "price {price} not within 0.1% of 2e18");
    }

    #[test]
    fn inverse_tick_inverts_price() {
        // price(t) * price(-t) ~= 1e36 within rounding.
        let up = price_e18_from_sqrt_ratio(sqrt_ratio_at_tick(50_000).unwrap(), true, 18, 18)
            .unwrap();
        let down = price_e18_from_sqrt_ratio(sqrt_ratio_at_tick(-50_000).unwrap(), true, 18, 18)
            .unwrap();
        let product = U512::from(up) * U512::from(down);
        let unit = U512::from(WAD) * U512::from(WAD);
        let ratio_ppm = product * U512::from(1_000_000u64) / unit;
        let ppm = U256::checked_from_limbs_slice(ratio_ppm.as_limbs()).unwrap();
        assert!(
            ppm > U256::from(999_000u64) && ppm < U256::from(1_001_000u64),
            "inverse product off unity: {ppm} ppm"
        );
    }

    #[test]
    fn orientation_flip_inverts_price() {
        let sqrt = sqrt_ratio_at_tick(30_000).unwrap();
        let as_token0 = price_e18_from_sqrt_ratio(sqrt, true, 18, 18).unwrap();
        let as_token1 = price_e18_from_sqrt_ratio(sqrt, false, 18, 18).unwrap();
        let product = U512::from(as_token0) * U512::from(as_token1);
        let unit = U512::from(WAD) * U512::from(WAD);
        let ppm_wide = product * U512::from(1_000_000u64) / unit;
        let ppm = U256::checked_from_limbs_slice(ppm_wide.as_limbs()).unwrap();
        assert!(ppm > U256::from(999_000u64) && ppm < U256::from(1_001_000u64));
    }

    #[test]
    fn decimal_adjustment_usdc_quote() {
        // 18-decimal base over a 6-decimal quote at tick 0: each raw base
        // unit buys one raw quote unit, so a whole base token is worth
        // 10^(18-6) whole quote tokens -> 1e12 * 1e18 at the e18 scale.
        let sqrt = sqrt_ratio_at_tick(0).unwrap();
        let price = price_e18_from_sqrt_ratio(sqrt, true, 18, 6).unwrap();
        assert_eq!(price, WAD * U256::from(10u64).pow(U256::from(12u64)));
    }

    // -- mean tick ------------------------------------------------------------

    #[test]
    fn mean_tick_positive_delta() {
        assert_eq!(mean_tick(0, 7_200, 3_600), 2);
    }

    #[test]
    fn mean_tick_rounds_toward_negative_infinity() {
        // delta = -1 over 3600s: -1/3600 truncates to 0, floors to -1.
        assert_eq!(mean_tick(0, -1, 3_600), -1);
        assert_eq!(mean_tick(0, -3_600, 3_600), -1);
        assert_eq!(mean_tick(0, -3_601, 3_600), -2);
    }

    // -- harmonic liquidity ---------------------------------------------------

    #[test]
    fn harmonic_liquidity_from_delta() {
        // delta = window << 128 / L  =>  recovered L
        let l = U256::from(5_000_000u64);
        let window = 3_600u32;
        let delta = (U256::from(window) << 128) / l;
        let got = harmonic_mean_liquidity(U256::ZERO, delta, window).unwrap();
        assert_eq!(got, l);
    }

    #[test]
    fn harmonic_liquidity_handles_counter_wrap() {
        let mask = (U256::from(1u64) << 160) - U256::from(1u64);
        let l = U256::from(1_000_000u64);
        let window = 3_600u32;
        let delta = (U256::from(window) << 128) / l;
        // Start near the top of the 160-bit range so the end wraps.
        let start = mask - U256::from(5u64);
        let end = (start + delta) & mask;
        let got = harmonic_mean_liquidity(start, end, window).unwrap();
        assert_eq!(got, l);
    }

    #[test]
    fn harmonic_liquidity_zero_delta_is_none() {
        assert!(harmonic_mean_liquidity(U256::from(7u64), U256::from(7u64), 3_600).is_none());
    }
}
