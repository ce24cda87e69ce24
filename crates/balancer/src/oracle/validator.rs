//! Per-source quote validation: freshness, confidence, TWAP gates.
//!
//! Pure functions of `(quote, token config, now)`. All applicable gates must
//! pass; a rejected quote is dropped silently by the aggregator, with the
//! reason logged at debug.

use alloy::primitives::U512;

use crate::constants::EPSILON_SCALE;
use crate::store::config_repo::TokenCfg;
use crate::types::{Quote, QuoteMeta};

/// Why a quote failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// `now - at` exceeded the per-source TTL (or no TTL is configured —
    /// a source this token does not budget for is never trusted).
    Stale { age: i64, ttl: Option<u64> },
    /// Confidence/price ratio above epsilon.
    ConfidenceTooWide,
    PoolNotAllowed,
    WindowTooShort { window_sec: u32, min: u32 },
    LiquidityTooLow,
}

/// Apply every gate in order; `Ok(())` means the quote may enter aggregation.
pub fn validate(q: &Quote, cfg: &TokenCfg, now: i64) -> Result<(), RejectReason> {
    // 1. Freshness.
    let ttl = cfg.ttl_for(q.source);
    let age = now - q.at;
    match ttl {
        Some(ttl) if age <= ttl as i64 => {}
        _ => return Err(RejectReason::Stale { age, ttl }),
    }

    // 2. Confidence gate — publisher-aggregated sources only.
    //
    // `conf / price <= epsilon` compared as integers at a fixed 10^6 scale:
    // `conf * 10^6 <= price * epsilon_ppm`. 512-bit intermediates keep the
    // products exact for any 256-bit operands.
    if let QuoteMeta::Confidence { confidence } = q.meta {
        let lhs = U512::from(confidence) * U512::from(EPSILON_SCALE);
        let rhs = U512::from(q.price) * U512::from(cfg.epsilon_ppm);
        if lhs > rhs {
            return Err(RejectReason::ConfidenceTooWide);
        }
    }

    // 3. TWAP gates — DEX observations only.
    if let QuoteMeta::Twap {
        pool,
        window_sec,
        liquidity,
    } = q.meta
    {
        if !cfg.is_pool_allowed(pool) {
            return Err(RejectReason::PoolNotAllowed);
        }
        if window_sec < cfg.twap_window_sec {
            return Err(RejectReason::WindowTooShort {
                window_sec,
                min: cfg.twap_window_sec,
            });
        }
        if liquidity < cfg.min_liquidity {
            return Err(RejectReason::LiquidityTooLow);
        }
    }

    Ok(())
}

/// Boolean view of [`validate`] for callers that do not need the reason.
pub fn is_valid(q: &Quote, cfg: &TokenCfg, now: i64) -> bool {
    validate(q, cfg, now).is_ok()
}
