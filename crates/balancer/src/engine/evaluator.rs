//! Trigger evaluation: pure decision from rule, price, balance and history.
//!
//! `evaluate` is deterministic — the same inputs always yield the same
//! decision — and performs no I/O. Gates apply in a fixed order: enabled,
//! cooldown, threshold with hysteresis, amount, balance sufficiency. A
//! suppressed signal carries its reason so the caller can log it.

use alloy::primitives::{U256, U512};

use crate::constants::BPS_DENOMINATOR;
use crate::store::config_repo::Rule;
use crate::types::scaled::pow10;
use crate::types::{AmountSpec, ConsolidatedPrice, Direction, TransferSignal};

/// Inputs that change between evaluations of the same rule.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    /// Evaluation wall-clock, epoch seconds.
    pub now: i64,
    /// Source-side wallet balance in raw token units.
    pub balance_units: U256,
    /// When this rule last fired, if ever.
    pub last_fire_at: Option<i64>,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalDecision {
    Fire(TransferSignal),
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    CoolingDown { remaining_sec: u64 },
    /// Price did not cross the threshold + hysteresis band.
    NotTriggered,
    /// A percent amount of a dust balance computed to zero units.
    ZeroAmount,
    InsufficientBalance { needed: U256, available: U256 },
}

/// Evaluate one rule against a consolidated price.
pub fn evaluate(rule: &Rule, cp: &ConsolidatedPrice, ctx: &EvalContext) -> EvalDecision {
    // 1. Enabled.
    if !rule.enabled {
        return EvalDecision::Skip(SkipReason::Disabled);
    }

    // 2. Cooldown: fires again only once `now - last >= cooldown`.
    if let Some(last) = ctx.last_fire_at {
        let elapsed = ctx.now.saturating_sub(last);
        if elapsed < rule.cooldown_sec as i64 {
            return EvalDecision::Skip(SkipReason::CoolingDown {
                remaining_sec: (rule.cooldown_sec as i64 - elapsed) as u64,
            });
        }
    }

    // 3. Threshold with hysteresis, by integer cross-multiplication — the
    // consolidated price keeps its own decimals and is never converted to a
    // fraction.
    let hysteresis = rule.hysteresis_e18();
    let triggered = match rule.direction {
        Direction::HotToCold => price_gte(cp, rule.threshold_e18 + hysteresis),
        Direction::ColdToHot => {
            let bound = rule.threshold_e18.saturating_sub(hysteresis);
            price_lte(cp, bound)
        }
    };
    if !triggered {
        return EvalDecision::Skip(SkipReason::NotTriggered);
    }

    // 4. Amount.
    let amount_units = match rule.amount {
        AmountSpec::Absolute { units } => units,
        AmountSpec::Percent { bps } => {
            ctx.balance_units * U256::from(bps) / U256::from(BPS_DENOMINATOR)
        }
    };
    if amount_units.is_zero() {
        return EvalDecision::Skip(SkipReason::ZeroAmount);
    }

    // 5. Balance sufficiency on the source side.
    if amount_units > ctx.balance_units {
        return EvalDecision::Skip(SkipReason::InsufficientBalance {
            needed: amount_units,
            available: ctx.balance_units,
        });
    }

    EvalDecision::Fire(TransferSignal {
        rule_id: rule.rule_id.clone(),
        price_at_fire: cp.price,
        decimals_at_fire: cp.decimals,
        fired_at: cp.at,
        amount_units,
        direction: rule.direction,
    })
}

/// `cp.price / 10^cp.decimals >= bound / 10^18`, cross-multiplied.
fn price_gte(cp: &ConsolidatedPrice, bound_e18: U256) -> bool {
    let lhs = U512::from(cp.price) * U512::from(pow10(18));
    let rhs = U512::from(bound_e18) * U512::from(pow10(cp.decimals));
    lhs >= rhs
}

/// `cp.price / 10^cp.decimals <= bound / 10^18`, cross-multiplied.
fn price_lte(cp: &ConsolidatedPrice, bound_e18: U256) -> bool {
    let lhs = U512::from(cp.price) * U512::from(pow10(18));
    let rhs = U512::from(bound_e18) * U512::from(pow10(cp.decimals));
    lhs <= rhs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WAD;
    use crate::types::{ExecutionMode, PriceMode};
    use alloy::primitives::address;
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000;

    fn rule() -> Rule {
        Rule {
            rule_id: "weth-skim".into(),
            token_id: "WETH".into(),
            chain_id: 1,
            token_address: address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            threshold_e18: U256::from(2_000u64) * WAD,
            direction: Direction::HotToCold,
            amount: AmountSpec::Percent { bps: 5_000 },
            hot_addr: address!("1111111111111111111111111111111111111111"),
            cold_addr: address!("2222222222222222222222222222222222222222"),
            execution_mode: ExecutionMode::DirectKey,
            hysteresis_bps: 100,
            cooldown_sec: 3_600,
            enabled: true,
        }
    }

    fn price(usd_e18: U256) -> ConsolidatedPrice {
        ConsolidatedPrice {
            token_id: "WETH".into(),
            price: usd_e18,
            decimals: 18,
            at: NOW,
            mode: PriceMode::Normal,
            sources_used: vec![],
        }
    }

    fn ctx(balance: U256) -> EvalContext {
        EvalContext {
            now: NOW,
            balance_units: balance,
            last_fire_at: None,
        }
    }

    fn ten_tokens() -> U256 {
        U256::from(10u64) * WAD
    }

    // -- S5: percent fire -----------------------------------------------------

    #[test]
    fn s5_hot_to_cold_percent_fire() {
        let cp = price(U256::from(2_500u64) * WAD);
        let decision = evaluate(&rule(), &cp, &ctx(ten_tokens()));

        match decision {
            EvalDecision::Fire(signal) => {
                assert_eq!(signal.amount_units, U256::from(5u64) * WAD);
                assert_eq!(signal.direction, Direction::HotToCold);
                assert_eq!(signal.price_at_fire, U256::from(2_500u64) * WAD);
                assert_eq!(signal.fired_at, NOW);
            }
            other => panic!("expected fire, got {other:?}"),
        }
    }

    // -- gates in order -------------------------------------------------------

    #[test]
    fn disabled_rule_never_fires() {
        let mut r = rule();
        r.enabled = false;
        let cp = price(U256::from(9_999u64) * WAD);
        assert_eq!(
            evaluate(&r, &cp, &ctx(ten_tokens())),
            EvalDecision::Skip(SkipReason::Disabled)
        );
    }

    #[test]
    fn cooldown_suppresses_within_window() {
        let cp = price(U256::from(2_500u64) * WAD);
        let mut c = ctx(ten_tokens());
        c.last_fire_at = Some(NOW - 100);

        match evaluate(&rule(), &cp, &c) {
            EvalDecision::Skip(SkipReason::CoolingDown { remaining_sec }) => {
                assert_eq!(remaining_sec, 3_500);
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
    }

    #[test]
    fn cooldown_boundary_fires_at_exact_expiry() {
        let cp = price(U256::from(2_500u64) * WAD);
        let mut c = ctx(ten_tokens());
        c.last_fire_at = Some(NOW - 3_600);
        assert!(matches!(evaluate(&rule(), &cp, &c), EvalDecision::Fire(_)));
    }

    // -- hysteresis boundaries ------------------------------------------------

    #[test]
    fn hot_to_cold_fires_at_threshold_plus_band() {
        // threshold $2000 + 100 bps = $2020 exactly.
        let cp = price(U256::from(2_020u64) * WAD);
        assert!(matches!(
            evaluate(&rule(), &cp, &ctx(ten_tokens())),
            EvalDecision::Fire(_)
        ));
    }

    #[test]
    fn hot_to_cold_holds_below_band() {
        // One wei-of-price below the band must not fire.
        let cp = price(U256::from(2_020u64) * WAD - U256::from(1u64));
        assert_eq!(
            evaluate(&rule(), &cp, &ctx(ten_tokens())),
            EvalDecision::Skip(SkipReason::NotTriggered)
        );
    }

    #[test]
    fn cold_to_hot_fires_at_threshold_minus_band() {
        let mut r = rule();
        r.direction = Direction::ColdToHot;
        // $2000 - 1% = $1980
        let cp = price(U256::from(1_980u64) * WAD);
        assert!(matches!(
            evaluate(&r, &cp, &ctx(ten_tokens())),
            EvalDecision::Fire(_)
        ));
        // A hair above holds.
        let cp = price(U256::from(1_980u64) * WAD + U256::from(1u64));
        assert_eq!(
            evaluate(&r, &cp, &ctx(ten_tokens())),
            EvalDecision::Skip(SkipReason::NotTriggered)
        );
    }

    #[test]
    fn zero_hysteresis_fires_at_threshold() {
        let mut r = rule();
        r.hysteresis_bps = 0;
        let cp = price(U256::from(2_000u64) * WAD);
        assert!(matches!(
            evaluate(&r, &cp, &ctx(ten_tokens())),
            EvalDecision::Fire(_)
        ));
    }

    // -- amounts --------------------------------------------------------------

    #[test]
    fn absolute_amount_passes_through() {
        let mut r = rule();
        r.amount = AmountSpec::Absolute {
            units: U256::from(3u64) * WAD,
        };
        let cp = price(U256::from(2_500u64) * WAD);
        match evaluate(&r, &cp, &ctx(ten_tokens())) {
            EvalDecision::Fire(signal) => assert_eq!(signal.amount_units, U256::from(3u64) * WAD),
            other => panic!("expected fire, got {other:?}"),
        }
    }

    #[test]
    fn percent_amount_truncates() {
        let mut r = rule();
        r.amount = AmountSpec::Percent { bps: 3_333 };
        let cp = price(U256::from(2_500u64) * WAD);
        match evaluate(&r, &cp, &ctx(U256::from(3u64))) {
            // 3 * 3333 / 10000 = 0 -> zero-amount skip
            EvalDecision::Skip(SkipReason::ZeroAmount) => {}
            other => panic!("expected zero-amount skip, got {other:?}"),
        }
    }

    #[test]
    fn insufficient_balance_suppresses_absolute() {
        let mut r = rule();
        r.amount = AmountSpec::Absolute {
            units: U256::from(100u64) * WAD,
        };
        let cp = price(U256::from(2_500u64) * WAD);
        match evaluate(&r, &cp, &ctx(ten_tokens())) {
            EvalDecision::Skip(SkipReason::InsufficientBalance { needed, available }) => {
                assert_eq!(needed, U256::from(100u64) * WAD);
                assert_eq!(available, ten_tokens());
            }
            other => panic!("expected insufficient balance, got {other:?}"),
        }
    }

    // -- determinism and properties -------------------------------------------

    #[test]
    fn same_inputs_same_decision() {
        let cp = price(U256::from(2_500u64) * WAD);
        let a = evaluate(&rule(), &cp, &ctx(ten_tokens()));
        let b = evaluate(&rule(), &cp, &ctx(ten_tokens()));
        assert_eq!(a, b);
    }

    proptest! {
        // Property: hysteresis monotonicity for HotToCold — if a lower price
        // fires, every higher price fires too.
        #[test]
        fn hot_to_cold_monotone(p1 in 1u64..1_000_000, p2 in 1u64..1_000_000) {
            let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
            let r = rule();
            let c = ctx(ten_tokens());

            let low_fires = matches!(
                evaluate(&r, &price(U256::from(lo) * WAD), &c),
                EvalDecision::Fire(_)
            );
            let high_fires = matches!(
                evaluate(&r, &price(U256::from(hi) * WAD), &c),
                EvalDecision::Fire(_)
            );
            prop_assert!(!low_fires || high_fires);
        }

        // Property: cooldown honored — within [last, last + cooldown) the
        // rule never fires, whatever the price.
        #[test]
        fn cooldown_honored(offset in 0i64..3_600, usd in 1u64..1_000_000) {
            let r = rule();
            let mut c = ctx(ten_tokens());
            c.last_fire_at = Some(NOW - offset);
            let decision = evaluate(&r, &price(U256::from(usd) * WAD), &c);
            prop_assert!(
                matches!(decision, EvalDecision::Skip(SkipReason::CoolingDown { .. })),
                "fired {offset}s after last fire with 3600s cooldown"
            );
        }

        // Property: a percent amount never exceeds the balance.
        #[test]
        fn percent_amount_within_balance(balance in 0u128..u128::MAX, bps in 1u32..=10_000) {
            let mut r = rule();
            r.amount = AmountSpec::Percent { bps };
            let c = ctx(U256::from(balance));
            let cp = price(U256::from(9_999u64) * WAD);
            if let EvalDecision::Fire(signal) = evaluate(&r, &cp, &c) {
                prop_assert!(signal.amount_units <= c.balance_units);
            }
        }
    }
}
