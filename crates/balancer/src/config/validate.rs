use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;

use super::types::BalancerConfig;

/// Validate invariants across the merged config that serde alone cannot
/// enforce. Called automatically by [`super::load_config`]. Collects every
/// violation before failing so operators fix a config in one pass.
pub fn validate_config(config: &BalancerConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_app(config, &mut errors);
    validate_chain(config, &mut errors);
    validate_tokens(config, &mut errors);
    validate_rules(config, &mut errors);
    validate_timing(config, &mut errors);
    validate_live_mode(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

// ---------------------------------------------------------------------------
// App config
// ---------------------------------------------------------------------------

fn validate_app(config: &BalancerConfig, errors: &mut Vec<String>) {
    let level = config.app.logging.level.as_str();
    if !matches!(level, "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(format!(
            "app.logging: level ({level}) must be one of trace/debug/info/warn/error"
        ));
    }
}

// ---------------------------------------------------------------------------
// Chain config
// ---------------------------------------------------------------------------

fn validate_chain(config: &BalancerConfig, errors: &mut Vec<String>) {
    let chain = &config.chain;

    if chain.rpc.http_url.is_empty() {
        errors.push("chain.rpc: http_url is empty".into());
    }

    if chain.pyth.hermes_url.is_empty() {
        errors.push("chain.pyth: hermes_url is empty".into());
    }

    if chain.tokens.is_empty() {
        errors.push("chain.tokens: must have at least one token".into());
    }

    for (symbol, token) in &chain.tokens {
        if let Err(e) = validate_address(&token.address) {
            errors.push(format!("chain.tokens.{symbol}.address: {e}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Token aggregation config
// ---------------------------------------------------------------------------

fn validate_tokens(config: &BalancerConfig, errors: &mut Vec<String>) {
    let mut seen: HashSet<&str> = HashSet::new();

    if config.tokens.tokens.is_empty() {
        errors.push("tokens: must configure at least one token".into());
    }

    for entry in &config.tokens.tokens {
        let id = entry.token_id.as_str();

        if !seen.insert(id) {
            errors.push(format!("tokens.{id}: duplicate token_id"));
        }

        if !config.chain.tokens.contains_key(id) {
            errors.push(format!("tokens.{id}: no contract entry in chain.tokens"));
        }

        if entry.ttl_by_source.is_empty() {
            errors.push(format!("tokens.{id}: ttl_by_source is empty"));
        }

        if entry.epsilon < Decimal::ZERO || entry.epsilon > dec!(1) {
            errors.push(format!(
                "tokens.{id}: epsilon ({}) must be in [0, 1]",
                entry.epsilon
            ));
        }

        if alloy::primitives::U256::from_str_radix(&entry.min_liquidity, 10).is_err() {
            errors.push(format!(
                "tokens.{id}: min_liquidity is not an unsigned integer"
            ));
        }

        let has_source = entry.chainlink_feed.is_some()
            || entry.pyth_feed_id.is_some()
            || !entry.pools.is_empty();
        if !has_source {
            errors.push(format!(
                "tokens.{id}: no price source configured (need a feed, a pyth id, or pools)"
            ));
        }

        if let Some(feed) = &entry.chainlink_feed {
            if let Err(e) = validate_address(feed) {
                errors.push(format!("tokens.{id}.chainlink_feed: {e}"));
            }
        }

        if !entry.pools.is_empty() && entry.twap_window_sec == 0 {
            errors.push(format!(
                "tokens.{id}: twap_window_sec must be > 0 when pools are configured"
            ));
        }

        for (i, pool) in entry.pools.iter().enumerate() {
            if let Err(e) = validate_address(&pool.address) {
                errors.push(format!("tokens.{id}.pools[{i}].address: {e}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn validate_rules(config: &BalancerConfig, errors: &mut Vec<String>) {
    let token_ids: HashSet<&str> = config
        .tokens
        .tokens
        .iter()
        .map(|t| t.token_id.as_str())
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();

    for rule in &config.rules.rules {
        let id = rule.rule_id.as_str();

        if !seen.insert(id) {
            errors.push(format!("rules.{id}: duplicate rule_id"));
        }

        if !token_ids.contains(rule.token_id.as_str()) {
            errors.push(format!(
                "rules.{id}: token_id {} has no aggregation config",
                rule.token_id
            ));
        }

        if rule.threshold_usd <= Decimal::ZERO {
            errors.push(format!(
                "rules.{id}: threshold_usd ({}) must be > 0",
                rule.threshold_usd
            ));
        }

        if rule.hysteresis_bps >= 10_000 {
            errors.push(format!(
                "rules.{id}: hysteresis_bps ({}) must be < 10000",
                rule.hysteresis_bps
            ));
        }

        if let super::types::AmountEntry::Percent { bps } = rule.amount {
            if bps == 0 || bps > 10_000 {
                errors.push(format!(
                    "rules.{id}: percent amount bps ({bps}) must be in 1..=10000"
                ));
            }
        }

        if let super::types::AmountEntry::Absolute { ref units } = rule.amount {
            if alloy::primitives::U256::from_str_radix(units, 10).is_err() {
                errors.push(format!(
                    "rules.{id}: absolute amount units is not an unsigned integer"
                ));
            }
        }

        if let Err(e) = validate_address(&rule.hot_addr) {
            errors.push(format!("rules.{id}.hot_addr: {e}"));
        }
        if let Err(e) = validate_address(&rule.cold_addr) {
            errors.push(format!("rules.{id}.cold_addr: {e}"));
        }
        if rule.hot_addr.eq_ignore_ascii_case(&rule.cold_addr) {
            errors.push(format!("rules.{id}: hot_addr and cold_addr are identical"));
        }

        // No multisig gateway ships with this build: reject multisig rules
        // outside dry-run so they cannot silently stall at Planned.
        if rule.execution_mode.is_multisig() && rule.enabled && !config.app.dry_run {
            errors.push(format!(
                "rules.{id}: execution_mode {} requires a proposal gateway, none is configured",
                rule.execution_mode.as_str()
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

fn validate_timing(config: &BalancerConfig, errors: &mut Vec<String>) {
    let t = &config.timing;

    if t.adapter_timeout_seconds == 0 {
        errors.push("timing: adapter_timeout_seconds must be > 0".into());
    }
    if t.fanout_deadline_seconds < t.adapter_timeout_seconds {
        errors.push(format!(
            "timing: fanout_deadline_seconds ({}) must be >= adapter_timeout_seconds ({})",
            t.fanout_deadline_seconds, t.adapter_timeout_seconds
        ));
    }
    if t.aggregation_interval_seconds == 0 {
        errors.push("timing: aggregation_interval_seconds must be > 0".into());
    }
    if t.retry.max_attempts == 0 {
        errors.push("timing.retry: max_attempts must be >= 1".into());
    }
    if t.retry.base_delay_seconds > t.retry.max_delay_seconds {
        errors.push(format!(
            "timing.retry: base_delay_seconds ({}) must be <= max_delay_seconds ({})",
            t.retry.base_delay_seconds, t.retry.max_delay_seconds
        ));
    }
}

// ---------------------------------------------------------------------------
// Live mode
// ---------------------------------------------------------------------------

fn validate_live_mode(config: &BalancerConfig, errors: &mut Vec<String>) {
    if config.app.dry_run {
        return;
    }

    let has_key = std::env::var("SIGNER_PRIVATE_KEY")
        .map(|v| !v.is_empty())
        .unwrap_or(false);
    if !has_key {
        errors.push("live mode: SIGNER_PRIVATE_KEY must be set when dry_run is false".into());
    }
}

/// An address must be `0x` followed by exactly 40 hex characters.
fn validate_address(addr: &str) -> Result<(), String> {
    let hex_part = addr
        .strip_prefix("0x")
        .ok_or_else(|| format!("address {addr} missing 0x prefix"))?;
    if hex_part.len() != 40 {
        return Err(format!("address {addr} has wrong length"));
    }
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("address {addr} has non-hex characters"));
    }
    Ok(())
}
