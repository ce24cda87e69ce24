//! Read-mostly registry of token aggregation configs and balancer rules.
//!
//! Built once at startup from the raw JSON config; human-entered rationals
//! (`epsilon`, `threshold_usd`) are materialized as scaled integers here, at
//! the edge, so no decimal arithmetic leaks into the engines.

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AmountEntry, BalancerConfig, RuleEntry, TokenEntry};
use crate::constants::CANONICAL_DECIMALS;
use crate::errors::BalancerError;
use crate::types::scaled::{decimal_to_scaled, ratio_to_ppm_floor};
use crate::types::{AmountSpec, Direction, ExecutionMode, SourceKind};

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// One TWAP pool a token may be priced from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwapPoolCfg {
    pub address: Address,
    /// Whether the priced token is the pool's token0.
    pub base_is_token0: bool,
    pub base_decimals: u8,
    pub quote_decimals: u8,
}

/// Per-token aggregation parameters, integer-materialized.
#[derive(Debug, Clone)]
pub struct TokenCfg {
    pub token_id: String,
    pub chain_id: u64,
    pub token_address: Address,
    pub token_decimals: u8,
    /// Per-source freshness budget, seconds. Absence means the source is not
    /// consulted for this token.
    pub ttl_by_source: HashMap<SourceKind, u64>,
    /// `floor(epsilon * 10^6)` — confidence/price ceiling in ppm.
    pub epsilon_ppm: u64,
    /// Divergence alert threshold, basis points. Advisory.
    pub delta_bps: u64,
    pub twap_window_sec: u32,
    pub min_liquidity: U256,
    /// Preference order; also the allowed set for the TWAP gate.
    pub allowed_pools: Vec<TwapPoolCfg>,
    pub chainlink_feed: Option<Address>,
    pub pyth_feed_id: Option<String>,
}

impl TokenCfg {
    pub fn ttl_for(&self, source: SourceKind) -> Option<u64> {
        self.ttl_by_source.get(&source).copied()
    }

    pub fn is_pool_allowed(&self, pool: Address) -> bool {
        self.allowed_pools.iter().any(|p| p.address == pool)
    }
}

/// One balancer trigger, integer-materialized.
#[derive(Debug, Clone)]
pub struct Rule {
    pub rule_id: String,
    pub token_id: String,
    pub chain_id: u64,
    /// The ERC-20 contract this rule moves, resolved from the chain config.
    pub token_address: Address,
    /// `threshold_usd * 10^18`.
    pub threshold_e18: U256,
    pub direction: Direction,
    pub amount: AmountSpec,
    pub hot_addr: Address,
    pub cold_addr: Address,
    pub execution_mode: ExecutionMode,
    pub hysteresis_bps: u32,
    pub cooldown_sec: u64,
    pub enabled: bool,
}

impl Rule {
    /// Wallet funds leave, for this rule's direction.
    pub fn source_addr(&self) -> Address {
        match self.direction {
            Direction::HotToCold => self.hot_addr,
            Direction::ColdToHot => self.cold_addr,
        }
    }

    /// Wallet funds arrive at.
    pub fn dest_addr(&self) -> Address {
        match self.direction {
            Direction::HotToCold => self.cold_addr,
            Direction::ColdToHot => self.hot_addr,
        }
    }

    /// `threshold * hysteresis_bps / 10_000`, the hysteresis band in 1e18.
    pub fn hysteresis_e18(&self) -> U256 {
        self.threshold_e18 * U256::from(self.hysteresis_bps) / U256::from(10_000u64)
    }
}

// ---------------------------------------------------------------------------
// Repo
// ---------------------------------------------------------------------------

/// Immutable registry handed to the engines at startup.
pub struct ConfigRepo {
    tokens: HashMap<String, Arc<TokenCfg>>,
    rules: Vec<Rule>,
}

impl ConfigRepo {
    /// Materialize the raw config. Assumes [`crate::config::validate`] has
    /// already passed; residual parse failures still error rather than panic.
    pub fn from_config(config: &BalancerConfig) -> Result<Self> {
        let mut tokens = HashMap::with_capacity(config.tokens.tokens.len());
        for entry in &config.tokens.tokens {
            let cfg = materialize_token(config, entry)
                .with_context(|| format!("materializing token {}", entry.token_id))?;
            tokens.insert(cfg.token_id.clone(), Arc::new(cfg));
        }

        let mut rules = Vec::with_capacity(config.rules.rules.len());
        for entry in &config.rules.rules {
            let rule = materialize_rule(config, entry)
                .with_context(|| format!("materializing rule {}", entry.rule_id))?;
            rules.push(rule);
        }

        Ok(Self { tokens, rules })
    }

    pub fn get_token_cfg(&self, token_id: &str) -> Result<Arc<TokenCfg>, BalancerError> {
        self.tokens
            .get(token_id)
            .cloned()
            .ok_or_else(|| BalancerError::ConfigMissing {
                token: token_id.to_string(),
            })
    }

    pub fn token_ids(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    /// Enabled rules for one token on one chain.
    pub fn get_enabled_rules(&self, token_id: &str, chain_id: u64) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.enabled && r.token_id == token_id && r.chain_id == chain_id)
            .collect()
    }

    pub fn all_rules(&self) -> &[Rule] {
        &self.rules
    }
}

fn materialize_token(config: &BalancerConfig, entry: &TokenEntry) -> Result<TokenCfg> {
    let contract = config
        .chain
        .tokens
        .get(&entry.token_id)
        .with_context(|| format!("no chain.tokens entry for {}", entry.token_id))?;

    let allowed_pools = entry
        .pools
        .iter()
        .map(|p| {
            Ok(TwapPoolCfg {
                address: p.address.parse().context("pool address")?,
                base_is_token0: p.base_is_token0,
                base_decimals: p.base_decimals,
                quote_decimals: p.quote_decimals,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let chainlink_feed = entry
        .chainlink_feed
        .as_deref()
        .map(|a| a.parse().context("chainlink feed address"))
        .transpose()?;

    Ok(TokenCfg {
        token_id: entry.token_id.clone(),
        chain_id: entry.chain_id,
        token_address: contract.address.parse().context("token address")?,
        token_decimals: contract.decimals,
        ttl_by_source: entry.ttl_by_source.clone(),
        epsilon_ppm: ratio_to_ppm_floor(&entry.epsilon),
        delta_bps: entry.delta_bps,
        twap_window_sec: entry.twap_window_sec,
        min_liquidity: U256::from_str_radix(&entry.min_liquidity, 10)
            .context("min_liquidity")?,
        allowed_pools,
        chainlink_feed,
        pyth_feed_id: entry.pyth_feed_id.clone(),
    })
}

fn materialize_rule(config: &BalancerConfig, entry: &RuleEntry) -> Result<Rule> {
    let contract = config
        .chain
        .tokens
        .get(&entry.token_id)
        .with_context(|| format!("no chain.tokens entry for {}", entry.token_id))?;

    let amount = match &entry.amount {
        AmountEntry::Absolute { units } => AmountSpec::Absolute {
            units: U256::from_str_radix(units, 10).context("absolute amount units")?,
        },
        AmountEntry::Percent { bps } => AmountSpec::Percent { bps: *bps },
    };

    Ok(Rule {
        rule_id: entry.rule_id.clone(),
        token_id: entry.token_id.clone(),
        chain_id: entry.chain_id,
        token_address: contract.address.parse().context("token address")?,
        threshold_e18: decimal_to_scaled(&entry.threshold_usd, CANONICAL_DECIMALS)
            .map_err(anyhow::Error::msg)
            .context("threshold_usd")?,
        direction: entry.direction,
        amount,
        hot_addr: entry.hot_addr.parse().context("hot_addr")?,
        cold_addr: entry.cold_addr.parse().context("cold_addr")?,
        execution_mode: entry.execution_mode,
        hysteresis_bps: entry.hysteresis_bps,
        cooldown_sec: entry.cooldown_sec,
        enabled: entry.enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, test_fixtures::write_test_configs};
    use crate::constants::WAD;
    use serial_test::serial;

    fn repo_from_fixtures() -> ConfigRepo {
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let config = load_config(tmp.path()).unwrap();
        ConfigRepo::from_config(&config).unwrap()
    }

    #[test]
    #[serial]
    fn materializes_epsilon_and_threshold() {
        let repo = repo_from_fixtures();

        let cfg = repo.get_token_cfg("WETH").unwrap();
        assert_eq!(cfg.epsilon_ppm, 10_000); // 0.01 -> 1e4 ppm
        assert_eq!(cfg.token_decimals, 18);
        assert_eq!(cfg.allowed_pools.len(), 1);

        let rules = repo.get_enabled_rules("WETH", 1);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].threshold_e18, U256::from(2_000u64) * WAD);
    }

    #[test]
    #[serial]
    fn missing_token_is_config_missing() {
        let repo = repo_from_fixtures();
        let err = repo.get_token_cfg("DOGE").unwrap_err();
        assert!(matches!(err, BalancerError::ConfigMissing { .. }));
    }

    #[test]
    #[serial]
    fn enabled_rules_filters_chain_and_flag() {
        let repo = repo_from_fixtures();
        assert!(repo.get_enabled_rules("WETH", 99).is_empty());
        assert!(repo.get_enabled_rules("WBTC", 1).is_empty());
    }

    #[test]
    #[serial]
    fn rule_wallet_orientation() {
        let repo = repo_from_fixtures();
        let rule = &repo.get_enabled_rules("WETH", 1)[0];
        // hot_to_cold: funds leave the hot wallet.
        assert_eq!(rule.source_addr(), rule.hot_addr);
        assert_eq!(rule.dest_addr(), rule.cold_addr);
    }

    #[test]
    #[serial]
    fn hysteresis_band() {
        let repo = repo_from_fixtures();
        let rule = &repo.get_enabled_rules("WETH", 1)[0];
        // $2000 * 100 bps = $20
        assert_eq!(rule.hysteresis_e18(), U256::from(20u64) * WAD);
    }
}
