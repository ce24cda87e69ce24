use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

use crate::types::{Direction, ExecutionMode, SourceKind};

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    pub app: AppConfig,
    pub chain: ChainConfig,
    pub tokens: TokensConfig,
    pub rules: RulesConfig,
    pub timing: TimingConfig,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Evaluate and log signals without planning or broadcasting anything.
    pub dry_run: bool,
    /// SQLite database path for the last-good and intent stores.
    pub db_path: String,
    pub logging: LoggingConfig,
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    /// Crate-level log verbosity when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    /// Rolling 24 h cap on executed transfers across all rules.
    pub max_transfers_per_24h: u32,
}

// ---------------------------------------------------------------------------
// chain.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub chain_name: String,
    pub rpc: RpcConfig,
    pub pyth: PythConfig,
    /// ERC-20 contract addresses and native decimals per token symbol.
    pub tokens: HashMap<String, TokenContractConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub http_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PythConfig {
    /// Hermes price-service base URL.
    pub hermes_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenContractConfig {
    pub address: String,
    pub decimals: u8,
}

// ---------------------------------------------------------------------------
// tokens.json — per-token aggregation parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub token_id: String,
    pub chain_id: u64,
    /// Per-source freshness budget, seconds. A source with no entry here is
    /// not consulted for this token.
    pub ttl_by_source: HashMap<SourceKind, u64>,
    /// Confidence/price ratio ceiling in [0, 1], materialized as ppm.
    #[serde(with = "rust_decimal::serde::str")]
    pub epsilon: Decimal,
    /// Divergence alert threshold, basis points. Advisory only.
    pub delta_bps: u64,
    /// Minimum TWAP observation window, seconds.
    pub twap_window_sec: u32,
    /// Minimum harmonic-mean liquidity, raw integer.
    pub min_liquidity: String,
    /// TWAP pools in preference order; also the allowed set.
    #[serde(default)]
    pub pools: Vec<PoolEntry>,
    /// Chainlink-style feed contract, when the token has one.
    pub chainlink_feed: Option<String>,
    /// Pyth price-feed id (hex), when the token has one.
    pub pyth_feed_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolEntry {
    pub address: String,
    /// Whether the priced token is the pool's token0.
    pub base_is_token0: bool,
    pub base_decimals: u8,
    pub quote_decimals: u8,
}

// ---------------------------------------------------------------------------
// rules.json — balancer triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    pub rules: Vec<RuleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    pub rule_id: String,
    pub token_id: String,
    pub chain_id: u64,
    /// Decimal USD price level; materialized at 18 decimals.
    #[serde(with = "rust_decimal::serde::str")]
    pub threshold_usd: Decimal,
    pub direction: Direction,
    pub amount: AmountEntry,
    pub hot_addr: String,
    pub cold_addr: String,
    pub execution_mode: ExecutionMode,
    pub hysteresis_bps: u32,
    pub cooldown_sec: u64,
    pub enabled: bool,
}

/// Raw amount spec; `units` is a decimal string so large values survive JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AmountEntry {
    Absolute { units: String },
    Percent { bps: u32 },
}

// ---------------------------------------------------------------------------
// timing.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Per-adapter network deadline.
    pub adapter_timeout_seconds: u64,
    /// Wall-clock deadline for a whole aggregation fan-out.
    pub fanout_deadline_seconds: u64,
    /// How often each token re-consolidates.
    pub aggregation_interval_seconds: u64,
    /// Upper bound on one receipt wait.
    pub receipt_timeout_seconds: u64,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
}
