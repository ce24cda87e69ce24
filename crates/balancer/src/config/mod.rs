pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Load all config JSON files into a single [`BalancerConfig`], apply
/// environment variable overrides, and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   chain.json
///   tokens.json
///   rules.json
///   timing.json
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                  | Config Field            |
/// |--------------------------|-------------------------|
/// | `TREASURY_DRY_RUN`       | `app.dry_run`           |
/// | `TREASURY_DB_PATH`       | `app.db_path`           |
/// | `TREASURY_LOG_DIR`       | `app.logging.log_dir`   |
/// | `RPC_URL_HTTP`           | `chain.rpc.http_url`    |
/// | `PYTH_HERMES_URL`        | `chain.pyth.hermes_url` |
/// | `MAX_TRANSFERS_PER_24H`  | `app.safety.max_transfers_per_24h` |
pub fn load_config(config_dir: &Path) -> Result<BalancerConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig = serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let chain: ChainConfig =
        serde_json::from_str(&read("chain.json")?).context("parsing chain.json")?;

    let tokens: TokensConfig =
        serde_json::from_str(&read("tokens.json")?).context("parsing tokens.json")?;

    let rules: RulesConfig =
        serde_json::from_str(&read("rules.json")?).context("parsing rules.json")?;

    let timing: TimingConfig =
        serde_json::from_str(&read("timing.json")?).context("parsing timing.json")?;

    let mut config = BalancerConfig {
        app,
        chain,
        tokens,
        rules,
        timing,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are skipped and the
/// JSON value remains.
fn apply_env_overrides(config: &mut BalancerConfig) {
    if let Some(val) = env_bool("TREASURY_DRY_RUN") {
        info!(dry_run = val, "env override: TREASURY_DRY_RUN");
        config.app.dry_run = val;
    }

    if let Some(val) = env_string("TREASURY_DB_PATH") {
        info!("env override: TREASURY_DB_PATH");
        config.app.db_path = val;
    }

    if let Some(val) = env_string("TREASURY_LOG_DIR") {
        info!("env override: TREASURY_LOG_DIR");
        config.app.logging.log_dir = val;
    }

    if let Some(val) = env_string("RPC_URL_HTTP") {
        info!("env override: RPC_URL_HTTP");
        config.chain.rpc.http_url = val;
    }

    if let Some(val) = env_string("PYTH_HERMES_URL") {
        info!("env override: PYTH_HERMES_URL");
        config.chain.pyth.hermes_url = val;
    }

    if let Some(val) = env_parse::<u32>("MAX_TRANSFERS_PER_24H") {
        info!(val, "env override: MAX_TRANSFERS_PER_24H");
        config.app.safety.max_transfers_per_24h = val;
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`, `1`, `yes` → true).
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use std::path::Path;

    /// Write a minimal, valid config set into `dir` for loader tests.
    pub fn write_test_configs(dir: &Path) {
        std::fs::write(
            dir.join("app.json"),
            r#"{
                "dry_run": true,
                "db_path": "data/treasury.db",
                "logging": { "log_dir": "logs" },
                "safety": { "max_transfers_per_24h": 24 }
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("chain.json"),
            r#"{
                "chain_id": 1,
                "chain_name": "Ethereum Mainnet",
                "rpc": { "http_url": "https://eth.llamarpc.com" },
                "pyth": { "hermes_url": "https://hermes.pyth.network" },
                "tokens": {
                    "WETH": { "address": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "decimals": 18 }
                }
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("tokens.json"),
            r#"{
                "tokens": [
                    {
                        "token_id": "WETH",
                        "chain_id": 1,
                        "ttl_by_source": { "chainlink": 300, "pyth": 60, "uniswap_v3_twap": 300 },
                        "epsilon": "0.01",
                        "delta_bps": 150,
                        "twap_window_sec": 3600,
                        "min_liquidity": "1000000000000000000000",
                        "pools": [
                            {
                                "address": "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640",
                                "base_is_token0": true,
                                "base_decimals": 18,
                                "quote_decimals": 6
                            }
                        ],
                        "chainlink_feed": "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419",
                        "pyth_feed_id": "0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace"
                    }
                ]
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("rules.json"),
            r#"{
                "rules": [
                    {
                        "rule_id": "weth-skim",
                        "token_id": "WETH",
                        "chain_id": 1,
                        "threshold_usd": "2000",
                        "direction": "hot_to_cold",
                        "amount": { "kind": "percent", "bps": 5000 },
                        "hot_addr": "0x1111111111111111111111111111111111111111",
                        "cold_addr": "0x2222222222222222222222222222222222222222",
                        "execution_mode": "direct_key",
                        "hysteresis_bps": 100,
                        "cooldown_sec": 3600,
                        "enabled": true
                    }
                ]
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("timing.json"),
            r#"{
                "adapter_timeout_seconds": 5,
                "fanout_deadline_seconds": 8,
                "aggregation_interval_seconds": 30,
                "receipt_timeout_seconds": 90,
                "retry": { "max_attempts": 5, "base_delay_seconds": 1, "max_delay_seconds": 30 }
            }"#,
        )
        .unwrap();
    }
}
