use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::providers::RootProvider;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use treasury_balancer::chain::client::{ChainClient, EvmChainClient};
use treasury_balancer::config;
use treasury_balancer::engine::executor::{ExecutionEngine, RetryPolicy};
use treasury_balancer::engine::safety::SafetyGate;
use treasury_balancer::engine::workers::{
    spawn_aggregation_task, spawn_dispatcher, PriceEvent, RuleWorker,
};
use treasury_balancer::logging;
use treasury_balancer::oracle::aggregator::Aggregator;
use treasury_balancer::oracle::chainlink::ChainlinkSource;
use treasury_balancer::oracle::pyth::PythSource;
use treasury_balancer::oracle::twap::TwapSource;
use treasury_balancer::oracle::PriceSource;
use treasury_balancer::store;
use treasury_balancer::store::config_repo::ConfigRepo;
use treasury_balancer::store::intents::IntentStore;
use treasury_balancer::store::last_good::LastGoodStore;
use treasury_balancer::types::ConsolidatedPrice;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    // Determine config directory — default to `./config`.
    let config_dir = std::env::var("TREASURY_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    // Load and validate configuration.
    let config = config::load_config(&config_dir)?;

    // Initialize tracing — hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        chain = %config.chain.chain_name,
        chain_id = config.chain.chain_id,
        dry_run = config.app.dry_run,
        tokens = config.tokens.tokens.len(),
        rules = config.rules.rules.len(),
        "treasury balancer starting"
    );

    // -----------------------------------------------------------------------
    // Signer and provider
    // -----------------------------------------------------------------------

    let signer = init_signer(config.app.dry_run)?;
    info!(signer = %signer.address(), "signer initialized");

    let rpc_url: Url = config
        .chain
        .rpc
        .http_url
        .parse()
        .context("failed to parse RPC URL")?;
    let provider = RootProvider::new_http(rpc_url);

    // -----------------------------------------------------------------------
    // Stores
    // -----------------------------------------------------------------------

    if let Some(parent) = std::path::Path::new(&config.app.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("failed to create data directory")?;
        }
    }
    let pool = store::connect(&config.app.db_path).await?;
    let last_good = Arc::new(LastGoodStore::new(pool.clone()));
    let intents = Arc::new(IntentStore::new(pool));

    let repo = Arc::new(ConfigRepo::from_config(&config).context("materializing config")?);

    // -----------------------------------------------------------------------
    // Component construction
    // -----------------------------------------------------------------------

    let adapter_timeout = Duration::from_secs(config.timing.adapter_timeout_seconds);
    let sources: Vec<Arc<dyn PriceSource>> = vec![
        Arc::new(ChainlinkSource::new(provider.clone(), adapter_timeout)),
        Arc::new(PythSource::new(
            config.chain.pyth.hermes_url.clone(),
            adapter_timeout,
        )),
        Arc::new(TwapSource::new(provider.clone(), adapter_timeout)),
    ];

    let aggregator = Arc::new(Aggregator::new(
        sources,
        repo.clone(),
        last_good.clone(),
        Duration::from_secs(config.timing.fanout_deadline_seconds),
    ));

    let chain_client: Arc<dyn ChainClient> = Arc::new(EvmChainClient::new(
        provider,
        signer,
        config.chain.chain_id,
    ));

    let retry = RetryPolicy {
        max_attempts: config.timing.retry.max_attempts,
        base_delay: Duration::from_secs(config.timing.retry.base_delay_seconds),
        max_delay: Duration::from_secs(config.timing.retry.max_delay_seconds),
    };
    let engine = Arc::new(ExecutionEngine::new(
        intents.clone(),
        chain_client.clone(),
        None, // no multisig proposal gateway ships with this build
        retry,
        Duration::from_secs(config.timing.receipt_timeout_seconds),
    ));

    let safety = Arc::new(SafetyGate::new(
        config.app.dry_run,
        config.app.safety.max_transfers_per_24h,
    ));

    info!("all components initialized");

    // -----------------------------------------------------------------------
    // Runtime tasks
    // -----------------------------------------------------------------------

    let shutdown = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel::<PriceEvent>(64);

    // One worker per enabled rule; each owns a serial price channel.
    let mut routes: HashMap<String, Vec<mpsc::Sender<ConsolidatedPrice>>> = HashMap::new();
    let mut worker_handles = Vec::new();

    for rule in repo.all_rules() {
        if !rule.enabled || rule.chain_id != config.chain.chain_id {
            continue;
        }
        let (price_tx, price_rx) = mpsc::channel::<ConsolidatedPrice>(8);
        routes.entry(rule.token_id.clone()).or_default().push(price_tx);

        let worker = RuleWorker::new(
            rule.clone(),
            engine.clone(),
            intents.clone(),
            chain_client.clone(),
            safety.clone(),
            price_rx,
            shutdown.clone(),
        );
        worker_handles.push(tokio::spawn(worker.run()));
    }

    let dispatcher_handle = spawn_dispatcher(event_rx, routes, shutdown.clone());

    // One aggregation task per configured token on this chain.
    let interval = Duration::from_secs(config.timing.aggregation_interval_seconds);
    let mut aggregation_handles = Vec::new();
    for token_id in repo.token_ids() {
        let cfg = repo
            .get_token_cfg(token_id)
            .expect("token id came from the repo");
        if cfg.chain_id != config.chain.chain_id {
            continue;
        }
        aggregation_handles.push(spawn_aggregation_task(
            aggregator.clone(),
            token_id.to_string(),
            interval,
            event_tx.clone(),
            shutdown.clone(),
        ));
    }
    drop(event_tx);

    info!(
        aggregation_tasks = aggregation_handles.len(),
        rule_workers = worker_handles.len(),
        "all tasks running — press Ctrl+C to shutdown"
    );

    // -----------------------------------------------------------------------
    // Wait for shutdown signal
    // -----------------------------------------------------------------------

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutdown signal received, stopping gracefully...");
    shutdown.cancel();

    for handle in aggregation_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "aggregation task panicked");
        }
    }
    if let Err(e) = dispatcher_handle.await {
        error!(error = %e, "dispatcher task panicked");
    }
    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "rule worker panicked");
        }
    }

    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Initialization helpers
// ---------------------------------------------------------------------------

/// Initialize the transaction signer from `SIGNER_PRIVATE_KEY`.
///
/// In dry-run mode a random ephemeral signer is generated when the key is
/// absent; live mode requires it (enforced by config validation as well).
fn init_signer(dry_run: bool) -> Result<PrivateKeySigner> {
    match std::env::var("SIGNER_PRIVATE_KEY")
        .ok()
        .filter(|v| !v.is_empty())
    {
        Some(key) => {
            let key = key.strip_prefix("0x").unwrap_or(&key);
            key.parse::<PrivateKeySigner>()
                .context("failed to parse SIGNER_PRIVATE_KEY")
        }
        None => {
            if !dry_run {
                anyhow::bail!("SIGNER_PRIVATE_KEY is required in live mode");
            }
            info!("no private key set — generating ephemeral signer (dry run)");
            Ok(PrivateKeySigner::random())
        }
    }
}
