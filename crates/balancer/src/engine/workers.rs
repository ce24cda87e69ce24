//! Runtime workers: per-token aggregation loops and per-rule executors.
//!
//! Per-key serialization without global locks: each token has exactly one
//! aggregation task (the only writer of its last-good row), and each rule
//! has exactly one worker consuming its price events in order. Parallelism
//! scales with the number of keys; within a key everything is sequential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::client::ChainClient;
use crate::engine::evaluator::{evaluate, EvalContext, EvalDecision, SkipReason};
use crate::engine::executor::ExecutionEngine;
use crate::engine::safety::SafetyGate;
use crate::errors::BalancerError;
use crate::oracle::aggregator::Aggregator;
use crate::store::config_repo::Rule;
use crate::store::intents::IntentStore;
use crate::types::{ConsolidatedPrice, IntentStatus};

/// One consolidated price flowing from the aggregator to the balancer.
#[derive(Debug, Clone)]
pub struct PriceEvent {
    pub token_id: String,
    pub cp: ConsolidatedPrice,
}

// ---------------------------------------------------------------------------
// Aggregation scheduler
// ---------------------------------------------------------------------------

/// Spawn the periodic consolidation loop for one token. The returned task is
/// the single writer of that token's last-good row.
pub fn spawn_aggregation_task(
    aggregator: Arc<Aggregator>,
    token_id: String,
    interval: Duration,
    event_tx: mpsc::Sender<PriceEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(token = %token_id, interval_s = interval.as_secs(), "aggregation task started");

        loop {
            match aggregator.consolidate(&token_id).await {
                Ok(cp) => {
                    let event = PriceEvent {
                        token_id: token_id.clone(),
                        cp,
                    };
                    if event_tx.send(event).await.is_err() {
                        info!(token = %token_id, "price channel closed, stopping aggregation");
                        return;
                    }
                }
                Err(BalancerError::NoPriceAvailable { .. }) => {
                    // Cold start with every source down: nothing to freeze
                    // yet. Keep trying on the schedule.
                    warn!(token = %token_id, "no price available and no last-good yet");
                }
                Err(e) => {
                    error!(token = %token_id, error = %e, "consolidation failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => {
                    info!(token = %token_id, "aggregation task shutting down");
                    return;
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Price event dispatch
// ---------------------------------------------------------------------------

/// Fan price events out to the per-rule worker channels. Transport between
/// the two engines is in-process; each worker still receives the full
/// consolidated price.
pub fn spawn_dispatcher(
    mut event_rx: mpsc::Receiver<PriceEvent>,
    routes: HashMap<String, Vec<mpsc::Sender<ConsolidatedPrice>>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("price dispatcher shutting down");
                    return;
                }
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        info!("price channel closed, dispatcher stopping");
                        return;
                    };
                    let Some(senders) = routes.get(&event.token_id) else {
                        debug!(token = %event.token_id, "no rules subscribed to token");
                        continue;
                    };
                    for tx in senders {
                        // A lagging rule drops this tick; the next one carries
                        // a fresher price anyway.
                        if let Err(e) = tx.try_send(event.cp.clone()) {
                            debug!(token = %event.token_id, error = %e, "rule channel full, dropping tick");
                        }
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Rule worker
// ---------------------------------------------------------------------------

/// One rule's serial processing loop: reconcile, gate, evaluate, execute.
pub struct RuleWorker {
    rule: Rule,
    engine: Arc<ExecutionEngine>,
    intents: Arc<IntentStore>,
    chain: Arc<dyn ChainClient>,
    safety: Arc<SafetyGate>,
    price_rx: mpsc::Receiver<ConsolidatedPrice>,
    shutdown: CancellationToken,
}

impl RuleWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule: Rule,
        engine: Arc<ExecutionEngine>,
        intents: Arc<IntentStore>,
        chain: Arc<dyn ChainClient>,
        safety: Arc<SafetyGate>,
        price_rx: mpsc::Receiver<ConsolidatedPrice>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rule,
            engine,
            intents,
            chain,
            safety,
            price_rx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(rule_id = %self.rule.rule_id, "rule worker started");

        // Restart recovery: drive any intent left non-terminal by a crash
        // before accepting new signals.
        if let Err(e) = self.engine.reconcile_rule(&self.rule, &self.shutdown).await {
            warn!(rule_id = %self.rule.rule_id, error = %e, "startup reconcile failed");
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(rule_id = %self.rule.rule_id, "rule worker shutting down");
                    return;
                }
                cp = self.price_rx.recv() => {
                    let Some(cp) = cp else {
                        info!(rule_id = %self.rule.rule_id, "price channel closed, worker stopping");
                        return;
                    };
                    if let Err(e) = self.process(cp).await {
                        error!(rule_id = %self.rule.rule_id, error = %e, "signal processing failed");
                    }
                }
            }
        }
    }

    /// Handle one consolidated price for this rule.
    async fn process(&self, cp: ConsolidatedPrice) -> Result<(), BalancerError> {
        // At most one in-flight intent per rule: finish (or park) the
        // previous one before evaluating a new signal.
        if let Some(intent) = self.engine.reconcile_rule(&self.rule, &self.shutdown).await? {
            if !intent.status.is_terminal() {
                debug!(
                    rule_id = %self.rule.rule_id,
                    idem_key = %intent.idem_key,
                    status = %intent.status,
                    "intent still in flight, deferring new signal"
                );
                return Ok(());
            }
        }

        let last_fire_at = self.intents.last_fired_at(&self.rule.rule_id).await?;
        let balance_units = self
            .chain
            .get_balance(self.rule.source_addr(), self.rule.token_address)
            .await?;

        let ctx = EvalContext {
            now: now_unix(),
            balance_units,
            last_fire_at,
        };

        match evaluate(&self.rule, &cp, &ctx) {
            EvalDecision::Fire(signal) => {
                if self.safety.is_dry_run() {
                    info!(
                        rule_id = %self.rule.rule_id,
                        amount = %signal.amount_units,
                        direction = %signal.direction,
                        price = %signal.price_at_fire,
                        "dry run — transfer evaluated but not executed"
                    );
                    return Ok(());
                }

                if let Err(e) = self
                    .safety
                    .can_execute()
                    .and_then(|()| self.safety.record_execution())
                {
                    warn!(rule_id = %self.rule.rule_id, error = %e, "signal blocked by safety gate");
                    return Ok(());
                }
                let intent = self.engine.execute(&self.rule, &signal, &self.shutdown).await?;
                info!(
                    rule_id = %self.rule.rule_id,
                    idem_key = %intent.idem_key,
                    status = %intent.status,
                    "signal executed"
                );
                if intent.status == IntentStatus::MinedFailed {
                    warn!(
                        rule_id = %self.rule.rule_id,
                        cause = intent.failure_cause.as_deref().unwrap_or("unknown"),
                        "transfer failed terminally"
                    );
                }
            }
            EvalDecision::Skip(SkipReason::InsufficientBalance { needed, available }) => {
                warn!(
                    rule_id = %self.rule.rule_id,
                    needed = %needed,
                    available = %available,
                    "signal suppressed: insufficient source balance"
                );
            }
            EvalDecision::Skip(reason) => {
                debug!(rule_id = %self.rule.rule_id, ?reason, "signal suppressed");
            }
        }

        Ok(())
    }
}

/// Current UNIX timestamp in seconds.
fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_secs() as i64
}
