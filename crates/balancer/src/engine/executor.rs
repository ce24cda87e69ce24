//! Execution engine: one committed transfer (or an explicit failure record)
//! per signal, durably, across restarts.
//!
//! The flow is always: derive the idempotency key, insert-or-attach the
//! intent, then drive the row forward along the state machine. Every durable
//! transition is committed before the external effect it describes is
//! awaited — the transaction hash is persisted before the receipt wait, the
//! nonce before the broadcast — so a crash at any point leaves a row the
//! next pass can pick up without double-spending.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::client::{ChainClient, ReceiptStatus, TransferTx};
use crate::errors::{BalancerError, ChainError};
use crate::store::config_repo::Rule;
use crate::store::intents::{InsertOutcome, IntentStore};
use crate::types::{ExecutionMode, IntentStatus, TransferIntent, TransferSignal};

/// Capped exponential backoff for transient broadcast failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }
}

/// Out-of-band multisig proposal submission. No concrete service client
/// ships with this crate; the engine only records the returned handle.
#[async_trait]
pub trait ProposalGateway: Send + Sync {
    async fn submit_proposal(&self, intent: &TransferIntent) -> Result<String, ChainError>;
}

pub struct ExecutionEngine {
    intents: Arc<IntentStore>,
    chain: Arc<dyn ChainClient>,
    proposals: Option<Arc<dyn ProposalGateway>>,
    retry: RetryPolicy,
    receipt_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        intents: Arc<IntentStore>,
        chain: Arc<dyn ChainClient>,
        proposals: Option<Arc<dyn ProposalGateway>>,
        retry: RetryPolicy,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            intents,
            chain,
            proposals,
            retry,
            receipt_timeout,
        }
    }

    /// Turn a signal into exactly one durable intent and drive it as far as
    /// the chain allows. Re-invoking with the same signal re-attaches to the
    /// existing intent and continues from wherever it stopped.
    pub async fn execute(
        &self,
        rule: &Rule,
        signal: &TransferSignal,
        cancel: &CancellationToken,
    ) -> Result<TransferIntent, BalancerError> {
        let idem_key = signal.idem_key(rule.cooldown_sec);

        let intent = TransferIntent {
            idem_key: idem_key.clone(),
            rule_id: rule.rule_id.clone(),
            price_at_fire: signal.price_at_fire,
            decimals_at_fire: signal.decimals_at_fire,
            fired_at: signal.fired_at,
            amount_units: signal.amount_units,
            from: rule.source_addr(),
            to: rule.dest_addr(),
            mode: rule.execution_mode,
            status: IntentStatus::Planned,
            tx_hash: None,
            proposal_hash: None,
            nonce: None,
            failure_cause: None,
        };

        let current = match self.intents.insert_planned(&intent).await? {
            InsertOutcome::Inserted(i) => i,
            InsertOutcome::Attached(existing) => {
                info!(
                    idem_key = %idem_key,
                    status = %existing.status,
                    "signal re-fired, reconciling existing intent"
                );
                existing
            }
        };

        self.drive(rule, current, cancel).await
    }

    /// Resume the rule's in-flight intent, if any. Called by the rule worker
    /// on startup and before each new signal, so at most one non-terminal
    /// intent per rule is ever being worked.
    pub async fn reconcile_rule(
        &self,
        rule: &Rule,
        cancel: &CancellationToken,
    ) -> Result<Option<TransferIntent>, BalancerError> {
        match self.intents.find_in_flight_for_rule(&rule.rule_id).await? {
            Some(intent) => {
                debug!(
                    rule_id = %rule.rule_id,
                    idem_key = %intent.idem_key,
                    status = %intent.status,
                    "reconciling in-flight intent"
                );
                self.drive(rule, intent, cancel).await.map(Some)
            }
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // State machine drive
    // -----------------------------------------------------------------------

    /// Advance one intent until it parks (Proposed, or Submitted past the
    /// receipt budget) or reaches a terminal state.
    async fn drive(
        &self,
        rule: &Rule,
        mut intent: TransferIntent,
        cancel: &CancellationToken,
    ) -> Result<TransferIntent, BalancerError> {
        loop {
            if cancel.is_cancelled() {
                // Every committed transition is already durable; resuming
                // later continues from this exact point.
                return Ok(intent);
            }

            match intent.status {
                IntentStatus::Planned => match intent.mode {
                    ExecutionMode::DirectKey => {
                        self.submit_direct(rule, &mut intent, cancel).await?;
                    }
                    ExecutionMode::MultisigPropose | ExecutionMode::MultisigExecute => {
                        self.submit_proposal(&mut intent).await?;
                        // Out-of-band from here; an external poller observes
                        // execution and advances Proposed -> Submitted.
                        return Ok(intent);
                    }
                },
                IntentStatus::Proposed => return Ok(intent),
                IntentStatus::Submitted => {
                    self.await_mining(&mut intent).await?;
                    if intent.status == IntentStatus::Submitted {
                        // Receipt budget exhausted; park and reconcile later.
                        return Ok(intent);
                    }
                }
                IntentStatus::MinedSuccess | IntentStatus::MinedFailed => return Ok(intent),
            }
        }
    }

    /// Planned -> Submitted for direct-key intents, with crash recovery and
    /// transient-failure retry.
    async fn submit_direct(
        &self,
        rule: &Rule,
        intent: &mut TransferIntent,
        cancel: &CancellationToken,
    ) -> Result<(), BalancerError> {
        let signer = self.chain.signer_address();
        if intent.from != signer {
            // A direct-key rule whose source wallet is not the held signer
            // can never broadcast; this is a configuration defect.
            let cause = format!(
                "signer {signer} does not control source wallet {}",
                intent.from
            );
            self.intents
                .mark_terminal(
                    &intent.idem_key,
                    IntentStatus::Planned,
                    IntentStatus::MinedFailed,
                    Some(&cause),
                )
                .await?;
            intent.status = IntentStatus::MinedFailed;
            intent.failure_cause = Some(cause);
            return Ok(());
        }

        // Crash recovery: a recorded nonce means a broadcast may have gone
        // out before the tx-hash write. Ask the chain before sending again.
        if let Some(nonce) = intent.nonce {
            match self.chain.find_sender_tx(signer, nonce).await {
                Ok(Some(tx_hash)) => {
                    info!(
                        idem_key = %intent.idem_key,
                        nonce,
                        tx_hash = %tx_hash,
                        "recovered in-flight broadcast, attaching"
                    );
                    let hash_str = tx_hash.to_string();
                    self.intents
                        .mark_submitted(&intent.idem_key, IntentStatus::Planned, &hash_str)
                        .await?;
                    intent.status = IntentStatus::Submitted;
                    intent.tx_hash = Some(hash_str);
                    return Ok(());
                }
                Ok(None) => {
                    // The nonce never landed: re-broadcasting at the same
                    // nonce is safe — the chain will mine at most one of them.
                    debug!(idem_key = %intent.idem_key, nonce, "no prior broadcast found, re-sending");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Reserve (or reuse) the nonce and persist it before broadcasting.
        let nonce = match intent.nonce {
            Some(n) => n,
            None => {
                let n = self.chain.reserve_nonce().await?;
                self.intents.record_nonce(&intent.idem_key, n).await?;
                intent.nonce = Some(n);
                n
            }
        };

        let mut transfer = TransferTx {
            token: rule.token_address,
            to: intent.to,
            amount: intent.amount_units,
            nonce,
        };

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.chain.broadcast_transfer(&transfer).await {
                Ok(tx_hash) => {
                    let hash_str = tx_hash.to_string();
                    // Persist before awaiting the receipt.
                    self.intents
                        .mark_submitted(&intent.idem_key, IntentStatus::Planned, &hash_str)
                        .await?;
                    intent.status = IntentStatus::Submitted;
                    intent.tx_hash = Some(hash_str);
                    return Ok(());
                }
                Err(ChainError::Transient(reason)) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        // Give up for this pass; the intent stays Planned and
                        // the next reconcile retries from the recorded nonce.
                        warn!(
                            idem_key = %intent.idem_key,
                            attempts = attempt,
                            reason,
                            "broadcast retries exhausted, leaving intent planned"
                        );
                        return Err(ChainError::Transient(reason).into());
                    }
                    let delay = self.retry.delay(attempt - 1);
                    warn!(
                        idem_key = %intent.idem_key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason,
                        "transient broadcast failure, backing off"
                    );
                    if reason.to_lowercase().contains("nonce") {
                        // A nonce rejection can mean our own earlier send at
                        // this nonce already landed; check before racing past
                        // it with a new one.
                        if let Some(tx_hash) =
                            self.chain.find_sender_tx(signer, transfer.nonce).await?
                        {
                            let hash_str = tx_hash.to_string();
                            self.intents
                                .mark_submitted(&intent.idem_key, IntentStatus::Planned, &hash_str)
                                .await?;
                            intent.status = IntentStatus::Submitted;
                            intent.tx_hash = Some(hash_str);
                            return Ok(());
                        }
                        // Someone else consumed the slot: re-sync and retry
                        // on a fresh nonce, keeping the intent's record
                        // current.
                        self.chain.recover_nonce().await?;
                        let fresh = self.chain.reserve_nonce().await?;
                        self.intents.record_nonce(&intent.idem_key, fresh).await?;
                        intent.nonce = Some(fresh);
                        transfer.nonce = fresh;
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(ChainError::Terminal(reason)) => {
                    warn!(
                        idem_key = %intent.idem_key,
                        reason,
                        "terminal broadcast failure, marking intent failed"
                    );
                    self.intents
                        .mark_terminal(
                            &intent.idem_key,
                            IntentStatus::Planned,
                            IntentStatus::MinedFailed,
                            Some(&reason),
                        )
                        .await?;
                    intent.status = IntentStatus::MinedFailed;
                    intent.failure_cause = Some(reason);
                    return Ok(());
                }
            }
        }
    }

    /// Planned -> Proposed through the configured gateway.
    async fn submit_proposal(&self, intent: &mut TransferIntent) -> Result<(), BalancerError> {
        let Some(gateway) = &self.proposals else {
            return Err(BalancerError::ProposalGatewayMissing {
                rule_id: intent.rule_id.clone(),
            });
        };

        let handle = gateway
            .submit_proposal(intent)
            .await
            .map_err(|e| BalancerError::ProposalFailed {
                reason: e.to_string(),
            })?;

        self.intents.mark_proposed(&intent.idem_key, &handle).await?;
        intent.status = IntentStatus::Proposed;
        intent.proposal_hash = Some(handle);
        Ok(())
    }

    /// Submitted -> MinedSuccess / MinedFailed from the receipt, or park.
    async fn await_mining(&self, intent: &mut TransferIntent) -> Result<(), BalancerError> {
        let tx_hash = intent
            .tx_hash
            .as_deref()
            .and_then(|h| h.parse().ok())
            .ok_or_else(|| {
                BalancerError::Config(format!(
                    "submitted intent {} has no parseable tx hash",
                    intent.idem_key
                ))
            })?;

        match self.chain.await_receipt(tx_hash, self.receipt_timeout).await? {
            ReceiptStatus::Success { block_number } => {
                info!(
                    idem_key = %intent.idem_key,
                    block_number,
                    "transfer mined successfully"
                );
                self.intents
                    .mark_terminal(
                        &intent.idem_key,
                        IntentStatus::Submitted,
                        IntentStatus::MinedSuccess,
                        None,
                    )
                    .await?;
                intent.status = IntentStatus::MinedSuccess;
            }
            ReceiptStatus::Failed { block_number } => {
                let cause = format!("reverted in block {block_number}");
                self.intents
                    .mark_terminal(
                        &intent.idem_key,
                        IntentStatus::Submitted,
                        IntentStatus::MinedFailed,
                        Some(&cause),
                    )
                    .await?;
                intent.status = IntentStatus::MinedFailed;
                intent.failure_cause = Some(cause);
            }
            ReceiptStatus::NotYet => {
                debug!(
                    idem_key = %intent.idem_key,
                    "receipt wait budget exhausted, intent stays submitted"
                );
            }
        }
        Ok(())
    }
}
