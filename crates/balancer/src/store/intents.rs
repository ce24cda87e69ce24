//! Durable, uniquely-keyed record of every transfer attempt.
//!
//! The `idem_key` primary key is what makes execution at-most-once: planning
//! the same signal twice hits the unique constraint and re-attaches to the
//! existing row. Status updates are compare-and-set against the expected
//! current status, so the state machine can only move forward.

use alloy::primitives::{Address, U256};
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::errors::BalancerError;
use crate::types::{ExecutionMode, IntentStatus, TransferIntent};

/// Result of planning an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was created.
    Inserted(TransferIntent),
    /// The key already existed; this is the surviving row to reconcile.
    Attached(TransferIntent),
}

pub struct IntentStore {
    pool: SqlitePool,
}

impl IntentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a `Planned` intent; on an idem-key conflict, load and return
    /// the existing row instead. A conflict is not an error — it is the
    /// idempotency contract doing its job.
    pub async fn insert_planned(
        &self,
        intent: &TransferIntent,
    ) -> Result<InsertOutcome, BalancerError> {
        debug_assert_eq!(intent.status, IntentStatus::Planned);
        let now = now_unix();

        let result = sqlx::query(
            "INSERT INTO transfer_intents \
             (idem_key, rule_id, price_at_fire, decimals_at_fire, fired_at, amount_units, \
              from_addr, to_addr, mode, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&intent.idem_key)
        .bind(&intent.rule_id)
        .bind(intent.price_at_fire.to_string())
        .bind(intent.decimals_at_fire as i64)
        .bind(intent.fired_at)
        .bind(intent.amount_units.to_string())
        .bind(intent.from.to_string())
        .bind(intent.to.to_string())
        .bind(intent.mode.as_str())
        .bind(IntentStatus::Planned.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(
                    idem_key = %intent.idem_key,
                    rule_id = %intent.rule_id,
                    amount = %intent.amount_units,
                    "intent planned"
                );
                Ok(InsertOutcome::Inserted(intent.clone()))
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let existing = self
                    .find_by_idem_key(&intent.idem_key)
                    .await?
                    .expect("conflicting intent row must exist");
                debug!(
                    idem_key = %intent.idem_key,
                    status = %existing.status,
                    "idem-key conflict, re-attaching to existing intent"
                );
                Ok(InsertOutcome::Attached(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_idem_key(
        &self,
        idem_key: &str,
    ) -> Result<Option<TransferIntent>, BalancerError> {
        let row = sqlx::query("SELECT * FROM transfer_intents WHERE idem_key = ?")
            .bind(idem_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_intent).transpose()
    }

    /// The oldest non-terminal intent for a rule, if any. Per-rule serial
    /// processing means there should be at most one.
    pub async fn find_in_flight_for_rule(
        &self,
        rule_id: &str,
    ) -> Result<Option<TransferIntent>, BalancerError> {
        let row = sqlx::query(
            "SELECT * FROM transfer_intents \
             WHERE rule_id = ? AND status IN ('planned', 'proposed', 'submitted') \
             ORDER BY fired_at ASC LIMIT 1",
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_intent).transpose()
    }

    /// When the rule last fired, for the evaluator's cooldown gate.
    pub async fn last_fired_at(&self, rule_id: &str) -> Result<Option<i64>, BalancerError> {
        let row = sqlx::query(
            "SELECT MAX(fired_at) AS last FROM transfer_intents WHERE rule_id = ?",
        )
        .bind(rule_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("last"))
    }

    /// Record the signer nonce reserved for this intent before broadcasting.
    pub async fn record_nonce(&self, idem_key: &str, nonce: u64) -> Result<(), BalancerError> {
        sqlx::query(
            "UPDATE transfer_intents SET nonce = ?, updated_at = ? WHERE idem_key = ?",
        )
        .bind(nonce as i64)
        .bind(now_unix())
        .bind(idem_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Planned -> Submitted, persisting the tx hash in the same write. This
    /// runs before the receipt wait — a crash after broadcast still leaves a
    /// resumable row.
    pub async fn mark_submitted(
        &self,
        idem_key: &str,
        expected: IntentStatus,
        tx_hash: &str,
    ) -> Result<(), BalancerError> {
        self.transition(
            idem_key,
            expected,
            IntentStatus::Submitted,
            Some(tx_hash),
            None,
            None,
        )
        .await
    }

    /// Planned -> Proposed with the out-of-band proposal handle.
    pub async fn mark_proposed(
        &self,
        idem_key: &str,
        proposal_hash: &str,
    ) -> Result<(), BalancerError> {
        self.transition(
            idem_key,
            IntentStatus::Planned,
            IntentStatus::Proposed,
            None,
            Some(proposal_hash),
            None,
        )
        .await
    }

    /// Move to a terminal status, recording the cause on failure.
    pub async fn mark_terminal(
        &self,
        idem_key: &str,
        expected: IntentStatus,
        terminal: IntentStatus,
        failure_cause: Option<&str>,
    ) -> Result<(), BalancerError> {
        debug_assert!(terminal.is_terminal());
        self.transition(idem_key, expected, terminal, None, None, failure_cause)
            .await
    }

    /// Compare-and-set status update. The WHERE clause carries the expected
    /// current status, so a raced or replayed transition affects zero rows
    /// and surfaces as [`BalancerError::IllegalTransition`].
    async fn transition(
        &self,
        idem_key: &str,
        expected: IntentStatus,
        next: IntentStatus,
        tx_hash: Option<&str>,
        proposal_hash: Option<&str>,
        failure_cause: Option<&str>,
    ) -> Result<(), BalancerError> {
        if !expected.can_transition_to(next) {
            return Err(BalancerError::IllegalTransition {
                idem_key: idem_key.to_string(),
                from: expected.as_str().into(),
                to: next.as_str().into(),
            });
        }

        let result = sqlx::query(
            "UPDATE transfer_intents SET \
                 status = ?, \
                 tx_hash = COALESCE(?, tx_hash), \
                 proposal_hash = COALESCE(?, proposal_hash), \
                 failure_cause = COALESCE(?, failure_cause), \
                 updated_at = ? \
             WHERE idem_key = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(tx_hash)
        .bind(proposal_hash)
        .bind(failure_cause)
        .bind(now_unix())
        .bind(idem_key)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self
                .find_by_idem_key(idem_key)
                .await?
                .map(|i| i.status.as_str().to_string())
                .unwrap_or_else(|| "missing".into());
            return Err(BalancerError::IllegalTransition {
                idem_key: idem_key.to_string(),
                from: current,
                to: next.as_str().into(),
            });
        }

        info!(idem_key, from = %expected, to = %next, "intent transition");
        Ok(())
    }
}

fn row_to_intent(row: sqlx::sqlite::SqliteRow) -> Result<TransferIntent, BalancerError> {
    let parse_u256 = |col: &str| -> Result<U256, BalancerError> {
        let s: String = row.get(col);
        U256::from_str_radix(&s, 10)
            .map_err(|e| BalancerError::Config(format!("corrupt intent {col}: {e}")))
    };
    let parse_addr = |col: &str| -> Result<Address, BalancerError> {
        let s: String = row.get(col);
        s.parse()
            .map_err(|e| BalancerError::Config(format!("corrupt intent {col}: {e}")))
    };

    let status_str: String = row.get("status");
    let status = IntentStatus::parse(&status_str)
        .ok_or_else(|| BalancerError::Config(format!("corrupt intent status: {status_str}")))?;

    let mode_str: String = row.get("mode");
    let mode = ExecutionMode::parse(&mode_str)
        .ok_or_else(|| BalancerError::Config(format!("corrupt intent mode: {mode_str}")))?;

    Ok(TransferIntent {
        idem_key: row.get("idem_key"),
        rule_id: row.get("rule_id"),
        price_at_fire: parse_u256("price_at_fire")?,
        decimals_at_fire: row.get::<i64, _>("decimals_at_fire") as u8,
        fired_at: row.get("fired_at"),
        amount_units: parse_u256("amount_units")?,
        from: parse_addr("from_addr")?,
        to: parse_addr("to_addr")?,
        mode,
        status,
        tx_hash: row.get("tx_hash"),
        proposal_hash: row.get("proposal_hash"),
        nonce: row.get::<Option<i64>, _>("nonce").map(|n| n as u64),
        failure_cause: row.get("failure_cause"),
    })
}

/// Current UNIX timestamp in seconds.
fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_secs() as i64
}
