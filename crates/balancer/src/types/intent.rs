//! Transfer signals and the durable intent state machine.
//!
//! A [`TransferSignal`] is the pure output of the trigger evaluator. The
//! execution engine turns it into exactly one [`TransferIntent`] row keyed by
//! a deterministic idempotency key — re-planning the same signal derives the
//! same key and re-attaches to the existing row instead of creating a second
//! one. Intents are never deleted; they are the audit trail.

use alloy::primitives::{keccak256, Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way funds move between the hot and cold wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Price is high: move value out of the hot wallet.
    HotToCold,
    /// Price is low: replenish the hot wallet.
    ColdToHot,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::HotToCold => "hot_to_cold",
            Direction::ColdToHot => "cold_to_hot",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Direction::HotToCold => 0,
            Direction::ColdToHot => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule sizes its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AmountSpec {
    /// A fixed number of token units.
    Absolute { units: U256 },
    /// A share of the source wallet balance, in basis points.
    Percent { bps: u32 },
}

/// How a planned transfer reaches the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Broadcast from the process-held signing key.
    DirectKey,
    /// Submit a proposal to an external multisig; an out-of-band flow
    /// executes it.
    MultisigPropose,
    MultisigExecute,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::DirectKey => "direct_key",
            ExecutionMode::MultisigPropose => "multisig_propose",
            ExecutionMode::MultisigExecute => "multisig_execute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct_key" => Some(ExecutionMode::DirectKey),
            "multisig_propose" => Some(ExecutionMode::MultisigPropose),
            "multisig_execute" => Some(ExecutionMode::MultisigExecute),
            _ => None,
        }
    }

    pub fn is_multisig(&self) -> bool {
        !matches!(self, ExecutionMode::DirectKey)
    }
}

/// Lifecycle state of a transfer intent.
///
/// Transitions are forward-only along the edges encoded in
/// [`IntentStatus::can_transition_to`]; the store enforces them with a
/// compare-and-set update, so a raced or replayed transition fails loudly
/// instead of rewinding history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Planned,
    Proposed,
    Submitted,
    MinedSuccess,
    MinedFailed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Planned => "planned",
            IntentStatus::Proposed => "proposed",
            IntentStatus::Submitted => "submitted",
            IntentStatus::MinedSuccess => "mined_success",
            IntentStatus::MinedFailed => "mined_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(IntentStatus::Planned),
            "proposed" => Some(IntentStatus::Proposed),
            "submitted" => Some(IntentStatus::Submitted),
            "mined_success" => Some(IntentStatus::MinedSuccess),
            "mined_failed" => Some(IntentStatus::MinedFailed),
            _ => None,
        }
    }

    /// Terminal states are never left and never retried automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::MinedSuccess | IntentStatus::MinedFailed)
    }

    /// The permitted edges of the state machine.
    pub fn can_transition_to(&self, next: IntentStatus) -> bool {
        use IntentStatus::*;
        matches!(
            (self, next),
            (Planned, Submitted)
                | (Planned, Proposed)
                | (Planned, MinedFailed)
                | (Proposed, Submitted)
                | (Submitted, MinedSuccess)
                | (Submitted, MinedFailed)
        )
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure output of the trigger evaluator: one decided transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSignal {
    pub rule_id: String,
    pub price_at_fire: U256,
    pub decimals_at_fire: u8,
    /// The consolidated price's timestamp, epoch seconds. This is the input
    /// to the idempotency window, so identical re-fires collapse.
    pub fired_at: i64,
    pub amount_units: U256,
    pub direction: Direction,
}

/// Durable record of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub idem_key: String,
    pub rule_id: String,
    pub price_at_fire: U256,
    pub decimals_at_fire: u8,
    pub fired_at: i64,
    pub amount_units: U256,
    pub from: Address,
    pub to: Address,
    pub mode: ExecutionMode,
    pub status: IntentStatus,
    pub tx_hash: Option<String>,
    pub proposal_hash: Option<String>,
    /// Signer nonce reserved for this intent, recorded before broadcast so a
    /// crash between broadcast and the tx-hash write stays recoverable.
    pub nonce: Option<u64>,
    pub failure_cause: Option<String>,
}

// ---------------------------------------------------------------------------
// Idempotency key
// ---------------------------------------------------------------------------

/// Bucket a signal timestamp so near-simultaneous re-fires of the same rule
/// derive colliding keys. The bucket width is the rule's cooldown (at least
/// one second), aligned to the epoch.
pub fn fired_at_window(fired_at: i64, cooldown_sec: u64) -> i64 {
    let bucket = cooldown_sec.max(1) as i64;
    fired_at - fired_at.rem_euclid(bucket)
}

/// Deterministic idempotency key for one rule firing.
///
/// keccak256 over a length-separated encoding of the identifying fields.
/// Re-planning the same signal MUST produce the same key; the Intent store's
/// unique index turns that into at-most-once planning.
pub fn idem_key(
    rule_id: &str,
    fired_at_window: i64,
    amount_units: U256,
    direction: Direction,
) -> String {
    let mut buf = Vec::with_capacity(rule_id.len() + 42);
    buf.extend_from_slice(rule_id.as_bytes());
    buf.push(0); // separator: rule ids cannot collide by concatenation
    buf.extend_from_slice(&fired_at_window.to_be_bytes());
    buf.extend_from_slice(&amount_units.to_be_bytes::<32>());
    buf.push(direction.tag());
    hex::encode(keccak256(&buf))
}

impl TransferSignal {
    /// Derive this signal's idempotency key under the given cooldown.
    pub fn idem_key(&self, cooldown_sec: u64) -> String {
        idem_key(
            &self.rule_id,
            fired_at_window(self.fired_at, cooldown_sec),
            self.amount_units,
            self.direction,
        )
    }
}
