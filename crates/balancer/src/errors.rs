use thiserror::Error;

/// Typed error hierarchy for the treasury balancer.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation. Recoverable conditions (adapter misses,
/// validation rejects, divergence) are not errors — they are absorbed where
/// they arise and surface only as log events.
#[derive(Error, Debug)]
pub enum BalancerError {
    // -- Aggregation --------------------------------------------------------
    /// No valid quotes this run and the Last-Good store has no row to freeze.
    #[error("no price available for {token}: zero valid quotes and no last-good")]
    NoPriceAvailable { token: String },

    // -- Configuration ------------------------------------------------------
    #[error("missing token config: {token}")]
    ConfigMissing { token: String },

    #[error("configuration error: {0}")]
    Config(String),

    // -- Execution ----------------------------------------------------------
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Status update raced or attempted a backward edge on the intent graph.
    #[error("illegal intent transition for {idem_key}: {from} -> {to}")]
    IllegalTransition {
        idem_key: String,
        from: String,
        to: String,
    },

    #[error("no proposal gateway configured for multisig rule {rule_id}")]
    ProposalGatewayMissing { rule_id: String },

    #[error("safety gate blocked: {reason}")]
    SafetyBlocked { reason: String },

    #[error("proposal submission failed: {reason}")]
    ProposalFailed { reason: String },

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Chain interaction failures, split by retryability.
///
/// The execution engine retries `Transient` with capped exponential backoff
/// inside the same intent; `Terminal` marks the intent `MinedFailed` with the
/// cause recorded. Classification happens in the chain client, closest to the
/// raw provider error.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("transient chain error: {0}")]
    Transient(String),

    #[error("terminal chain error: {0}")]
    Terminal(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}
