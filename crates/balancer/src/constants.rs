use alloy::primitives::{uint, U256};

// ---------------------------------------------------------------------------
// Numeric Constants
// ---------------------------------------------------------------------------

/// Canonical decimal scale for every persisted consolidated price.
pub const CANONICAL_DECIMALS: u8 = 18;

/// WAD: 1e18 — the canonical fixed-point scale as a U256.
pub const WAD: U256 = uint!(1_000_000_000_000_000_000_U256);

/// Fixed scale for the confidence/price ratio comparison (epsilon in ppm).
pub const EPSILON_SCALE: u64 = 1_000_000;

/// Basis point denominator: 1 bps = 1/10,000.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Seconds in a day, for the rolling transfer rate limit.
pub const SECONDS_PER_DAY: u64 = 86_400;

// ---------------------------------------------------------------------------
// Default timing values
// ---------------------------------------------------------------------------

/// Per-adapter network deadline when timing config is absent.
pub const DEFAULT_ADAPTER_TIMEOUT_SECS: u64 = 5;

/// Whole-fan-out wall-clock deadline for one aggregation run.
pub const DEFAULT_FANOUT_DEADLINE_SECS: u64 = 8;

/// Upper bound on one receipt wait; intents stay Submitted past this and are
/// reconciled by the owning rule worker.
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 90;

/// Broadcast retry backoff bounds (capped exponential).
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 1;
pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 30;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// How many recent blocks the recovery path scans for a sender/nonce match.
pub const NONCE_RECOVERY_LOOKBACK_BLOCKS: u64 = 64;

// ---------------------------------------------------------------------------
// Default safety values
// ---------------------------------------------------------------------------

pub const DEFAULT_DRY_RUN: bool = true;
pub const DEFAULT_MAX_TRANSFERS_PER_24H: u32 = 24;

/// Gas limit for an ERC-20 transfer with headroom.
pub const ERC20_TRANSFER_GAS: u64 = 80_000;
