//! Quote and consolidated-price value types.
//!
//! A [`Quote`] is one observation from one source and lives for a single
//! aggregation run. A [`ConsolidatedPrice`] is the durable output of a run:
//! always at the canonical 18-decimal scale, always tagged with the mode the
//! aggregator decided on.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::CANONICAL_DECIMALS;

/// Price source tag. Adapters are a set keyed by this tag, not a fixed tuple.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Direct-publisher feed (Chainlink-style aggregator contract).
    Chainlink,
    /// Publisher-aggregated feed with a confidence interval (Pyth-style).
    Pyth,
    /// DEX time-weighted average price (Uniswap-V3-style pool observation).
    UniswapV3Twap,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Chainlink => "chainlink",
            SourceKind::Pyth => "pyth",
            SourceKind::UniswapV3Twap => "uniswap_v3_twap",
        };
        f.write_str(s)
    }
}

/// Source-specific fields carried alongside the price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum QuoteMeta {
    /// Direct feed: round id when the feed exposes one.
    Feed { round_id: Option<u128> },
    /// Publisher-aggregated: confidence interval, same decimals as the price.
    Confidence { confidence: U256 },
    /// DEX TWAP: which pool answered, over what window, with what liquidity.
    Twap {
        pool: Address,
        window_sec: u32,
        /// Harmonic-mean liquidity over the window.
        liquidity: U256,
    },
}

/// One USD price observation from one source.
///
/// `price * 10^-decimals` is the USD value. The source's native `decimals`
/// are preserved here; rescaling to the canonical scale happens only inside
/// the aggregator, after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub source: SourceKind,
    pub price: U256,
    pub decimals: u8,
    /// When the source reports the observation, epoch seconds.
    pub at: i64,
    pub meta: QuoteMeta,
}

impl Quote {
    /// Confidence interval for publisher-aggregated quotes, `None` otherwise.
    pub fn confidence(&self) -> Option<U256> {
        match self.meta {
            QuoteMeta::Confidence { confidence } => Some(confidence),
            _ => None,
        }
    }
}

/// Degradation mode of a consolidation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceMode {
    /// Two or more valid quotes; price is their integer median.
    Normal,
    /// Exactly one valid quote.
    Degraded,
    /// Zero valid quotes; price carried over from the last-good row.
    Frozen,
}

impl PriceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceMode::Normal => "normal",
            PriceMode::Degraded => "degraded",
            PriceMode::Frozen => "frozen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(PriceMode::Normal),
            "degraded" => Some(PriceMode::Degraded),
            "frozen" => Some(PriceMode::Frozen),
            _ => None,
        }
    }
}

impl fmt::Display for PriceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable output of one aggregation run for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedPrice {
    pub token_id: String,
    /// Canonical 18-decimal USD price.
    pub price: U256,
    pub decimals: u8,
    /// Consolidation timestamp (wall clock at the time the run executed),
    /// epoch seconds.
    pub at: i64,
    pub mode: PriceMode,
    /// The validated quotes that contributed, in ascending rescaled-price
    /// order. Empty in Frozen mode.
    pub sources_used: Vec<Quote>,
}

impl ConsolidatedPrice {
    /// A Frozen price carrying forward a previous run's value.
    pub fn frozen_from(token_id: &str, prev: &ConsolidatedPrice, at: i64) -> Self {
        Self {
            token_id: token_id.to_string(),
            price: prev.price,
            decimals: prev.decimals,
            at,
            mode: PriceMode::Frozen,
            sources_used: Vec::new(),
        }
    }

    pub fn is_canonical_scale(&self) -> bool {
        self.decimals == CANONICAL_DECIMALS
    }
}
