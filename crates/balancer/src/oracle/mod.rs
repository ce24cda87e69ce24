//! Price sources, validation and consolidation.
//!
//! One adapter per source kind, all behind [`PriceSource`]. An adapter never
//! errors across the boundary: anything that prevents a usable observation —
//! network failure, malformed payload, unknown symbol, non-positive price —
//! comes back as a structured [`FetchOutcome::NoData`] with a reason. A
//! missing quote is not an error for the aggregator.

pub mod aggregator;
pub mod chainlink;
pub mod pyth;
pub mod tick_math;
pub mod twap;
pub mod validator;

use async_trait::async_trait;
use std::fmt;

use crate::store::config_repo::TokenCfg;
use crate::types::{Quote, SourceKind};

/// Result of one adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Quote(Quote),
    NoData(NoDataReason),
}

/// Why an adapter produced no observation. Logged at debug by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoDataReason {
    /// The token config names no endpoint for this source.
    NotConfigured,
    Network(String),
    MalformedPayload(String),
    /// The source answered with a zero or negative price.
    NonPositivePrice,
    UnknownSymbol(String),
    /// No configured pool could serve the requested observation window.
    WindowUnavailable,
    Timeout,
}

impl fmt::Display for NoDataReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoDataReason::NotConfigured => write!(f, "source not configured"),
            NoDataReason::Network(e) => write!(f, "network: {e}"),
            NoDataReason::MalformedPayload(e) => write!(f, "malformed payload: {e}"),
            NoDataReason::NonPositivePrice => write!(f, "non-positive price"),
            NoDataReason::UnknownSymbol(s) => write!(f, "unknown symbol: {s}"),
            NoDataReason::WindowUnavailable => write!(f, "observation window unavailable"),
            NoDataReason::Timeout => write!(f, "deadline exceeded"),
        }
    }
}

/// One external price protocol, normalized to [`Quote`].
///
/// Implementations preserve the source's native `decimals`; rescaling to the
/// canonical scale is the aggregator's job, after validation.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Fetch one observation for the token, or a structured miss.
    async fn fetch(&self, cfg: &TokenCfg) -> FetchOutcome;
}
