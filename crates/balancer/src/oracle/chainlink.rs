//! Direct-publisher price source over a Chainlink-style aggregator feed.
//!
//! One reading per token; `decimals` and the observation timestamp come from
//! the feed itself. Anything that prevents a usable reading becomes a
//! structured miss — the aggregator decides what a missing source means.

use alloy::primitives::{I256, U256};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::chain::client::HttpProvider;
use crate::chain::contracts::IAggregatorV3;
use crate::oracle::{FetchOutcome, NoDataReason, PriceSource};
use crate::store::config_repo::TokenCfg;
use crate::types::{Quote, QuoteMeta, SourceKind};

pub struct ChainlinkSource {
    provider: HttpProvider,
    call_timeout: Duration,
}

impl ChainlinkSource {
    pub fn new(provider: HttpProvider, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }
}

#[async_trait]
impl PriceSource for ChainlinkSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Chainlink
    }

    async fn fetch(&self, cfg: &TokenCfg) -> FetchOutcome {
        let Some(feed_addr) = cfg.chainlink_feed else {
            return FetchOutcome::NoData(NoDataReason::NotConfigured);
        };

        let feed = IAggregatorV3::new(feed_addr, self.provider.clone());

        let round = match tokio::time::timeout(self.call_timeout, async {
            feed.latestRoundData().call().await
        })
        .await
        {
            Ok(Ok(round)) => round,
            Ok(Err(e)) => return FetchOutcome::NoData(NoDataReason::Network(e.to_string())),
            Err(_) => return FetchOutcome::NoData(NoDataReason::Timeout),
        };

        let decimals = match tokio::time::timeout(self.call_timeout, async {
            feed.decimals().call().await
        })
        .await
        {
            Ok(Ok(d)) => d,
            Ok(Err(e)) => return FetchOutcome::NoData(NoDataReason::Network(e.to_string())),
            Err(_) => return FetchOutcome::NoData(NoDataReason::Timeout),
        };

        let outcome = normalize_round(
            round.answer,
            decimals,
            round.updatedAt,
            u128::try_from(round.roundId).ok(),
        );
        if let FetchOutcome::NoData(ref reason) = outcome {
            debug!(token = %cfg.token_id, feed = %feed_addr, %reason, "chainlink miss");
        }
        outcome
    }
}

/// Shape a raw round into a [`Quote`]. Pure, so the edge cases are testable
/// without a provider.
fn normalize_round(
    answer: I256,
    decimals: u8,
    updated_at: U256,
    round_id: Option<u128>,
) -> FetchOutcome {
    if answer <= I256::ZERO {
        return FetchOutcome::NoData(NoDataReason::NonPositivePrice);
    }

    let at = match u64::try_from(updated_at) {
        Ok(secs) if secs <= i64::MAX as u64 => secs as i64,
        _ => {
            return FetchOutcome::NoData(NoDataReason::MalformedPayload(
                "updatedAt out of range".into(),
            ))
        }
    };

    FetchOutcome::Quote(Quote {
        source: SourceKind::Chainlink,
        price: answer.into_raw(),
        decimals,
        at,
        meta: QuoteMeta::Feed { round_id },
    })
}
