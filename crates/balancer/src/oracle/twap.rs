//! DEX TWAP price source over Uniswap-V3-style pool observations.
//!
//! Walks the token's configured pools in declared order and returns the first
//! one that can serve the requested window. The adapter owns the tick-to-price
//! conversion and the harmonic-mean liquidity metric; gating on pool
//! membership, window length and minimum liquidity is the validator's job.

use alloy::primitives::U256;
use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::chain::client::HttpProvider;
use crate::chain::contracts::IUniswapV3Pool;
use crate::oracle::tick_math::{
    harmonic_mean_liquidity, mean_tick, price_e18_from_sqrt_ratio, sqrt_ratio_at_tick,
};
use crate::oracle::{FetchOutcome, NoDataReason, PriceSource};
use crate::store::config_repo::{TokenCfg, TwapPoolCfg};
use crate::types::{Quote, QuoteMeta, SourceKind};

pub struct TwapSource {
    provider: HttpProvider,
    call_timeout: Duration,
}

impl TwapSource {
    pub fn new(provider: HttpProvider, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }

    /// Observe one pool over `window_sec`. Errors are per-pool misses; the
    /// caller moves on to the next configured pool.
    async fn observe_pool(
        &self,
        pool: &TwapPoolCfg,
        window_sec: u32,
    ) -> Result<Quote, NoDataReason> {
        let contract = IUniswapV3Pool::new(pool.address, self.provider.clone());

        // Two readings: `window_sec` ago and now.
        let seconds_agos = vec![window_sec, 0u32];
        let observation = match tokio::time::timeout(self.call_timeout, async {
            contract.observe(seconds_agos).call().await
        })
        .await
        {
            Ok(Ok(obs)) => obs,
            // A pool that cannot serve the window reverts the observe call.
            Ok(Err(e)) => return Err(NoDataReason::Network(e.to_string())),
            Err(_) => return Err(NoDataReason::Timeout),
        };

        if observation.tickCumulatives.len() != 2
            || observation.secondsPerLiquidityCumulativeX128s.len() != 2
        {
            return Err(NoDataReason::MalformedPayload(
                "observe returned wrong cardinality".into(),
            ));
        }

        let tc_start = i64::try_from(observation.tickCumulatives[0])
            .map_err(|_| NoDataReason::MalformedPayload("tick cumulative overflow".into()))?;
        let tc_end = i64::try_from(observation.tickCumulatives[1])
            .map_err(|_| NoDataReason::MalformedPayload("tick cumulative overflow".into()))?;

        let spl_start = u160_to_u256(observation.secondsPerLiquidityCumulativeX128s[0]);
        let spl_end = u160_to_u256(observation.secondsPerLiquidityCumulativeX128s[1]);

        let tick = mean_tick(tc_start, tc_end, window_sec);
        let sqrt_ratio = sqrt_ratio_at_tick(tick).ok_or(NoDataReason::WindowUnavailable)?;
        let price = price_e18_from_sqrt_ratio(
            sqrt_ratio,
            pool.base_is_token0,
            pool.base_decimals,
            pool.quote_decimals,
        )
        .ok_or(NoDataReason::NonPositivePrice)?;

        let liquidity = harmonic_mean_liquidity(spl_start, spl_end, window_sec)
            .ok_or(NoDataReason::WindowUnavailable)?;

        Ok(Quote {
            source: SourceKind::UniswapV3Twap,
            price,
            decimals: 18,
            at: now_unix(),
            meta: QuoteMeta::Twap {
                pool: pool.address,
                window_sec,
                liquidity,
            },
        })
    }
}

#[async_trait]
impl PriceSource for TwapSource {
    fn kind(&self) -> SourceKind {
        SourceKind::UniswapV3Twap
    }

    async fn fetch(&self, cfg: &TokenCfg) -> FetchOutcome {
        if cfg.allowed_pools.is_empty() {
            return FetchOutcome::NoData(NoDataReason::NotConfigured);
        }

        for pool in &cfg.allowed_pools {
            match self.observe_pool(pool, cfg.twap_window_sec).await {
                Ok(quote) => return FetchOutcome::Quote(quote),
                Err(reason) => {
                    debug!(
                        token = %cfg.token_id,
                        pool = %pool.address,
                        %reason,
                        "twap pool miss, trying next"
                    );
                }
            }
        }

        FetchOutcome::NoData(NoDataReason::WindowUnavailable)
    }
}

fn u160_to_u256(v: alloy::primitives::aliases::U160) -> U256 {
    U256::from_be_slice(&v.to_be_bytes::<20>())
}

/// Current UNIX timestamp in seconds.
fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_secs() as i64
}
