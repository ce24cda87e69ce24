//! Per-token price consolidation: fan out, validate, rescale, decide mode,
//! persist.
//!
//! Adapter misses and validation rejects are absorbed here — a run always
//! produces a [`ConsolidatedPrice`] as long as either a valid quote or a
//! last-good row exists. Degraded and Frozen are successful results, not
//! errors. The only hard failures are a missing token config and a Frozen
//! path with nothing to freeze.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use alloy::primitives::U256;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::BalancerError;
use crate::oracle::{validator, FetchOutcome, PriceSource};
use crate::store::config_repo::{ConfigRepo, TokenCfg};
use crate::store::last_good::LastGoodStore;
use crate::types::scaled::{deviation_bps, median_sorted, rescale_to_canonical};
use crate::types::{ConsolidatedPrice, PriceMode, Quote};

pub struct Aggregator {
    sources: Vec<Arc<dyn PriceSource>>,
    repo: Arc<ConfigRepo>,
    store: Arc<LastGoodStore>,
    /// Wall-clock budget for the whole fan-out; a source that misses it is a
    /// NoData for this run.
    fanout_deadline: Duration,
}

impl Aggregator {
    pub fn new(
        sources: Vec<Arc<dyn PriceSource>>,
        repo: Arc<ConfigRepo>,
        store: Arc<LastGoodStore>,
        fanout_deadline: Duration,
    ) -> Self {
        Self {
            sources,
            repo,
            store,
            fanout_deadline,
        }
    }

    /// Consolidate one token: the single inbound operation of the aggregator.
    pub async fn consolidate(&self, token_id: &str) -> Result<ConsolidatedPrice, BalancerError> {
        let cfg = self.repo.get_token_cfg(token_id)?;

        let started = Instant::now();
        let quotes = self.gather(&cfg).await;
        let last_good = self.store.get(token_id).await?;
        let now = now_unix();

        let cp = consolidate_quotes(&cfg, quotes, last_good.as_ref(), now)?;
        self.store.put(&cp).await?;

        info!(
            token = token_id,
            mode = %cp.mode,
            price = %cp.price,
            sources = cp.sources_used.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "consolidated"
        );
        Ok(cp)
    }

    /// Fetch one quote from every configured source concurrently. No
    /// ordering dependency: the decision function sorts before deciding.
    async fn gather(&self, cfg: &Arc<TokenCfg>) -> Vec<Quote> {
        let mut set = JoinSet::new();
        for source in &self.sources {
            let source = source.clone();
            let cfg = cfg.clone();
            set.spawn(async move {
                let kind = source.kind();
                (kind, source.fetch(&cfg).await)
            });
        }

        let deadline = tokio::time::Instant::now() + self.fanout_deadline;
        let mut quotes = Vec::with_capacity(self.sources.len());

        loop {
            let joined = tokio::time::timeout_at(deadline, set.join_next()).await;
            match joined {
                Ok(Some(Ok((_, FetchOutcome::Quote(q))))) => quotes.push(q),
                Ok(Some(Ok((kind, FetchOutcome::NoData(reason))))) => {
                    debug!(token = %cfg.token_id, source = %kind, %reason, "adapter miss");
                }
                Ok(Some(Err(e))) => {
                    warn!(token = %cfg.token_id, error = %e, "adapter task panicked");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        token = %cfg.token_id,
                        pending = set.len(),
                        "fan-out deadline hit, dropping slow adapters"
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        quotes
    }
}

/// The pure decision core: validate, rescale, pick mode and value.
///
/// Deterministic in the multiset of quotes — adapter completion order cannot
/// change the outcome because contributors are sorted by rescaled value (and
/// source tag as a tie-break) before any choice is made.
pub fn consolidate_quotes(
    cfg: &TokenCfg,
    quotes: Vec<Quote>,
    last_good: Option<&ConsolidatedPrice>,
    now: i64,
) -> Result<ConsolidatedPrice, BalancerError> {
    // Validate; rejects are dropped silently (debug-logged).
    let mut contributors: Vec<(U256, Quote)> = Vec::with_capacity(quotes.len());
    for q in quotes {
        match validator::validate(&q, cfg, now) {
            Ok(()) => {
                let rescaled = rescale_to_canonical(q.price, q.decimals);
                contributors.push((rescaled, q));
            }
            Err(reason) => {
                debug!(
                    token = %cfg.token_id,
                    source = %q.source,
                    ?reason,
                    "quote rejected"
                );
            }
        }
    }

    contributors.sort_by(|(pa, qa), (pb, qb)| pa.cmp(pb).then(qa.source.cmp(&qb.source)));

    let (mode, price) = match contributors.len() {
        0 => {
            let Some(prev) = last_good else {
                return Err(BalancerError::NoPriceAvailable {
                    token: cfg.token_id.clone(),
                });
            };
            warn!(
                token = %cfg.token_id,
                frozen_price = %prev.price,
                frozen_since = prev.at,
                "zero valid quotes, freezing last-good"
            );
            return Ok(ConsolidatedPrice::frozen_from(&cfg.token_id, prev, now));
        }
        1 => (PriceMode::Degraded, contributors[0].0),
        _ => {
            let sorted: Vec<U256> = contributors.iter().map(|(p, _)| *p).collect();
            (PriceMode::Normal, median_sorted(&sorted))
        }
    };

    // Advisory divergence check. Never drops a source.
    for (rescaled, q) in &contributors {
        let dev = deviation_bps(*rescaled, price);
        if dev > U256::from(cfg.delta_bps) {
            warn!(
                token = %cfg.token_id,
                source = %q.source,
                deviation_bps = %dev,
                threshold_bps = cfg.delta_bps,
                "source diverges from consolidated price"
            );
        }
    }

    Ok(ConsolidatedPrice {
        token_id: cfg.token_id.clone(),
        price,
        decimals: crate::constants::CANONICAL_DECIMALS,
        at: now,
        mode,
        sources_used: contributors.into_iter().map(|(_, q)| q).collect(),
    })
}

/// Current UNIX timestamp in seconds.
fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::NoDataReason;
    use crate::store::config_repo::TwapPoolCfg;
    use crate::types::{QuoteMeta, SourceKind};
    use alloy::primitives::{address, Address};
    use async_trait::async_trait;
    use serial_test::serial;
    use std::collections::HashMap;

    const NOW: i64 = 1_700_000_000;
    const POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");

    fn e18(v: u128) -> U256 {
        U256::from(v)
    }

    fn cfg() -> TokenCfg {
        let mut ttl_by_source = HashMap::new();
        ttl_by_source.insert(SourceKind::Chainlink, 300);
        ttl_by_source.insert(SourceKind::Pyth, 300);
        ttl_by_source.insert(SourceKind::UniswapV3Twap, 300);

        TokenCfg {
            token_id: "WETH".into(),
            chain_id: 1,
            token_address: address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            token_decimals: 18,
            ttl_by_source,
            epsilon_ppm: 10_000,
            delta_bps: 150,
            twap_window_sec: 3_600,
            min_liquidity: U256::from(10u64).pow(U256::from(21u64)),
            allowed_pools: vec![TwapPoolCfg {
                address: POOL,
                base_is_token0: true,
                base_decimals: 18,
                quote_decimals: 6,
            }],
            chainlink_feed: None,
            pyth_feed_id: None,
        }
    }

    fn chainlink(at: i64) -> Quote {
        // $2000.00 at 8 decimals
        Quote {
            source: SourceKind::Chainlink,
            price: U256::from(200_000_000_000u64),
            decimals: 8,
            at,
            meta: QuoteMeta::Feed { round_id: Some(1) },
        }
    }

    fn pyth(confidence: U256) -> Quote {
        // $1999.90 at 18 decimals
        Quote {
            source: SourceKind::Pyth,
            price: e18(1_999_900_000_000_000_000_000),
            decimals: 18,
            at: NOW,
            meta: QuoteMeta::Confidence { confidence },
        }
    }

    fn twap(liquidity: U256) -> Quote {
        // $2001.00 at 18 decimals
        Quote {
            source: SourceKind::UniswapV3Twap,
            price: e18(2_001_000_000_000_000_000_000),
            decimals: 18,
            at: NOW,
            meta: QuoteMeta::Twap {
                pool: POOL,
                window_sec: 3_600,
                liquidity,
            },
        }
    }

    fn ok_liquidity() -> U256 {
        U256::from(2u64) * U256::from(10u64).pow(U256::from(21u64))
    }

    // -- pure decision: scenarios ---------------------------------------------

    #[test]
    fn s1_normal_median_across_mixed_decimals() {
        let quotes = vec![
            chainlink(NOW),
            pyth(U256::from(500_000_000_000_000_000u64)), // $0.50 conf
            twap(ok_liquidity()),
        ];
        let cp = consolidate_quotes(&cfg(), quotes, None, NOW).unwrap();

        assert_eq!(cp.mode, PriceMode::Normal);
        assert_eq!(cp.decimals, 18);
        assert_eq!(cp.price, e18(2_000_000_000_000_000_000_000));
        assert_eq!(cp.sources_used.len(), 3);
        assert_eq!(cp.at, NOW);
    }

    #[test]
    fn s2_confidence_and_liquidity_rejections_degrade() {
        let quotes = vec![
            chainlink(NOW),
            // $50 confidence: 2.5% > epsilon 1% -> dropped
            pyth(e18(50_000_000_000_000_000_000)),
            // liquidity 10^20 below min 10^21 -> dropped
            twap(U256::from(10u64).pow(U256::from(20u64))),
        ];
        let cp = consolidate_quotes(&cfg(), quotes, None, NOW).unwrap();

        assert_eq!(cp.mode, PriceMode::Degraded);
        assert_eq!(cp.price, e18(2_000_000_000_000_000_000_000));
        assert_eq!(cp.sources_used.len(), 1);
        assert_eq!(cp.sources_used[0].source, SourceKind::Chainlink);
    }

    #[test]
    fn s3_stale_only_quote_no_last_good_errors() {
        // Chainlink 400s old against a 300s TTL, nothing else.
        let quotes = vec![chainlink(NOW - 400)];
        let err = consolidate_quotes(&cfg(), quotes, None, NOW).unwrap_err();
        assert!(matches!(err, BalancerError::NoPriceAvailable { .. }));
    }

    #[test]
    fn s3_stale_only_quote_with_last_good_freezes() {
        let prev = ConsolidatedPrice {
            token_id: "WETH".into(),
            price: e18(2_000_000_000_000_000_000_000),
            decimals: 18,
            at: NOW - 60,
            mode: PriceMode::Normal,
            sources_used: vec![chainlink(NOW - 60)],
        };
        let quotes = vec![chainlink(NOW - 400)];
        let cp = consolidate_quotes(&cfg(), quotes, Some(&prev), NOW).unwrap();

        assert_eq!(cp.mode, PriceMode::Frozen);
        assert_eq!(cp.price, prev.price);
        assert_eq!(cp.at, NOW);
        assert!(cp.sources_used.is_empty());
    }

    #[test]
    fn even_count_median_truncates() {
        let quotes = vec![chainlink(NOW), pyth(U256::from(1u64))];
        let cp = consolidate_quotes(&cfg(), quotes, None, NOW).unwrap();

        // (1999.9e18 + 2000e18) / 2, truncating
        assert_eq!(cp.mode, PriceMode::Normal);
        assert_eq!(cp.price, e18(1_999_950_000_000_000_000_000));
    }

    #[test]
    fn divergence_never_drops_sources() {
        // delta_bps = 0 makes every source divergent; all must still count.
        let mut c = cfg();
        c.delta_bps = 0;
        let quotes = vec![
            chainlink(NOW),
            pyth(U256::from(1u64)),
            twap(ok_liquidity()),
        ];
        let cp = consolidate_quotes(&c, quotes, None, NOW).unwrap();
        assert_eq!(cp.sources_used.len(), 3);
        assert_eq!(cp.mode, PriceMode::Normal);
    }

    #[test]
    fn order_independent_decision() {
        let a = vec![
            chainlink(NOW),
            pyth(U256::from(1u64)),
            twap(ok_liquidity()),
        ];
        let mut b = a.clone();
        b.reverse();
        let c = vec![a[1].clone(), a[2].clone(), a[0].clone()];

        let cp_a = consolidate_quotes(&cfg(), a, None, NOW).unwrap();
        let cp_b = consolidate_quotes(&cfg(), b, None, NOW).unwrap();
        let cp_c = consolidate_quotes(&cfg(), c, None, NOW).unwrap();

        assert_eq!(cp_a, cp_b);
        assert_eq!(cp_a, cp_c);
    }

    #[test]
    fn sources_used_sorted_by_rescaled_price() {
        let quotes = vec![
            twap(ok_liquidity()),                         // $2001
            chainlink(NOW),                               // $2000
            pyth(U256::from(1u64)),                       // $1999.90
        ];
        let cp = consolidate_quotes(&cfg(), quotes, None, NOW).unwrap();
        let kinds: Vec<SourceKind> = cp.sources_used.iter().map(|q| q.source).collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::Pyth,
                SourceKind::Chainlink,
                SourceKind::UniswapV3Twap
            ]
        );
    }

    // -- full aggregator with mock sources ------------------------------------

    struct MockSource {
        kind: SourceKind,
        outcome: std::sync::Mutex<FetchOutcome>,
    }

    impl MockSource {
        fn new(kind: SourceKind, outcome: FetchOutcome) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcome: std::sync::Mutex::new(outcome),
            })
        }

        fn set(&self, outcome: FetchOutcome) {
            *self.outcome.lock().unwrap() = outcome;
        }
    }

    #[async_trait]
    impl PriceSource for MockSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn fetch(&self, _cfg: &TokenCfg) -> FetchOutcome {
            self.outcome.lock().unwrap().clone()
        }
    }

    async fn repo_and_store() -> (Arc<ConfigRepo>, Arc<LastGoodStore>) {
        let tmp = tempfile::tempdir().unwrap();
        crate::config::test_fixtures::write_test_configs(tmp.path());
        let config = crate::config::load_config(tmp.path()).unwrap();
        let repo = Arc::new(ConfigRepo::from_config(&config).unwrap());
        let store = Arc::new(LastGoodStore::new(crate::store::memory_pool().await));
        (repo, store)
    }

    #[tokio::test]
    #[serial]
    async fn consolidate_unknown_token_fails_fast() {
        let (repo, store) = repo_and_store().await;
        let agg = Aggregator::new(vec![], repo, store, Duration::from_secs(5));
        let err = agg.consolidate("DOGE").await.unwrap_err();
        assert!(matches!(err, BalancerError::ConfigMissing { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn s4_frozen_then_recover() {
        let (repo, store) = repo_and_store().await;

        let cl = MockSource::new(SourceKind::Chainlink, FetchOutcome::Quote(chainlink(NOW)));
        let py = MockSource::new(
            SourceKind::Pyth,
            FetchOutcome::Quote(pyth(U256::from(500_000_000_000_000_000u64))),
        );
        let tw = MockSource::new(
            SourceKind::UniswapV3Twap,
            FetchOutcome::Quote(twap(ok_liquidity())),
        );

        let sources: Vec<Arc<dyn PriceSource>> =
            vec![cl.clone(), py.clone(), tw.clone()];
        let agg = Aggregator::new(sources, repo, store.clone(), Duration::from_secs(5));

        // Run 1: all sources healthy -> Normal at the $2000 median. The
        // canned quotes carry an old timestamp, so re-stamp them against the
        // real clock the aggregator validates with.
        let fresh_now = now_unix();
        cl.set(FetchOutcome::Quote(chainlink(fresh_now)));
        py.set(FetchOutcome::Quote({
            let mut q = pyth(U256::from(500_000_000_000_000_000u64));
            q.at = fresh_now;
            q
        }));
        tw.set(FetchOutcome::Quote({
            let mut q = twap(ok_liquidity());
            q.at = fresh_now;
            q
        }));

        let run1 = agg.consolidate("WETH").await.unwrap();
        assert_eq!(run1.mode, PriceMode::Normal);
        assert_eq!(run1.price, e18(2_000_000_000_000_000_000_000));

        // Run 2: every source dry -> Frozen carrying the last-good price.
        cl.set(FetchOutcome::NoData(NoDataReason::Network("down".into())));
        py.set(FetchOutcome::NoData(NoDataReason::Timeout));
        tw.set(FetchOutcome::NoData(NoDataReason::WindowUnavailable));

        let run2 = agg.consolidate("WETH").await.unwrap();
        assert_eq!(run2.mode, PriceMode::Frozen);
        assert_eq!(run2.price, e18(2_000_000_000_000_000_000_000));
        assert!(run2.sources_used.is_empty());

        // The frozen row is persisted.
        let persisted = store.get("WETH").await.unwrap().unwrap();
        assert_eq!(persisted.mode, PriceMode::Frozen);

        // Run 3: Pyth returns -> Degraded on the single live source.
        let fresh_now = now_unix();
        py.set(FetchOutcome::Quote({
            let mut q = pyth(U256::from(500_000_000_000_000_000u64));
            q.at = fresh_now;
            q
        }));

        let run3 = agg.consolidate("WETH").await.unwrap();
        assert_eq!(run3.mode, PriceMode::Degraded);
        assert_eq!(run3.sources_used.len(), 1);
        assert_eq!(run3.sources_used[0].source, SourceKind::Pyth);
        assert_eq!(run3.price, e18(1_999_900_000_000_000_000_000));
    }

    #[tokio::test]
    #[serial]
    async fn no_sources_and_no_history_is_hard_error() {
        let (repo, store) = repo_and_store().await;
        let cl = MockSource::new(
            SourceKind::Chainlink,
            FetchOutcome::NoData(NoDataReason::Network("down".into())),
        );
        let sources: Vec<Arc<dyn PriceSource>> = vec![cl];
        let agg = Aggregator::new(sources, repo, store, Duration::from_secs(5));

        let err = agg.consolidate("WETH").await.unwrap_err();
        assert!(matches!(err, BalancerError::NoPriceAvailable { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn slow_adapter_is_dropped_at_deadline() {
        struct SlowSource;

        #[async_trait]
        impl PriceSource for SlowSource {
            fn kind(&self) -> SourceKind {
                SourceKind::Pyth
            }
            async fn fetch(&self, _cfg: &TokenCfg) -> FetchOutcome {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("must be aborted at the fan-out deadline")
            }
        }

        let (repo, store) = repo_and_store().await;
        let fresh_now = now_unix();
        let cl = MockSource::new(
            SourceKind::Chainlink,
            FetchOutcome::Quote(chainlink(fresh_now)),
        );

        let sources: Vec<Arc<dyn PriceSource>> = vec![cl, Arc::new(SlowSource)];
        let agg = Aggregator::new(sources, repo, store, Duration::from_millis(200));

        let cp = agg.consolidate("WETH").await.unwrap();
        assert_eq!(cp.mode, PriceMode::Degraded);
        assert_eq!(cp.sources_used.len(), 1);
    }
}
