//! Publisher-aggregated price source over the Pyth Hermes HTTP service.
//!
//! Hermes reports a price, a confidence interval at the same exponent, and a
//! publish time. The confidence is mandatory in the normalized quote — the
//! validator's epsilon gate depends on it.

use alloy::primitives::U256;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::oracle::{FetchOutcome, NoDataReason, PriceSource};
use crate::store::config_repo::TokenCfg;
use crate::types::{Quote, QuoteMeta, SourceKind};

pub struct PythSource {
    client: reqwest::Client,
    hermes_url: String,
}

impl PythSource {
    pub fn new(hermes_url: String, call_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client, hermes_url }
    }
}

#[async_trait]
impl PriceSource for PythSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Pyth
    }

    async fn fetch(&self, cfg: &TokenCfg) -> FetchOutcome {
        let Some(feed_id) = cfg.pyth_feed_id.as_deref() else {
            return FetchOutcome::NoData(NoDataReason::NotConfigured);
        };

        let url = format!(
            "{}/v2/updates/price/latest?ids[]={}&parsed=true",
            self.hermes_url.trim_end_matches('/'),
            feed_id
        );

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return FetchOutcome::NoData(NoDataReason::Timeout),
            Err(e) => return FetchOutcome::NoData(NoDataReason::Network(e.to_string())),
        };

        if !response.status().is_success() {
            return FetchOutcome::NoData(NoDataReason::Network(format!(
                "hermes returned {}",
                response.status()
            )));
        }

        let body: HermesResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                return FetchOutcome::NoData(NoDataReason::MalformedPayload(e.to_string()))
            }
        };

        let outcome = quote_from_response(&body, feed_id);
        if let FetchOutcome::NoData(ref reason) = outcome {
            debug!(token = %cfg.token_id, feed_id, %reason, "pyth miss");
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Hermes payload shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HermesResponse {
    parsed: Vec<ParsedFeed>,
}

#[derive(Debug, Deserialize)]
struct ParsedFeed {
    id: String,
    price: HermesPrice,
}

#[derive(Debug, Deserialize)]
struct HermesPrice {
    /// Integer mantissa as a decimal string.
    price: String,
    /// Confidence interval, same exponent as `price`.
    conf: String,
    /// Decimal exponent; negative means fractional digits.
    expo: i32,
    publish_time: i64,
}

/// Normalize a Hermes response into a [`Quote`]. Pure for testability.
fn quote_from_response(body: &HermesResponse, want_id: &str) -> FetchOutcome {
    let want = want_id.trim_start_matches("0x");
    let Some(feed) = body
        .parsed
        .iter()
        .find(|f| f.id.trim_start_matches("0x").eq_ignore_ascii_case(want))
    else {
        return FetchOutcome::NoData(NoDataReason::UnknownSymbol(want_id.to_string()));
    };

    let price_raw: i128 = match feed.price.price.parse() {
        Ok(p) => p,
        Err(_) => {
            return FetchOutcome::NoData(NoDataReason::MalformedPayload(
                "price mantissa is not an integer".into(),
            ))
        }
    };
    if price_raw <= 0 {
        return FetchOutcome::NoData(NoDataReason::NonPositivePrice);
    }

    let conf_raw: u128 = match feed.price.conf.parse() {
        Ok(c) => c,
        Err(_) => {
            return FetchOutcome::NoData(NoDataReason::MalformedPayload(
                "confidence is not an unsigned integer".into(),
            ))
        }
    };

    // Negative exponents carry the fractional digits; a positive exponent
    // folds into the mantissa so decimals stay non-negative.
    let (price, confidence, decimals) = if feed.price.expo <= 0 {
        let decimals = match u8::try_from(-i64::from(feed.price.expo)) {
            Ok(d) => d,
            Err(_) => {
                return FetchOutcome::NoData(NoDataReason::MalformedPayload(
                    "exponent out of range".into(),
                ))
            }
        };
        (
            U256::from(price_raw as u128),
            U256::from(conf_raw),
            decimals,
        )
    } else {
        let scale = U256::from(10u64).pow(U256::from(feed.price.expo as u64));
        (
            U256::from(price_raw as u128) * scale,
            U256::from(conf_raw) * scale,
            0u8,
        )
    };

    FetchOutcome::Quote(Quote {
        source: SourceKind::Pyth,
        price,
        decimals,
        at: feed.price.publish_time,
        meta: QuoteMeta::Confidence { confidence },
    })
}
