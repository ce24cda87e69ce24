//! Durable map of `token_id -> ConsolidatedPrice` — exactly one row per token.
//!
//! Writes for a given token are serialized by construction: only that
//! token's aggregation task writes its row. The store itself guarantees
//! read-your-write consistency through the single-connection pool.

use alloy::primitives::U256;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::errors::BalancerError;
use crate::types::{ConsolidatedPrice, PriceMode, Quote};

pub struct LastGoodStore {
    pool: SqlitePool,
}

impl LastGoodStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The current last-good price for a token, if one has ever been written.
    pub async fn get(&self, token_id: &str) -> Result<Option<ConsolidatedPrice>, BalancerError> {
        let row = sqlx::query(
            "SELECT token_id, price, decimals, at, mode, sources_used \
             FROM last_good_prices WHERE token_id = ?",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_price).transpose()
    }

    /// Replace the token's row with a new consolidated price.
    pub async fn put(&self, cp: &ConsolidatedPrice) -> Result<(), BalancerError> {
        let sources = serde_json::to_string(&cp.sources_used)?;

        sqlx::query(
            "INSERT INTO last_good_prices (token_id, price, decimals, at, mode, sources_used) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(token_id) DO UPDATE SET \
                 price = excluded.price, \
                 decimals = excluded.decimals, \
                 at = excluded.at, \
                 mode = excluded.mode, \
                 sources_used = excluded.sources_used",
        )
        .bind(&cp.token_id)
        .bind(cp.price.to_string())
        .bind(cp.decimals as i64)
        .bind(cp.at)
        .bind(cp.mode.as_str())
        .bind(sources)
        .execute(&self.pool)
        .await?;

        debug!(token = %cp.token_id, mode = %cp.mode, at = cp.at, "last-good updated");
        Ok(())
    }
}

fn row_to_price(row: sqlx::sqlite::SqliteRow) -> Result<ConsolidatedPrice, BalancerError> {
    let price_str: String = row.get("price");
    let price = U256::from_str_radix(&price_str, 10)
        .map_err(|e| BalancerError::Config(format!("corrupt last-good price: {e}")))?;

    let mode_str: String = row.get("mode");
    let mode = PriceMode::parse(&mode_str)
        .ok_or_else(|| BalancerError::Config(format!("corrupt last-good mode: {mode_str}")))?;

    let sources_json: String = row.get("sources_used");
    let sources_used: Vec<Quote> = serde_json::from_str(&sources_json)?;

    Ok(ConsolidatedPrice {
        token_id: row.get("token_id"),
        price,
        decimals: row.get::<i64, _>("decimals") as u8,
        at: row.get("at"),
        mode,
        sources_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WAD;
    use crate::store::memory_pool;
    use crate::types::{QuoteMeta, SourceKind};

    fn sample(token: &str, usd: u64, at: i64, mode: PriceMode) -> ConsolidatedPrice {
        ConsolidatedPrice {
            token_id: token.into(),
            price: U256::from(usd) * WAD,
            decimals: 18,
            at,
            mode,
            sources_used: vec![Quote {
                source: SourceKind::Pyth,
                price: U256::from(usd),
                decimals: 0,
                at,
                meta: QuoteMeta::Confidence {
                    confidence: U256::from(1u64),
                },
            }],
        }
    }

    #[tokio::test]
    async fn get_missing_token_is_none() {
        let store = LastGoodStore::new(memory_pool().await);
        assert!(store.get("WETH").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = LastGoodStore::new(memory_pool().await);
        let cp = sample("WETH", 2_000, 100, PriceMode::Normal);
        store.put(&cp).await.unwrap();

        let got = store.get("WETH").await.unwrap().unwrap();
        assert_eq!(got, cp);
    }

    #[tokio::test]
    async fn put_overwrites_single_row() {
        let store = LastGoodStore::new(memory_pool().await);
        store.put(&sample("WETH", 2_000, 100, PriceMode::Normal)).await.unwrap();
        store.put(&sample("WETH", 2_100, 200, PriceMode::Degraded)).await.unwrap();

        let got = store.get("WETH").await.unwrap().unwrap();
        assert_eq!(got.price, U256::from(2_100u64) * WAD);
        assert_eq!(got.mode, PriceMode::Degraded);
        assert_eq!(got.at, 200);
    }

    #[tokio::test]
    async fn tokens_are_independent_rows() {
        let store = LastGoodStore::new(memory_pool().await);
        store.put(&sample("WETH", 2_000, 100, PriceMode::Normal)).await.unwrap();
        store.put(&sample("WBTC", 60_000, 100, PriceMode::Normal)).await.unwrap();

        assert_eq!(
            store.get("WETH").await.unwrap().unwrap().price,
            U256::from(2_000u64) * WAD
        );
        assert_eq!(
            store.get("WBTC").await.unwrap().unwrap().price,
            U256::from(60_000u64) * WAD
        );
    }

    #[tokio::test]
    async fn frozen_row_with_empty_sources_roundtrips() {
        let store = LastGoodStore::new(memory_pool().await);
        let mut cp = sample("WETH", 2_000, 100, PriceMode::Frozen);
        cp.sources_used.clear();
        store.put(&cp).await.unwrap();

        let got = store.get("WETH").await.unwrap().unwrap();
        assert!(got.sources_used.is_empty());
        assert_eq!(got.mode, PriceMode::Frozen);
    }
}
