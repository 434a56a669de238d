use super::rows;
use crate::domain::repositories::PositionRepository;
use crate::domain::trading::position::Position;
use crate::infrastructure::core::ttl_cache::TtlCache;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

const READ_CACHE_TTL: Duration = Duration::from_secs(300);
const READ_CACHE_CAPACITY: usize = 4096;

pub struct SqlitePositionRepository {
    database: Database,
    cache: TtlCache<Position>,
}

impl SqlitePositionRepository {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            cache: TtlCache::new(READ_CACHE_CAPACITY),
        }
    }

    fn key(user_id: &str, symbol: &str) -> String {
        format!("{}:{}", user_id, symbol)
    }
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn get(&self, user_id: &str, symbol: &str) -> Result<Option<Position>> {
        let key = Self::key(user_id, symbol);
        if let Some(position) = self.cache.get(&key).await {
            return Ok(Some(position));
        }

        let row = sqlx::query("SELECT * FROM positions WHERE user_id = $1 AND symbol = $2")
            .bind(user_id)
            .bind(symbol)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load position")?;

        match row {
            Some(row) => {
                let position = rows::position_from_row(&row)?;
                self.cache.insert(key, position.clone(), READ_CACHE_TTL).await;
                Ok(Some(position))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (user_id, symbol, net_quantity, cost_basis, realized_pnl, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(user_id, symbol) DO UPDATE SET
                net_quantity = excluded.net_quantity,
                cost_basis = excluded.cost_basis,
                realized_pnl = excluded.realized_pnl,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.user_id)
        .bind(&position.symbol)
        .bind(position.net_quantity)
        .bind(position.cost_basis.to_string())
        .bind(position.realized_pnl.to_string())
        .bind(position.updated_at.to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert position")?;

        self.cache
            .invalidate(&Self::key(&position.user_id, &position.symbol))
            .await;
        Ok(())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE user_id = $1 ORDER BY symbol")
            .bind(user_id)
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load positions")?;
        rows.iter().map(rows::position_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::OrderSide;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePositionRepository::new(db);

        let mut position = Position::flat("u-1", "AAPL");
        position.apply_fill(OrderSide::Buy, 100, dec!(150.0150));
        repo.upsert(&position).await.unwrap();

        let loaded = repo.get("u-1", "AAPL").await.unwrap().unwrap();
        assert_eq!(loaded.net_quantity, 100);
        assert_eq!(loaded.cost_basis, dec!(150.0150));

        // Second upsert overwrites.
        position.apply_fill(OrderSide::Sell, 50, dec!(155));
        repo.upsert(&position).await.unwrap();
        let reloaded = repo.get("u-1", "AAPL").await.unwrap().unwrap();
        assert_eq!(reloaded.net_quantity, 50);
    }

    #[tokio::test]
    async fn test_missing_position_is_none() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePositionRepository::new(db);
        assert!(repo.get("u-1", "MSFT").await.unwrap().is_none());
    }
}
