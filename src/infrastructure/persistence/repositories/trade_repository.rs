use super::rows;
use crate::domain::audit::AuditEntry;
use crate::domain::repositories::{TradeRepository, WriteOutcome};
use crate::domain::trading::position::Position;
use crate::domain::trading::types::{Trade, TradeStatus};
use crate::infrastructure::core::retry::{BackoffPolicy, with_backoff};
use crate::infrastructure::persistence::database::{Database, is_transient, is_unique_violation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::{Sqlite, Transaction};
use tracing::{error, warn};

pub struct SqliteTradeRepository {
    database: Database,
}

impl SqliteTradeRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Claim the op id inside the given transaction. A conflict means
    /// the same logical write already happened.
    async fn claim_op_id(
        tx: &mut Transaction<'_, Sqlite>,
        op_id: &str,
        subject_id: &str,
    ) -> Result<WriteOutcome> {
        let result =
            sqlx::query("INSERT INTO op_log (op_id, subject_id, applied_at) VALUES ($1, $2, $3)")
                .bind(op_id)
                .bind(subject_id)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut **tx)
                .await;

        match result {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::Duplicate),
            Err(e) => Err(e).context("Failed to record op id"),
        }
    }

    async fn insert_trade_row(tx: &mut Transaction<'_, Sqlite>, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                trade_id, user_id, symbol, side, quantity, order_type,
                limit_price, entry_price, entry_price_source, status,
                execution_id, fill_price, filled_quantity, commission,
                venue, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&trade.trade_id)
        .bind(&trade.user_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.quantity)
        .bind(trade.order_type.as_str())
        .bind(trade.limit_price.map(|p| p.to_string()))
        .bind(trade.entry_price.to_string())
        .bind(trade.entry_price_source.as_str())
        .bind(trade.status.as_str())
        .bind(&trade.execution_id)
        .bind(trade.fill_price.map(|p| p.to_string()))
        .bind(trade.filled_quantity)
        .bind(trade.commission.to_string())
        .bind(trade.venue.map(|v| v.as_str()))
        .bind(trade.created_at.to_rfc3339())
        .bind(trade.updated_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .context("Failed to insert trade")?;
        Ok(())
    }

    async fn update_trade_row(tx: &mut Transaction<'_, Sqlite>, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades SET
                status = $1, execution_id = $2, fill_price = $3,
                filled_quantity = $4, commission = $5, venue = $6, updated_at = $7
            WHERE trade_id = $8
            "#,
        )
        .bind(trade.status.as_str())
        .bind(&trade.execution_id)
        .bind(trade.fill_price.map(|p| p.to_string()))
        .bind(trade.filled_quantity)
        .bind(trade.commission.to_string())
        .bind(trade.venue.map(|v| v.as_str()))
        .bind(Utc::now().to_rfc3339())
        .bind(&trade.trade_id)
        .execute(&mut **tx)
        .await
        .context("Failed to update trade")?;
        Ok(())
    }

    async fn upsert_position_row(
        tx: &mut Transaction<'_, Sqlite>,
        position: &Position,
    ) -> Result<()> {
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
        .execute(&mut **tx)
        .await
        .context("Failed to upsert position")?;
        Ok(())
    }

    async fn insert_audit_row(tx: &mut Transaction<'_, Sqlite>, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit (
                audit_id, timestamp, actor_user_id, action, severity,
                subject_kind, subject_id, before_json, after_json, correlation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&entry.audit_id)
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.actor_user_id)
        .bind(entry.action.as_str())
        .bind(entry.severity.as_str())
        .bind(&entry.subject_kind)
        .bind(&entry.subject_id)
        .bind(entry.before.as_ref().map(|v| v.to_string()))
        .bind(entry.after.as_ref().map(|v| v.to_string()))
        .bind(&entry.correlation_id)
        .execute(&mut **tx)
        .await
        .context("Failed to insert audit entry")?;
        Ok(())
    }

    /// Fallback path when the three-row transaction cannot commit:
    /// trade + audit first, then an idempotent full recompute of the
    /// position from terminal trades.
    async fn finalize_without_position(
        &self,
        trade: &Trade,
        audit: &AuditEntry,
        op_id: &str,
    ) -> Result<WriteOutcome> {
        let mut tx = self.database.pool.begin().await?;
        if Self::claim_op_id(&mut tx, op_id, &trade.trade_id).await? == WriteOutcome::Duplicate {
            tx.rollback().await.ok();
            return Ok(WriteOutcome::Duplicate);
        }
        Self::update_trade_row(&mut tx, trade).await?;
        Self::insert_audit_row(&mut tx, audit).await?;
        tx.commit().await.context("Failed to commit trade + audit")?;

        let repo = Self {
            database: self.database.clone(),
        };
        let user_id = trade.user_id.clone();
        let symbol = trade.symbol.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.recompute_position(&user_id, &symbol).await {
                error!(
                    "Deferred position recompute failed for {}/{}: {}",
                    user_id, symbol, e
                );
            }
        });

        Ok(WriteOutcome::Applied)
    }

    async fn recompute_position(&self, user_id: &str, symbol: &str) -> Result<()> {
        let trades = self.find_terminal_for_position(user_id, symbol).await?;
        let position = Position::recompute(user_id, symbol, &trades);

        let mut tx = self.database.pool.begin().await?;
        Self::upsert_position_row(&mut tx, &position).await?;
        tx.commit().await.context("Failed to commit recomputed position")
    }
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn insert(&self, trade: &Trade, op_id: &str) -> Result<WriteOutcome> {
        with_backoff(
            "trades.insert",
            BackoffPolicy::default(),
            |e: &anyhow::Error| {
                e.downcast_ref::<sqlx::Error>()
                    .map(is_transient)
                    .unwrap_or(false)
            },
            || async {
                let mut tx = self.database.pool.begin().await?;
                if Self::claim_op_id(&mut tx, op_id, &trade.trade_id).await? == WriteOutcome::Duplicate {
                    tx.rollback().await.ok();
                    return Ok(WriteOutcome::Duplicate);
                }
                Self::insert_trade_row(&mut tx, trade).await?;
                tx.commit().await.context("Failed to commit trade insert")?;
                Ok(WriteOutcome::Applied)
            },
        )
        .await
    }

    async fn finalize(
        &self,
        trade: &Trade,
        position: &Position,
        audit: &AuditEntry,
        op_id: &str,
    ) -> Result<WriteOutcome> {
        let attempt = with_backoff(
            "trades.finalize",
            BackoffPolicy::default(),
            |e: &anyhow::Error| {
                e.downcast_ref::<sqlx::Error>()
                    .map(is_transient)
                    .unwrap_or(false)
            },
            || async {
                let mut tx = self.database.pool.begin().await?;
                if Self::claim_op_id(&mut tx, op_id, &trade.trade_id).await? == WriteOutcome::Duplicate {
                    tx.rollback().await.ok();
                    return Ok(WriteOutcome::Duplicate);
                }
                Self::update_trade_row(&mut tx, trade).await?;
                Self::upsert_position_row(&mut tx, position).await?;
                Self::insert_audit_row(&mut tx, audit).await?;
                tx.commit().await.context("Failed to commit finalize")?;
                Ok(WriteOutcome::Applied)
            },
        )
        .await;

        match attempt {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    "Atomic finalize failed for trade {} ({}); falling back to split write",
                    trade.trade_id, e
                );
                self.finalize_without_position(trade, audit, op_id).await
            }
        }
    }

    async fn find_by_id(&self, user_id: &str, trade_id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE trade_id = $1 AND user_id = $2")
            .bind(trade_id)
            .bind(user_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load trade")?;
        row.map(|r| rows::trade_from_row(&r)).transpose()
    }

    async fn find_by_op_id(&self, op_id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query(
            r#"
            SELECT t.* FROM trades t
            JOIN op_log o ON o.subject_id = t.trade_id
            WHERE o.op_id = $1
            "#,
        )
        .bind(op_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load trade by op id")?;
        row.map(|r| rows::trade_from_row(&r)).transpose()
    }

    async fn find_recent_by_user(&self, user_id: &str, limit: u32) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load recent trades")?;
        rows.iter().map(rows::trade_from_row).collect()
    }

    async fn find_by_status(&self, status: TradeStatus, limit: u32) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load trades by status")?;
        rows.iter().map(rows::trade_from_row).collect()
    }

    async fn find_filled_min_size(
        &self,
        min_trade_size: Decimal,
        limit: u32,
    ) -> Result<Vec<Trade>> {
        // REAL comparison is a prefilter; the engine re-evaluates the
        // predicate exactly on the decoded decimals.
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE status = 'filled'
              AND filled_quantity IS NOT NULL
              AND fill_price IS NOT NULL
              AND filled_quantity * CAST(fill_price AS REAL) >= $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(min_trade_size.to_f64().unwrap_or(0.0))
        .bind(i64::from(limit))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to scan filled trades")?;
        rows.iter().map(rows::trade_from_row).collect()
    }

    async fn find_terminal_for_position(&self, user_id: &str, symbol: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE user_id = $1 AND symbol = $2
              AND status IN ('filled', 'rejected', 'cancelled')
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load terminal trades")?;
        rows.iter().map(rows::trade_from_row).collect()
    }
}
