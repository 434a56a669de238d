use super::rows;
use crate::domain::alerts::{AlertStatus, RiskAlertConfig};
use crate::domain::repositories::{AlertRepository, WriteOutcome};
use crate::infrastructure::core::ttl_cache::TtlCache;
use crate::infrastructure::persistence::database::{Database, is_unique_violation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

const READ_CACHE_TTL: Duration = Duration::from_secs(300);
const READ_CACHE_CAPACITY: usize = 4096;

pub struct SqliteAlertRepository {
    database: Database,
    cache: TtlCache<RiskAlertConfig>,
}

impl SqliteAlertRepository {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            cache: TtlCache::new(READ_CACHE_CAPACITY),
        }
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn create(&self, alert: &RiskAlertConfig, op_id: &str) -> Result<WriteOutcome> {
        let mut tx = self.database.pool.begin().await?;

        let claim =
            sqlx::query("INSERT INTO op_log (op_id, subject_id, applied_at) VALUES ($1, $2, $3)")
                .bind(op_id)
                .bind(&alert.alert_id)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await;
        match claim {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await.ok();
                return Ok(WriteOutcome::Duplicate);
            }
            Err(e) => return Err(e).context("Failed to record op id"),
        }

        sqlx::query(
            r#"
            INSERT INTO alerts (
                alert_id, owner_user_id, name, trade_size_threshold,
                loss_pct_threshold, vix_threshold, monitor_new,
                scan_existing_at_create, status, trigger_count,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&alert.alert_id)
        .bind(&alert.owner_user_id)
        .bind(&alert.name)
        .bind(alert.trade_size_threshold.to_string())
        .bind(alert.loss_pct_threshold.to_string())
        .bind(alert.vix_threshold.to_string())
        .bind(i64::from(alert.monitor_new))
        .bind(i64::from(alert.scan_existing_at_create))
        .bind(alert.status.as_str())
        .bind(alert.trigger_count)
        .bind(alert.created_at.to_rfc3339())
        .bind(alert.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to insert alert")?;

        tx.commit().await.context("Failed to commit alert create")?;
        Ok(WriteOutcome::Applied)
    }

    async fn find_by_id(&self, alert_id: &str) -> Result<Option<RiskAlertConfig>> {
        if let Some(alert) = self.cache.get(alert_id).await {
            return Ok(Some(alert));
        }

        let row = sqlx::query("SELECT * FROM alerts WHERE alert_id = $1")
            .bind(alert_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load alert")?;

        match row {
            Some(row) => {
                let alert = rows::alert_from_row(&row)?;
                self.cache
                    .insert(alert_id, alert.clone(), READ_CACHE_TTL)
                    .await;
                Ok(Some(alert))
            }
            None => Ok(None),
        }
    }

    async fn find_by_owner(&self, owner_user_id: &str) -> Result<Vec<RiskAlertConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alerts
            WHERE owner_user_id = $1 AND status != 'deleted'
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_user_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load alerts by owner")?;
        rows.iter().map(rows::alert_from_row).collect()
    }

    async fn find_active(&self) -> Result<Vec<RiskAlertConfig>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE status = 'active'")
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load active alerts")?;
        rows.iter().map(rows::alert_from_row).collect()
    }

    async fn set_status(&self, alert_id: &str, status: AlertStatus) -> Result<()> {
        sqlx::query("UPDATE alerts SET status = $1, updated_at = $2 WHERE alert_id = $3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(alert_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to update alert status")?;

        self.cache.invalidate(alert_id).await;
        Ok(())
    }

    async fn increment_trigger_count(&self, alert_id: &str, expected: i64) -> Result<bool> {
        // Conditional update keeps the counter strictly monotonic under
        // concurrent evaluation; a lost race reports false and the
        // caller re-reads.
        let result = sqlx::query(
            r#"
            UPDATE alerts SET trigger_count = trigger_count + 1, updated_at = $1
            WHERE alert_id = $2 AND trigger_count = $3
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(alert_id)
        .bind(expected)
        .execute(&self.database.pool)
        .await
        .context("Failed to increment trigger count")?;

        if result.rows_affected() > 0 {
            self.cache.invalidate(alert_id).await;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_alert() -> RiskAlertConfig {
        RiskAlertConfig::new(
            "pm-7",
            "Big drawdown",
            dec!(10000),
            dec!(3),
            dec!(20),
            true,
            false,
        )
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteAlertRepository::new(db);

        let alert = sample_alert();
        assert_eq!(
            repo.create(&alert, "op-1").await.unwrap(),
            WriteOutcome::Applied
        );

        let loaded = repo.find_by_id(&alert.alert_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Big drawdown");
        assert_eq!(loaded.trade_size_threshold, dec!(10000));
        assert!(loaded.monitor_new);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteAlertRepository::new(db);

        let alert = sample_alert();
        repo.create(&alert, "op-1").await.unwrap();
        let replay = sample_alert();
        assert_eq!(
            repo.create(&replay, "op-1").await.unwrap(),
            WriteOutcome::Duplicate
        );
        assert!(repo.find_by_id(&replay.alert_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_is_skipped_by_active_query() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteAlertRepository::new(db);

        let alert = sample_alert();
        repo.create(&alert, "op-1").await.unwrap();
        assert_eq!(repo.find_active().await.unwrap().len(), 1);

        repo.set_status(&alert.alert_id, AlertStatus::Deleted)
            .await
            .unwrap();
        assert!(repo.find_active().await.unwrap().is_empty());

        // Row still exists; deletion is soft.
        let loaded = repo.find_by_id(&alert.alert_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AlertStatus::Deleted);
    }

    #[tokio::test]
    async fn test_conditional_increment_is_monotonic() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteAlertRepository::new(db);

        let alert = sample_alert();
        repo.create(&alert, "op-1").await.unwrap();

        assert!(repo.increment_trigger_count(&alert.alert_id, 0).await.unwrap());
        // Stale expectation loses.
        assert!(!repo.increment_trigger_count(&alert.alert_id, 0).await.unwrap());
        assert!(repo.increment_trigger_count(&alert.alert_id, 1).await.unwrap());

        let loaded = repo.find_by_id(&alert.alert_id).await.unwrap().unwrap();
        assert_eq!(loaded.trigger_count, 2);
    }
}
