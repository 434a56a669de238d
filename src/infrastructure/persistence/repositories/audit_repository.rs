use super::rows;
use crate::domain::audit::AuditEntry;
use crate::domain::repositories::AuditRepository;
use crate::infrastructure::core::retry::{BackoffPolicy, with_backoff};
use crate::infrastructure::persistence::database::{Database, is_transient};
use anyhow::{Context, Result};
use async_trait::async_trait;

pub struct SqliteAuditRepository {
    database: Database,
}

impl SqliteAuditRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        with_backoff(
            "audit.append",
            BackoffPolicy::default(),
            |e: &anyhow::Error| {
                e.downcast_ref::<sqlx::Error>()
                    .map(is_transient)
                    .unwrap_or(false)
            },
            || async {
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
                .execute(&self.database.pool)
                .await
                .context("Failed to append audit entry")?;
                Ok(())
            },
        )
        .await
    }

    async fn find_recent(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit ORDER BY timestamp DESC LIMIT $1")
            .bind(i64::from(limit))
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load audit entries")?;
        rows.iter().map(rows::audit_from_row).collect()
    }

    async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM audit WHERE correlation_id = $1 ORDER BY timestamp ASC",
        )
        .bind(correlation_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load audit entries by correlation")?;
        rows.iter().map(rows::audit_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::{AuditAction, AuditSeverity};
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_query_by_correlation() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteAuditRepository::new(db);

        let entry = AuditEntry::new(
            None,
            AuditAction::RoutingDowngrade,
            "trade",
            "t-1",
            "corr-9",
        )
        .with_severity(AuditSeverity::High)
        .with_after(json!({"reason": "live host refused"}));

        repo.append(&entry).await.unwrap();

        let found = repo.find_by_correlation("corr-9").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].action, AuditAction::RoutingDowngrade);
        assert_eq!(found[0].severity, AuditSeverity::High);
        assert_eq!(found[0].after.as_ref().unwrap()["reason"], "live host refused");
    }
}
