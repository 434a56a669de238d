use super::rows;
use crate::domain::alerts::AlertTriggerEvent;
use crate::domain::repositories::{AlertEventRepository, WriteOutcome};
use crate::infrastructure::persistence::database::{Database, is_unique_violation};
use anyhow::{Context, Result};
use async_trait::async_trait;

pub struct SqliteAlertEventRepository {
    database: Database,
}

impl SqliteAlertEventRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AlertEventRepository for SqliteAlertEventRepository {
    async fn append(&self, event: &AlertTriggerEvent) -> Result<WriteOutcome> {
        // Uniqueness on (alert_id, trade_id) enforces one event per
        // pair; the second evaluation of the same trade is a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO alert_events (
                event_id, alert_id, trade_id, owner_user_id, trade_size,
                loss_pct, vix_level, symbol, side, triggered_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.alert_id)
        .bind(&event.trade_id)
        .bind(&event.owner_user_id)
        .bind(event.trade_size.to_string())
        .bind(event.loss_pct.to_string())
        .bind(event.vix_level.to_string())
        .bind(&event.symbol)
        .bind(event.side.as_str())
        .bind(event.triggered_at.to_rfc3339())
        .execute(&self.database.pool)
        .await;

        match result {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::Duplicate),
            Err(e) => Err(e).context("Failed to append alert event"),
        }
    }

    async fn find_by_alert(&self, alert_id: &str, limit: u32) -> Result<Vec<AlertTriggerEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alert_events
            WHERE alert_id = $1
            ORDER BY triggered_at DESC
            LIMIT $2
            "#,
        )
        .bind(alert_id)
        .bind(i64::from(limit))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load alert events")?;
        rows.iter().map(rows::alert_event_from_row).collect()
    }
}
