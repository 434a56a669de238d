use crate::domain::trading::types::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Paused,
    /// Soft-deleted. Rows are never physically removed; the engine
    /// skips Deleted alerts in both evaluation paths.
    Deleted,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Paused => "paused",
            AlertStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertStatus::Active),
            "paused" => Some(AlertStatus::Paused),
            "deleted" => Some(AlertStatus::Deleted),
            _ => None,
        }
    }
}

/// A portfolio manager's risk alert. Fires for a trade when all three
/// thresholds are met simultaneously (ties count as matches).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlertConfig {
    pub alert_id: String,
    pub owner_user_id: String,
    pub name: String,
    pub trade_size_threshold: Decimal,
    /// Percentage in [0, 100].
    pub loss_pct_threshold: Decimal,
    pub vix_threshold: Decimal,
    /// Evaluate against every newly executed trade.
    pub monitor_new: bool,
    /// Run one bounded scan over historical trades right after creation.
    pub scan_existing_at_create: bool,
    pub status: AlertStatus,
    pub trigger_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RiskAlertConfig {
    pub fn new(
        owner_user_id: impl Into<String>,
        name: impl Into<String>,
        trade_size_threshold: Decimal,
        loss_pct_threshold: Decimal,
        vix_threshold: Decimal,
        monitor_new: bool,
        scan_existing_at_create: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            owner_user_id: owner_user_id.into(),
            name: name.into(),
            trade_size_threshold,
            loss_pct_threshold,
            vix_threshold,
            monitor_new,
            scan_existing_at_create,
            status: AlertStatus::Active,
            trigger_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Append-only record of one alert firing for one trade. At most one
/// event exists per (alert, trade) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertTriggerEvent {
    pub event_id: String,
    pub alert_id: String,
    pub trade_id: String,
    pub owner_user_id: String,
    pub trade_size: Decimal,
    pub loss_pct: Decimal,
    pub vix_level: Decimal,
    pub symbol: String,
    pub side: OrderSide,
    pub triggered_at: DateTime<Utc>,
}

impl AlertTriggerEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        alert_id: impl Into<String>,
        trade_id: impl Into<String>,
        owner_user_id: impl Into<String>,
        trade_size: Decimal,
        loss_pct: Decimal,
        vix_level: Decimal,
        symbol: impl Into<String>,
        side: OrderSide,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert_id.into(),
            trade_id: trade_id.into(),
            owner_user_id: owner_user_id.into(),
            trade_size,
            loss_pct,
            vix_level,
            symbol: symbol.into(),
            side,
            triggered_at: Utc::now(),
        }
    }
}
