use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UserCreated,
    UserRoleChanged,
    TradeSubmitted,
    TradeExecuted,
    RoutingDowngrade,
    AlertCreated,
    AlertStatusChanged,
    AlertTriggered,
    AlertScanCompleted,
    NotificationFailed,
    VixUnavailable,
    PolicyViolation,
    SystemError,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserCreated => "user_created",
            AuditAction::UserRoleChanged => "user_role_changed",
            AuditAction::TradeSubmitted => "trade_submitted",
            AuditAction::TradeExecuted => "trade_executed",
            AuditAction::RoutingDowngrade => "routing_downgrade",
            AuditAction::AlertCreated => "alert_created",
            AuditAction::AlertStatusChanged => "alert_status_changed",
            AuditAction::AlertTriggered => "alert_triggered",
            AuditAction::AlertScanCompleted => "alert_scan_completed",
            AuditAction::NotificationFailed => "notification_failed",
            AuditAction::VixUnavailable => "vix_unavailable",
            AuditAction::PolicyViolation => "policy_violation",
            AuditAction::SystemError => "system_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_created" => Some(AuditAction::UserCreated),
            "user_role_changed" => Some(AuditAction::UserRoleChanged),
            "trade_submitted" => Some(AuditAction::TradeSubmitted),
            "trade_executed" => Some(AuditAction::TradeExecuted),
            "routing_downgrade" => Some(AuditAction::RoutingDowngrade),
            "alert_created" => Some(AuditAction::AlertCreated),
            "alert_status_changed" => Some(AuditAction::AlertStatusChanged),
            "alert_triggered" => Some(AuditAction::AlertTriggered),
            "alert_scan_completed" => Some(AuditAction::AlertScanCompleted),
            "notification_failed" => Some(AuditAction::NotificationFailed),
            "vix_unavailable" => Some(AuditAction::VixUnavailable),
            "policy_violation" => Some(AuditAction::PolicyViolation),
            "system_error" => Some(AuditAction::SystemError),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warn,
    High,
    Error,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warn => "warn",
            AuditSeverity::High => "high",
            AuditSeverity::Error => "error",
        }
    }
}

/// Immutable audit record. Appended for every external-facing mutation;
/// never rewritten. The correlation id threads together every entry
/// originating from one chat interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: String,
    pub timestamp: DateTime<Utc>,
    /// None for system-initiated actions.
    pub actor_user_id: Option<String>,
    pub action: AuditAction,
    pub severity: AuditSeverity,
    pub subject_kind: String,
    pub subject_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub correlation_id: String,
}

impl AuditEntry {
    pub fn new(
        actor_user_id: Option<String>,
        action: AuditAction,
        subject_kind: impl Into<String>,
        subject_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            audit_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor_user_id,
            action,
            severity: AuditSeverity::Info,
            subject_kind: subject_kind.into(),
            subject_id: subject_id.into(),
            before: None,
            after: None,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }
}

pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Short form shown to users next to "try again" messages.
pub fn short_correlation_id(correlation_id: &str) -> &str {
    correlation_id.get(..8).unwrap_or(correlation_id)
}
