//! Repository traits over the durable store.
//!
//! One trait per table, implemented by the SQLite layer in
//! `infrastructure::persistence`. Writes that originate from a chat
//! interaction carry a client-supplied op id; a repeated write with the
//! same op id reports `Duplicate` instead of applying twice.

use crate::domain::alerts::{AlertTriggerEvent, RiskAlertConfig};
use crate::domain::audit::AuditEntry;
use crate::domain::trading::position::Position;
use crate::domain::trading::types::{Trade, TradeStatus};
use crate::domain::user::{Role, User, UserStatus};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Outcome of an idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The same op id was seen before; the row state is unchanged.
    Duplicate,
}

impl WriteOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<()>;
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>>;
    async fn find_by_chat_id(&self, chat_id: &str) -> Result<Option<User>>;
    async fn set_status(&self, user_id: &str, status: UserStatus) -> Result<()>;
    async fn set_role(&self, user_id: &str, role: Role) -> Result<()>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    /// Insert a new pending trade under the given op id.
    async fn insert(&self, trade: &Trade, op_id: &str) -> Result<WriteOutcome>;

    /// Commit the trade's terminal state, the recomputed position and
    /// the audit entry as one atomic unit. When the transaction cannot
    /// be committed as a unit, the implementation writes trade + audit
    /// and schedules an idempotent position recompute.
    async fn finalize(
        &self,
        trade: &Trade,
        position: &Position,
        audit: &AuditEntry,
        op_id: &str,
    ) -> Result<WriteOutcome>;

    async fn find_by_id(&self, user_id: &str, trade_id: &str) -> Result<Option<Trade>>;

    /// The trade a previously applied op id wrote, if any. Lets a
    /// duplicate submission report the original outcome.
    async fn find_by_op_id(&self, op_id: &str) -> Result<Option<Trade>>;
    async fn find_recent_by_user(&self, user_id: &str, limit: u32) -> Result<Vec<Trade>>;
    async fn find_by_status(&self, status: TradeStatus, limit: u32) -> Result<Vec<Trade>>;

    /// Terminal filled trades whose executed size is at least
    /// `min_trade_size`, most recent first. Feeds the alert batch scan.
    async fn find_filled_min_size(&self, min_trade_size: Decimal, limit: u32)
    -> Result<Vec<Trade>>;

    /// All terminal trades for (user, symbol), oldest first. Feeds the
    /// position recompute fallback.
    async fn find_terminal_for_position(&self, user_id: &str, symbol: &str) -> Result<Vec<Trade>>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn get(&self, user_id: &str, symbol: &str) -> Result<Option<Position>>;
    async fn upsert(&self, position: &Position) -> Result<()>;
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Position>>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn create(&self, alert: &RiskAlertConfig, op_id: &str) -> Result<WriteOutcome>;
    async fn find_by_id(&self, alert_id: &str) -> Result<Option<RiskAlertConfig>>;
    async fn find_by_owner(&self, owner_user_id: &str) -> Result<Vec<RiskAlertConfig>>;
    /// Every Active alert in the system; the realtime evaluation set.
    async fn find_active(&self) -> Result<Vec<RiskAlertConfig>>;
    async fn set_status(
        &self,
        alert_id: &str,
        status: crate::domain::alerts::AlertStatus,
    ) -> Result<()>;

    /// Conditional increment: applies only when the stored count still
    /// equals `expected`, keeping the counter strictly monotonic under
    /// concurrent evaluation. Returns false when the condition failed.
    async fn increment_trigger_count(&self, alert_id: &str, expected: i64) -> Result<bool>;
}

#[async_trait]
pub trait AlertEventRepository: Send + Sync {
    /// Append one trigger event. At most one event may exist per
    /// (alert, trade) pair; a second append reports `Duplicate`.
    async fn append(&self, event: &AlertTriggerEvent) -> Result<WriteOutcome>;
    async fn find_by_alert(&self, alert_id: &str, limit: u32) -> Result<Vec<AlertTriggerEvent>>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<()>;
    async fn find_recent(&self, limit: u32) -> Result<Vec<AuditEntry>>;
    async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<AuditEntry>>;
}
