use crate::domain::trading::types::{ExecutionReport, Trade};
use async_trait::async_trait;

/// Domain events published on the in-process bus. The execution router
/// publishes `TradeExecuted` only after the persistence transaction has
/// committed, so subscribers can always read the trade back.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    TradeExecuted {
        trade: Trade,
        report: ExecutionReport,
        correlation_id: String,
    },
}

#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &DomainEvent);
}
