use crate::domain::events::{DomainEvent, EventListener};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process event bus between the execution router and the alert
/// engine. Publication happens after the trade's persistence
/// transaction commits, so listeners can always read the trade back.
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn publish(&self, event: DomainEvent) {
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            listener.on_event(&event).await;
        }
    }

    /// Publish without waiting for listeners; the caller only awaits
    /// the persistence ack.
    pub fn publish_detached(&self, event: DomainEvent) {
        let bus = self.clone();
        tokio::spawn(async move {
            bus.publish(event).await;
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::{
        EntryPriceSource, ExecutionReport, OrderSide, OrderType, Trade, TradeStatus, Venue,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventListener for CountingListener {
        async fn on_event(&self, _event: &DomainEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_event() -> DomainEvent {
        let trade = Trade::pending(
            "u-1",
            "AAPL",
            OrderSide::Buy,
            100,
            OrderType::Market,
            None,
            dec!(150),
            EntryPriceSource::Quote,
        );
        let report = ExecutionReport {
            success: true,
            execution_id: Some("ex-1".into()),
            status: TradeStatus::Filled,
            filled_quantity: 100,
            fill_price: Some(dec!(150.015)),
            venue: Venue::Simulator,
            submitted_at: chrono::Utc::now(),
            filled_at: Some(chrono::Utc::now()),
            error: None,
        };
        DomainEvent::TradeExecuted {
            trade,
            report,
            correlation_id: "corr-1".into(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_listeners() {
        let bus = EventBus::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(CountingListener {
            count: Arc::clone(&count1),
        }))
        .await;
        bus.subscribe(Arc::new(CountingListener {
            count: Arc::clone(&count2),
        }))
        .await;

        bus.publish(sample_event()).await;

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clone_shares_listeners() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        bus1.subscribe(Arc::new(CountingListener {
            count: Arc::new(AtomicUsize::new(0)),
        }))
        .await;

        assert_eq!(bus2.subscriber_count().await, 1);
    }
}
