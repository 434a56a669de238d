use crate::application::alerts::predicate::{AlertMetrics, evaluate};
use crate::application::notifier::Notifier;
use crate::domain::alerts::{AlertTriggerEvent, RiskAlertConfig};
use crate::domain::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::domain::events::{DomainEvent, EventListener};
use crate::domain::ports::MarketDataService;
use crate::domain::repositories::{
    AlertEventRepository, AlertRepository, AuditRepository, TradeRepository, UserRepository,
    WriteOutcome,
};
use crate::domain::trading::types::Trade;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Per-trade wall-clock budget for the realtime path; alerts that do
/// not fit are handed to the background sweep.
const REALTIME_BUDGET: Duration = Duration::from_millis(500);
/// Batch scans read at most this many historical trades.
const SCAN_TRADE_CAP: u32 = 100;
/// How often the deferred sweep drains.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const TRIGGER_INCREMENT_ATTEMPTS: u32 = 3;

struct DeferredWork {
    trade: Trade,
    alert_ids: Vec<String>,
    correlation_id: String,
}

/// Evaluates risk alerts against executed trades, in real time off the
/// event bus and in bounded batch scans over history.
pub struct AlertEngine {
    alerts: Arc<dyn AlertRepository>,
    events: Arc<dyn AlertEventRepository>,
    trades: Arc<dyn TradeRepository>,
    users: Arc<dyn UserRepository>,
    audit: Arc<dyn AuditRepository>,
    market_data: Arc<dyn MarketDataService>,
    notifier: Arc<Notifier>,
    deferred: Mutex<Vec<DeferredWork>>,
    realtime_budget: Duration,
}

impl AlertEngine {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        events: Arc<dyn AlertEventRepository>,
        trades: Arc<dyn TradeRepository>,
        users: Arc<dyn UserRepository>,
        audit: Arc<dyn AuditRepository>,
        market_data: Arc<dyn MarketDataService>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            alerts,
            events,
            trades,
            users,
            audit,
            market_data,
            notifier,
            deferred: Mutex::new(Vec::new()),
            realtime_budget: REALTIME_BUDGET,
        }
    }

    #[cfg(test)]
    pub fn with_realtime_budget(mut self, budget: Duration) -> Self {
        self.realtime_budget = budget;
        self
    }

    /// Realtime evaluation for one terminal trade. Never propagates an
    /// error back to the execution path.
    pub async fn check_trade(&self, trade: &Trade, correlation_id: &str) {
        if !trade.is_terminal() {
            return;
        }

        let vix = match self.market_data.get_vix().await {
            Ok(level) => level,
            Err(e) => {
                // Skip silently with a WARN audit; the sweep will not
                // retry this trade.
                warn!("VIX unavailable, skipping alert evaluation: {}", e);
                self.audit_vix_unavailable(trade, correlation_id).await;
                return;
            }
        };
        let current_price = self
            .market_data
            .get_quote(&trade.symbol)
            .await
            .ok()
            .map(|q| q.price);

        let alerts = match self.alerts.find_active().await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!("Failed to load active alerts: {}", e);
                return;
            }
        };

        let started = Instant::now();
        let mut remaining: Vec<String> = Vec::new();
        for alert in &alerts {
            if !alert.monitor_new {
                continue;
            }
            if started.elapsed() >= self.realtime_budget {
                remaining.push(alert.alert_id.clone());
                continue;
            }
            self.fire_if_matching(alert, trade, current_price, vix, correlation_id)
                .await;
        }

        if !remaining.is_empty() {
            info!(
                "Deferring {} alert(s) for trade {} to the background sweep",
                remaining.len(),
                trade.trade_id
            );
            self.deferred.lock().await.push(DeferredWork {
                trade: trade.clone(),
                alert_ids: remaining,
                correlation_id: correlation_id.to_string(),
            });
        }
    }

    /// Evaluate and, on a match, record and notify. The trigger event
    /// is the dedup point: one event per (alert, trade) pair.
    async fn fire_if_matching(
        &self,
        alert: &RiskAlertConfig,
        trade: &Trade,
        current_price: Option<Decimal>,
        vix: Decimal,
        correlation_id: &str,
    ) {
        let Some(metrics) = evaluate(alert, trade, current_price, vix) else {
            return;
        };
        if let Err(e) = self
            .record_trigger(alert, trade, &metrics, correlation_id, true)
            .await
        {
            error!(
                "Failed to record trigger for alert {}: {}",
                alert.alert_id, e
            );
        }
    }

    /// Append the trigger event, bump the counter, notify the owner and
    /// audit. Returns the event when it was newly recorded.
    async fn record_trigger(
        &self,
        alert: &RiskAlertConfig,
        trade: &Trade,
        metrics: &AlertMetrics,
        correlation_id: &str,
        increment_count: bool,
    ) -> Result<Option<AlertTriggerEvent>> {
        let event = AlertTriggerEvent::new(
            alert.alert_id.clone(),
            trade.trade_id.clone(),
            alert.owner_user_id.clone(),
            metrics.trade_size,
            metrics.loss_pct,
            metrics.vix_level,
            trade.symbol.clone(),
            trade.side,
        );

        if self.events.append(&event).await? == WriteOutcome::Duplicate {
            debug!(
                "Alert {} already fired for trade {}",
                alert.alert_id, trade.trade_id
            );
            return Ok(None);
        }

        if increment_count {
            self.increment_trigger_count(&alert.alert_id).await?;
        }

        let audit = AuditEntry::new(
            None,
            AuditAction::AlertTriggered,
            "alert",
            alert.alert_id.clone(),
            correlation_id,
        )
        .with_after(json!({
            "trade_id": trade.trade_id,
            "trade_size": metrics.trade_size.to_string(),
            "loss_pct": metrics.loss_pct.to_string(),
            "vix_level": metrics.vix_level.to_string(),
        }));
        self.audit.append(&audit).await?;

        // Dispatch failures never revert the trigger record.
        if let Ok(Some(owner)) = self.users.find_by_id(&alert.owner_user_id).await {
            self.notifier.send_alert(&owner, alert, trade, &event).await;
        } else {
            warn!(
                "Alert {} owner {} not found; trigger recorded without notification",
                alert.alert_id, alert.owner_user_id
            );
        }

        Ok(Some(event))
    }

    /// Strictly monotonic counter bump via conditional update; a lost
    /// race re-reads and retries a bounded number of times.
    async fn increment_trigger_count(&self, alert_id: &str) -> Result<()> {
        for _ in 0..TRIGGER_INCREMENT_ATTEMPTS {
            let Some(current) = self.alerts.find_by_id(alert_id).await? else {
                return Ok(());
            };
            if self
                .alerts
                .increment_trigger_count(alert_id, current.trigger_count)
                .await?
            {
                return Ok(());
            }
        }
        warn!(
            "Gave up incrementing trigger count for {} after {} attempts",
            alert_id, TRIGGER_INCREMENT_ATTEMPTS
        );
        Ok(())
    }

    async fn audit_vix_unavailable(&self, trade: &Trade, correlation_id: &str) {
        let entry = AuditEntry::new(
            None,
            AuditAction::VixUnavailable,
            "trade",
            trade.trade_id.clone(),
            correlation_id,
        )
        .with_severity(AuditSeverity::Warn);
        if let Err(e) = self.audit.append(&entry).await {
            error!("Failed to audit VIX outage: {}", e);
        }
    }

    /// Bounded scan of historical trades for a freshly created alert.
    /// Appends one trigger event per match and sends one summary DM.
    pub async fn scan_existing(&self, alert: &RiskAlertConfig, correlation_id: &str) -> Result<()> {
        if !alert.is_active() {
            return Ok(());
        }

        // VIX retries once; a second failure abandons the scan.
        let vix = match self.market_data.get_vix().await {
            Ok(level) => level,
            Err(first) => match self.market_data.get_vix().await {
                Ok(level) => level,
                Err(_) => {
                    warn!("Scan for alert {} abandoned: {}", alert.alert_id, first);
                    self.audit
                        .append(
                            &AuditEntry::new(
                                None,
                                AuditAction::VixUnavailable,
                                "alert",
                                alert.alert_id.clone(),
                                correlation_id,
                            )
                            .with_severity(AuditSeverity::Warn),
                        )
                        .await?;
                    return Ok(());
                }
            },
        };

        let candidates = self
            .trades
            .find_filled_min_size(alert.trade_size_threshold, SCAN_TRADE_CAP)
            .await?;

        // One quote fetch per distinct symbol; the gateway caches.
        let mut quotes: HashMap<String, Option<Decimal>> = HashMap::new();
        for trade in &candidates {
            if !quotes.contains_key(&trade.symbol) {
                let price = self
                    .market_data
                    .get_quote(&trade.symbol)
                    .await
                    .ok()
                    .map(|q| q.price);
                quotes.insert(trade.symbol.clone(), price);
            }
        }

        let mut matches = Vec::new();
        for trade in &candidates {
            let current_price = quotes.get(&trade.symbol).copied().flatten();
            if let Some(metrics) = evaluate(alert, trade, current_price, vix) {
                if let Some(event) = self
                    .record_trigger(alert, trade, &metrics, correlation_id, false)
                    .await?
                {
                    matches.push(event);
                }
            }
        }

        info!(
            "Scan for alert {} matched {}/{} trades",
            alert.alert_id,
            matches.len(),
            candidates.len()
        );

        if let Ok(Some(owner)) = self.users.find_by_id(&alert.owner_user_id).await {
            self.notifier.send_summary(&owner, alert, &matches).await;
        }

        self.audit
            .append(
                &AuditEntry::new(
                    None,
                    AuditAction::AlertScanCompleted,
                    "alert",
                    alert.alert_id.clone(),
                    correlation_id,
                )
                .with_after(json!({
                    "candidates": candidates.len(),
                    "matches": matches.len(),
                })),
            )
            .await?;
        Ok(())
    }

    /// Drain evaluations that overflowed the realtime budget.
    pub async fn run_sweep(&self) {
        let pending: Vec<DeferredWork> = self.deferred.lock().await.drain(..).collect();
        if pending.is_empty() {
            return;
        }
        info!("Alert sweep draining {} deferred trade(s)", pending.len());

        for work in pending {
            let vix = match self.market_data.get_vix().await {
                Ok(level) => level,
                Err(e) => {
                    warn!("Sweep skipping trade {}: {}", work.trade.trade_id, e);
                    continue;
                }
            };
            let current_price = self
                .market_data
                .get_quote(&work.trade.symbol)
                .await
                .ok()
                .map(|q| q.price);

            for alert_id in &work.alert_ids {
                match self.alerts.find_by_id(alert_id).await {
                    Ok(Some(alert)) if alert.is_active() => {
                        self.fire_if_matching(
                            &alert,
                            &work.trade,
                            current_price,
                            vix,
                            &work.correlation_id,
                        )
                        .await;
                    }
                    Ok(_) => {}
                    Err(e) => error!("Sweep failed to load alert {}: {}", alert_id, e),
                }
            }
        }
    }

    #[cfg(test)]
    pub async fn deferred_len(&self) -> usize {
        self.deferred.lock().await.len()
    }
}

#[async_trait]
impl EventListener for AlertEngine {
    async fn on_event(&self, event: &DomainEvent) {
        let DomainEvent::TradeExecuted {
            trade,
            correlation_id,
            ..
        } = event;
        self.check_trade(trade, correlation_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::{
        EntryPriceSource, OrderSide, OrderType, Trade, TradeStatus,
    };
    use crate::domain::user::{Role, User};
    use crate::infrastructure::mock::{MockChatApi, MockMarketData};
    use crate::infrastructure::persistence::database::Database;
    use crate::infrastructure::persistence::repositories::{
        SqliteAlertEventRepository, SqliteAlertRepository, SqliteAuditRepository,
        SqlitePositionRepository, SqliteTradeRepository, SqliteUserRepository,
    };
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: AlertEngine,
        alerts: Arc<SqliteAlertRepository>,
        events: Arc<SqliteAlertEventRepository>,
        trades: Arc<SqliteTradeRepository>,
        users: Arc<SqliteUserRepository>,
        market: Arc<MockMarketData>,
        chat: Arc<MockChatApi>,
        #[allow(dead_code)]
        positions: Arc<SqlitePositionRepository>,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let alerts = Arc::new(SqliteAlertRepository::new(db.clone()));
        let events = Arc::new(SqliteAlertEventRepository::new(db.clone()));
        let trades = Arc::new(SqliteTradeRepository::new(db.clone()));
        let users = Arc::new(SqliteUserRepository::new(db.clone()));
        let audit = Arc::new(SqliteAuditRepository::new(db.clone()));
        let positions = Arc::new(SqlitePositionRepository::new(db));
        let market = Arc::new(MockMarketData::new());
        let chat = Arc::new(MockChatApi::new());
        let notifier = Arc::new(Notifier::new(chat.clone(), audit.clone(), None, 30));

        let engine = AlertEngine::new(
            alerts.clone(),
            events.clone(),
            trades.clone(),
            users.clone(),
            audit.clone(),
            market.clone(),
            notifier,
        );
        Fixture {
            engine,
            alerts,
            events,
            trades,
            users,
            market,
            chat,
            positions,
        }
    }

    async fn seed_manager(fx: &Fixture) -> User {
        let manager = User::new("UPM7", "pm-7", Role::PortfolioManager);
        fx.users.create(&manager).await.unwrap();
        manager
    }

    fn filled_trade(quantity: i64) -> Trade {
        let mut trade = Trade::pending(
            "trader-3",
            "AAPL",
            OrderSide::Buy,
            quantity,
            OrderType::Market,
            None,
            dec!(150),
            EntryPriceSource::Quote,
        );
        trade.status = TradeStatus::Filled;
        trade.filled_quantity = Some(quantity);
        trade.fill_price = Some(dec!(150.015));
        trade
    }

    #[tokio::test]
    async fn test_realtime_trigger_records_and_notifies() {
        let fx = fixture().await;
        let manager = seed_manager(&fx).await;

        let alert = RiskAlertConfig::new(
            manager.user_id.clone(),
            "Big drawdown",
            dec!(10000),
            dec!(3),
            dec!(20),
            true,
            false,
        );
        fx.alerts.create(&alert, "op-a1").await.unwrap();

        fx.market.set_price("AAPL", dec!(145)).await;
        fx.market.set_vix(dec!(22)).await;

        let trade = filled_trade(100);
        fx.engine.check_trade(&trade, "corr-4").await;

        // Counter bumped 0 -> 1.
        let updated = fx.alerts.find_by_id(&alert.alert_id).await.unwrap().unwrap();
        assert_eq!(updated.trigger_count, 1);

        // Exactly one trigger event with the measured metrics.
        let events = fx.events.find_by_alert(&alert.alert_id, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trade_size, dec!(15001.5000));
        assert_eq!(events[0].vix_level, dec!(22));

        // One DM to the manager.
        let messages = fx.chat.messages.read().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel_id, "D-UPM7");
        assert!(messages[0].text.contains("Big drawdown"));
    }

    #[tokio::test]
    async fn test_same_trade_never_fires_twice() {
        let fx = fixture().await;
        let manager = seed_manager(&fx).await;
        let alert = RiskAlertConfig::new(
            manager.user_id.clone(),
            "dup",
            dec!(0),
            dec!(0),
            dec!(0),
            true,
            false,
        );
        fx.alerts.create(&alert, "op-a1").await.unwrap();
        fx.market.set_price("AAPL", dec!(150)).await;
        fx.market.set_vix(dec!(10)).await;

        let trade = filled_trade(100);
        fx.engine.check_trade(&trade, "corr-1").await;
        fx.engine.check_trade(&trade, "corr-2").await;

        let events = fx.events.find_by_alert(&alert.alert_id, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        let updated = fx.alerts.find_by_id(&alert.alert_id).await.unwrap().unwrap();
        assert_eq!(updated.trigger_count, 1);
    }

    #[tokio::test]
    async fn test_paused_and_deleted_alerts_are_skipped() {
        let fx = fixture().await;
        let manager = seed_manager(&fx).await;
        let alert = RiskAlertConfig::new(
            manager.user_id.clone(),
            "paused",
            dec!(0),
            dec!(0),
            dec!(0),
            true,
            false,
        );
        fx.alerts.create(&alert, "op-a1").await.unwrap();
        fx.alerts
            .set_status(&alert.alert_id, crate::domain::alerts::AlertStatus::Paused)
            .await
            .unwrap();

        fx.market.set_price("AAPL", dec!(150)).await;
        fx.market.set_vix(dec!(30)).await;
        fx.engine.check_trade(&filled_trade(100), "corr-1").await;

        assert!(
            fx.events
                .find_by_alert(&alert.alert_id, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_vix_outage_skips_evaluation_silently() {
        let fx = fixture().await;
        let manager = seed_manager(&fx).await;
        let alert = RiskAlertConfig::new(
            manager.user_id.clone(),
            "novix",
            dec!(0),
            dec!(0),
            dec!(0),
            true,
            false,
        );
        fx.alerts.create(&alert, "op-a1").await.unwrap();
        fx.market.set_price("AAPL", dec!(150)).await;
        // No VIX configured: the mock errors.

        fx.engine.check_trade(&filled_trade(100), "corr-1").await;
        assert!(
            fx.events
                .find_by_alert(&alert.alert_id, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_budget_overflow_defers_to_sweep() {
        let fx = fixture().await;
        let manager = seed_manager(&fx).await;
        for i in 0..3 {
            let alert = RiskAlertConfig::new(
                manager.user_id.clone(),
                format!("alert-{}", i),
                dec!(0),
                dec!(0),
                dec!(0),
                true,
                false,
            );
            fx.alerts.create(&alert, &format!("op-{}", i)).await.unwrap();
        }
        fx.market.set_price("AAPL", dec!(150)).await;
        fx.market.set_vix(dec!(30)).await;

        let engine = fx.engine.with_realtime_budget(Duration::ZERO);
        let trade = filled_trade(100);
        engine.check_trade(&trade, "corr-1").await;

        // Nothing evaluated inline; everything deferred.
        assert_eq!(engine.deferred_len().await, 1);

        engine.run_sweep().await;
        assert_eq!(engine.deferred_len().await, 0);

        // All three fired from the sweep.
        let total: usize = {
            let mut count = 0;
            for alert in fx.alerts.find_active().await.unwrap() {
                count += fx
                    .events
                    .find_by_alert(&alert.alert_id, 10)
                    .await
                    .unwrap()
                    .len();
            }
            count
        };
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_scan_existing_sends_one_summary() {
        let fx = fixture().await;
        let manager = seed_manager(&fx).await;

        // Three qualifying historical trades.
        for i in 0..3 {
            let mut trade = filled_trade(100);
            trade.trade_id = format!("hist-{}", i);
            fx.trades.insert(&trade, &format!("op-t{}", i)).await.unwrap();
            let position =
                crate::domain::trading::position::Position::flat("trader-3", "AAPL");
            let audit = AuditEntry::new(
                None,
                AuditAction::TradeExecuted,
                "trade",
                trade.trade_id.clone(),
                "corr-seed",
            );
            fx.trades
                .finalize(&trade, &position, &audit, &format!("fop-t{}", i))
                .await
                .unwrap();
        }

        fx.market.set_price("AAPL", dec!(150)).await;
        fx.market.set_vix(dec!(25)).await;

        let alert = RiskAlertConfig::new(
            manager.user_id.clone(),
            "historic",
            dec!(10000),
            dec!(0),
            dec!(20),
            false,
            true,
        );
        fx.alerts.create(&alert, "op-a1").await.unwrap();

        fx.engine.scan_existing(&alert, "corr-9").await.unwrap();

        // Three trigger events, one summary DM.
        let events = fx.events.find_by_alert(&alert.alert_id, 10).await.unwrap();
        assert_eq!(events.len(), 3);

        let messages = fx.chat.messages.read().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("matched 3"));
    }
}
