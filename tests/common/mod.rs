//! Shared harness: the full application graph over mock collaborators
//! and an in-memory store.
#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tradedesk::application::alerts::AlertEngine;
use tradedesk::application::execution::slippage::FixedSlippage;
use tradedesk::application::execution::{ExecutionConfig, ExecutionRouter, TradeSimulator};
use tradedesk::application::notifier::Notifier;
use tradedesk::application::orchestrator::TradeOrchestrator;
use tradedesk::config::Config;
use tradedesk::infrastructure::event_bus::EventBus;
use tradedesk::infrastructure::mock::{MockBroker, MockChatApi, MockMarketData, MockRiskAnalysis};
use tradedesk::infrastructure::persistence::database::Database;
use tradedesk::infrastructure::persistence::repositories::{
    SqliteAlertEventRepository, SqliteAlertRepository, SqliteAuditRepository,
    SqlitePositionRepository, SqliteTradeRepository, SqliteUserRepository,
};

pub struct Harness {
    pub orchestrator: Arc<TradeOrchestrator>,
    pub engine: Arc<AlertEngine>,
    pub router: Arc<ExecutionRouter>,
    pub bus: EventBus,
    pub market: Arc<MockMarketData>,
    pub chat: Arc<MockChatApi>,
    pub broker: Arc<MockBroker>,
    pub users: Arc<SqliteUserRepository>,
    pub trades: Arc<SqliteTradeRepository>,
    pub positions: Arc<SqlitePositionRepository>,
    pub alerts: Arc<SqliteAlertRepository>,
    pub alert_events: Arc<SqliteAlertEventRepository>,
    pub audit: Arc<SqliteAuditRepository>,
}

pub async fn build_harness(config: Config, risk_score: Option<u8>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();

    let database = Database::in_memory().await.unwrap();
    let users = Arc::new(SqliteUserRepository::new(database.clone()));
    let trades = Arc::new(SqliteTradeRepository::new(database.clone()));
    let positions = Arc::new(SqlitePositionRepository::new(database.clone()));
    let alerts = Arc::new(SqliteAlertRepository::new(database.clone()));
    let alert_events = Arc::new(SqliteAlertEventRepository::new(database.clone()));
    let audit = Arc::new(SqliteAuditRepository::new(database));

    let market = Arc::new(MockMarketData::new());
    let chat = Arc::new(MockChatApi::new());
    let broker = Arc::new(MockBroker::new(dec!(1_000_000), dec!(150.01)));
    let risk = Arc::new(match risk_score {
        Some(score) => MockRiskAnalysis::scoring(score),
        None => MockRiskAnalysis::unavailable(),
    });

    let bus = EventBus::new();
    let notifier = Arc::new(Notifier::new(
        chat.clone(),
        audit.clone(),
        config.quiet_hours,
        config.notify_rate_per_min,
    ));

    let router = Arc::new(ExecutionRouter::new(
        ExecutionConfig::from_config(&config),
        broker.clone(),
        TradeSimulator::with_slippage(Box::new(FixedSlippage(0.0001))),
        market.clone(),
        trades.clone(),
        positions.clone(),
        audit.clone(),
        bus.clone(),
    ));

    let engine = Arc::new(AlertEngine::new(
        alerts.clone(),
        alert_events.clone(),
        trades.clone(),
        users.clone(),
        audit.clone(),
        market.clone(),
        notifier.clone(),
    ));
    bus.subscribe(engine.clone()).await;

    let orchestrator = Arc::new(TradeOrchestrator::new(
        config,
        users.clone(),
        trades.clone(),
        alerts.clone(),
        audit.clone(),
        market.clone(),
        risk,
        chat.clone(),
        router.clone(),
        engine.clone(),
        notifier,
    ));

    Harness {
        orchestrator,
        engine,
        router,
        bus,
        market,
        chat,
        broker,
        users,
        trades,
        positions,
        alerts,
        alert_events,
        audit,
    }
}

pub fn sim_config() -> Config {
    Config {
        max_position_size: 50_000,
        max_trade_value: Decimal::from(10_000_000),
        ..Config::default()
    }
}

/// Let detached orchestrator tasks settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}
