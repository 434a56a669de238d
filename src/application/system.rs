use crate::application::alerts::AlertEngine;
use crate::application::alerts::engine::SWEEP_INTERVAL;
use crate::application::execution::{ExecutionConfig, ExecutionRouter, TradeSimulator};
use crate::application::notifier::Notifier;
use crate::application::orchestrator::TradeOrchestrator;
use crate::config::Config;
use crate::domain::ports::{
    BrokerService, ChatApiService, MarketDataService, RiskAnalysisService, SharedCacheService,
};
use crate::domain::repositories::UserRepository;
use crate::infrastructure::broker::PaperBrokerClient;
use crate::infrastructure::chat::client::ChatClient;
use crate::infrastructure::chat::server::{self, ChatServer};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::market_data::MarketDataGateway;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteAlertEventRepository, SqliteAlertRepository, SqliteAuditRepository,
    SqlitePositionRepository, SqliteTradeRepository, SqliteUserRepository,
};
use crate::infrastructure::risk_ai::RiskAnalysisClient;
use crate::infrastructure::shared_cache::InProcessSharedCache;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Digest flush cadence; one window behind the per-user rate cap.
const DIGEST_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Fully wired application. `build` assembles the object graph against
/// the real collaborators; `start` launches the background loops; the
/// HTTP router serves the chat platform's inbound traffic.
pub struct Application {
    pub config: Config,
    pub orchestrator: Arc<TradeOrchestrator>,
    pub engine: Arc<AlertEngine>,
    pub notifier: Arc<Notifier>,
    pub users: Arc<dyn UserRepository>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let database = Database::new(&config.database_url).await?;

        let users = Arc::new(SqliteUserRepository::new(database.clone()));
        let trades = Arc::new(SqliteTradeRepository::new(database.clone()));
        let positions = Arc::new(SqlitePositionRepository::new(database.clone()));
        let alerts = Arc::new(SqliteAlertRepository::new(database.clone()));
        let alert_events = Arc::new(SqliteAlertEventRepository::new(database.clone()));
        let audit = Arc::new(SqliteAuditRepository::new(database));

        let shared_cache: Arc<dyn SharedCacheService> = Arc::new(InProcessSharedCache::new());
        let market_data: Arc<dyn MarketDataService> =
            Arc::new(MarketDataGateway::new(&config, shared_cache));
        let broker: Arc<dyn BrokerService> = Arc::new(PaperBrokerClient::new(
            &config.broker_key_id,
            &config.broker_secret,
            &config.broker_base_url,
        ));
        let chat: Arc<dyn ChatApiService> = Arc::new(ChatClient::new(
            &config.chat_base_url,
            &config.chat_bot_token,
        ));
        let risk: Arc<dyn RiskAnalysisService> = Arc::new(RiskAnalysisClient::new(
            &config.risk_ai_base_url,
            &config.risk_ai_api_key,
            Duration::from_secs(config.risk_ai_timeout_secs),
        ));

        let bus = EventBus::new();
        let notifier = Arc::new(Notifier::new(
            chat.clone(),
            audit.clone(),
            config.quiet_hours,
            config.notify_rate_per_min,
        ));

        let router = Arc::new(ExecutionRouter::new(
            ExecutionConfig::from_config(&config),
            broker,
            TradeSimulator::new(),
            market_data.clone(),
            trades.clone(),
            positions.clone(),
            audit.clone(),
            bus.clone(),
        ));

        let engine = Arc::new(AlertEngine::new(
            alerts.clone(),
            alert_events,
            trades.clone(),
            users.clone(),
            audit.clone(),
            market_data.clone(),
            notifier.clone(),
        ));
        bus.subscribe(engine.clone()).await;

        let orchestrator = Arc::new(TradeOrchestrator::new(
            config.clone(),
            users.clone(),
            trades,
            alerts,
            audit,
            market_data,
            risk,
            chat,
            router,
            engine.clone(),
            notifier.clone(),
        ));

        info!("Application graph assembled");
        Ok(Self {
            config,
            orchestrator,
            engine,
            notifier,
            users,
        })
    }

    /// Background loops: the deferred-alert sweep and the notification
    /// digest flush.
    pub fn start(&self) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                engine.run_sweep().await;
            }
        });

        let notifier = Arc::clone(&self.notifier);
        let users = Arc::clone(&self.users);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DIGEST_FLUSH_INTERVAL);
            loop {
                ticker.tick().await;
                for (user_id, count) in notifier.drain_expired_digests().await {
                    match users.find_by_id(&user_id).await {
                        Ok(Some(user)) => notifier.send_digest(&user, count).await,
                        Ok(None) => {}
                        Err(e) => error!("Digest resolution failed for {}: {}", user_id, e),
                    }
                }
            }
        });

        info!("Background tasks started");
    }

    pub fn http_router(&self) -> axum::Router {
        server::router(Arc::new(ChatServer {
            orchestrator: Arc::clone(&self.orchestrator),
            signing_secret: self.config.chat_signing_secret.clone(),
        }))
    }
}
