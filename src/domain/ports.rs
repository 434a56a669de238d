use crate::domain::errors::MarketDataError;
use crate::domain::trading::types::{OrderSide, OrderType, Quote};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;

// Need async_trait for async functions in traits
#[async_trait]
pub trait MarketDataService: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError>;
    /// Implied-volatility index level, cached for up to five minutes.
    async fn get_vix(&self) -> Result<Decimal, MarketDataError>;
    async fn is_market_open(&self) -> Result<bool, MarketDataError>;
    async fn validate_symbol(&self, symbol: &str) -> Result<bool, MarketDataError>;
}

#[derive(Debug, Clone)]
pub struct BrokerAccount {
    pub buying_power: Decimal,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct BrokerOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct BrokerOrder {
    pub order_id: String,
    pub status: BrokerOrderStatus,
    pub filled_quantity: i64,
    /// Volume-weighted average across the venue's fills so far.
    pub filled_avg_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOrderStatus {
    Accepted,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl BrokerOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BrokerOrderStatus::Filled | BrokerOrderStatus::Rejected | BrokerOrderStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
}

/// Paper-trading broker surface. Only the operations the router needs.
#[async_trait]
pub trait BrokerService: Send + Sync {
    async fn account(&self) -> Result<BrokerAccount>;
    async fn is_symbol_tradable(&self, symbol: &str) -> Result<bool>;
    async fn submit_order(&self, request: &BrokerOrderRequest) -> Result<BrokerOrder>;
    async fn get_order(&self, order_id: &str) -> Result<BrokerOrder>;
    async fn cancel_order(&self, order_id: &str) -> Result<()>;
    async fn positions(&self) -> Result<Vec<BrokerPosition>>;
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    /// 0 (benign) to 10 (severe). Scores of 8 and above require a
    /// typed confirmation before submit.
    pub score: u8,
    pub narrative: String,
    pub flags: Vec<String>,
}

impl RiskAssessment {
    pub fn is_high_risk(&self) -> bool {
        self.score >= 8
    }
}

#[derive(Debug, Clone)]
pub struct MarketContext {
    pub quote: Option<Quote>,
    pub vix: Option<Decimal>,
    pub market_open: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RiskAnalysisRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub order_type: OrderType,
    pub entry_price: Decimal,
}

/// Best-effort AI risk scoring. Callers bound the call with a timeout;
/// a failure never blocks submission.
#[async_trait]
pub trait RiskAnalysisService: Send + Sync {
    async fn analyze(
        &self,
        request: &RiskAnalysisRequest,
        context: &MarketContext,
    ) -> Result<RiskAssessment>;
}

/// Outbound chat platform surface (Web API). Views are pre-rendered
/// JSON; transport error handling and retries live with the callers.
#[async_trait]
pub trait ChatApiService: Send + Sync {
    /// Open a modal using a short-lived trigger id. Returns the view id.
    async fn open_view(&self, trigger_id: &str, view: &Value) -> Result<String>;
    async fn update_view(&self, view_id: &str, view: &Value) -> Result<()>;
    /// Open (or reuse) the DM channel with a chat user. Returns the channel id.
    async fn open_dm(&self, chat_user_id: &str) -> Result<String>;
    async fn post_message(&self, channel_id: &str, text: &str, blocks: Option<&Value>)
    -> Result<()>;
    async fn post_ephemeral(&self, channel_id: &str, chat_user_id: &str, text: &str) -> Result<()>;
    async fn publish_home(&self, chat_user_id: &str, view: &Value) -> Result<()>;
}

/// The shared (L2) cache tier. Failures are non-fatal by contract; the
/// in-process tier and the provider together remain correct without it.
#[async_trait]
pub trait SharedCacheService: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
}
