//! Mock collaborators for tests. Each mock records the calls it saw so
//! scenario tests can assert on delivered messages and routed orders.

use crate::domain::errors::MarketDataError;
use crate::domain::ports::{
    BrokerAccount, BrokerOrder, BrokerOrderRequest, BrokerOrderStatus, BrokerPosition,
    BrokerService, ChatApiService, MarketContext, MarketDataService, RiskAnalysisRequest,
    RiskAnalysisService, RiskAssessment, SharedCacheService,
};
use crate::domain::trading::types::{Quote, is_well_formed_symbol};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

// ===== Market data =====

#[derive(Clone, Default)]
pub struct MockMarketData {
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    vix: Arc<RwLock<Option<Decimal>>>,
    market_open: Arc<RwLock<bool>>,
    fail_quotes: Arc<RwLock<bool>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            market_open: Arc::new(RwLock::new(true)),
            ..Self::default()
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let quote = Quote {
            symbol: symbol.to_string(),
            price,
            previous_close: price,
            change: Decimal::ZERO,
            change_pct: Decimal::ZERO,
            day_high: price,
            day_low: price,
            volume: 1_000_000,
            market_cap: None,
            pe: None,
            as_of: Utc::now(),
            source_latency_ms: 1,
        };
        self.quotes.write().await.insert(symbol.to_string(), quote);
    }

    pub async fn set_vix(&self, level: Decimal) {
        *self.vix.write().await = Some(level);
    }

    pub async fn set_market_open(&self, open: bool) {
        *self.market_open.write().await = open;
    }

    pub async fn fail_quotes(&self, fail: bool) {
        *self.fail_quotes.write().await = fail;
    }
}

#[async_trait]
impl MarketDataService for MockMarketData {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        if *self.fail_quotes.read().await {
            return Err(MarketDataError::Unavailable {
                reason: "mock failure".to_string(),
            });
        }
        self.quotes
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::NotFound {
                symbol: symbol.to_string(),
            })
    }

    async fn get_vix(&self) -> Result<Decimal, MarketDataError> {
        self.vix
            .read()
            .await
            .ok_or(MarketDataError::Unavailable {
                reason: "vix not set".to_string(),
            })
    }

    async fn is_market_open(&self) -> Result<bool, MarketDataError> {
        Ok(*self.market_open.read().await)
    }

    async fn validate_symbol(&self, symbol: &str) -> Result<bool, MarketDataError> {
        if !is_well_formed_symbol(symbol) {
            return Ok(false);
        }
        Ok(self.quotes.read().await.contains_key(symbol))
    }
}

// ===== Broker =====

/// Scripted fill behavior for the mock broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillScript {
    FillImmediately,
    /// Remain accepted for N polls, then fill.
    FillAfterPolls(u32),
    Reject,
    /// Never reach a terminal status.
    NeverFill,
}

pub struct MockBroker {
    pub buying_power: RwLock<Decimal>,
    pub tradable: RwLock<bool>,
    pub script: RwLock<FillScript>,
    orders: RwLock<HashMap<String, (BrokerOrderRequest, u32)>>,
    next_id: AtomicU64,
    fill_price: RwLock<Decimal>,
}

impl MockBroker {
    pub fn new(buying_power: Decimal, fill_price: Decimal) -> Self {
        Self {
            buying_power: RwLock::new(buying_power),
            tradable: RwLock::new(true),
            script: RwLock::new(FillScript::FillImmediately),
            orders: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fill_price: RwLock::new(fill_price),
        }
    }

    pub async fn set_script(&self, script: FillScript) {
        *self.script.write().await = script;
    }

    async fn order_state(&self, order_id: &str, polls_seen: u32) -> Result<BrokerOrder> {
        let orders = self.orders.read().await;
        let (request, _) = orders
            .get(order_id)
            .ok_or_else(|| anyhow::anyhow!("unknown order {}", order_id))?;
        let script = *self.script.read().await;
        let fill_price = *self.fill_price.read().await;

        let (status, filled) = match script {
            FillScript::FillImmediately => (BrokerOrderStatus::Filled, request.quantity),
            FillScript::FillAfterPolls(n) if polls_seen >= n => {
                (BrokerOrderStatus::Filled, request.quantity)
            }
            FillScript::FillAfterPolls(_) => (BrokerOrderStatus::Accepted, 0),
            FillScript::Reject => (BrokerOrderStatus::Rejected, 0),
            FillScript::NeverFill => (BrokerOrderStatus::Accepted, 0),
        };

        Ok(BrokerOrder {
            order_id: order_id.to_string(),
            status,
            filled_quantity: filled,
            filled_avg_price: (filled > 0).then_some(fill_price),
            submitted_at: Utc::now(),
        })
    }
}

#[async_trait]
impl BrokerService for MockBroker {
    async fn account(&self) -> Result<BrokerAccount> {
        Ok(BrokerAccount {
            buying_power: *self.buying_power.read().await,
            status: "ACTIVE".to_string(),
        })
    }

    async fn is_symbol_tradable(&self, _symbol: &str) -> Result<bool> {
        Ok(*self.tradable.read().await)
    }

    async fn submit_order(&self, request: &BrokerOrderRequest) -> Result<BrokerOrder> {
        let id = format!("bo-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.orders
            .write()
            .await
            .insert(id.clone(), (request.clone(), 0));
        self.order_state(&id, 0).await
    }

    async fn get_order(&self, order_id: &str) -> Result<BrokerOrder> {
        let polls = {
            let mut orders = self.orders.write().await;
            let entry = orders
                .get_mut(order_id)
                .ok_or_else(|| anyhow::anyhow!("unknown order {}", order_id))?;
            entry.1 += 1;
            entry.1
        };
        self.order_state(order_id, polls).await
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<()> {
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(Vec::new())
    }
}

// ===== Chat API =====

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel_id: String,
    pub text: String,
    pub blocks: Option<Value>,
}

#[derive(Default)]
pub struct MockChatApi {
    pub opened_views: RwLock<Vec<(String, Value)>>,
    pub updated_views: RwLock<Vec<(String, Value)>>,
    pub messages: RwLock<Vec<SentMessage>>,
    pub ephemerals: RwLock<Vec<(String, String, String)>>,
    pub homes: RwLock<Vec<(String, Value)>>,
    pub fail_posts: RwLock<bool>,
    next_view_id: AtomicU64,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_posts(&self, fail: bool) {
        *self.fail_posts.write().await = fail;
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn update_count(&self) -> usize {
        self.updated_views.read().await.len()
    }

    pub async fn last_update_for(&self, view_id: &str) -> Option<Value> {
        self.updated_views
            .read()
            .await
            .iter()
            .rev()
            .find(|(id, _)| id == view_id)
            .map(|(_, view)| view.clone())
    }
}

#[async_trait]
impl ChatApiService for MockChatApi {
    async fn open_view(&self, trigger_id: &str, view: &Value) -> Result<String> {
        let view_id = format!("V{}", self.next_view_id.fetch_add(1, Ordering::SeqCst));
        self.opened_views
            .write()
            .await
            .push((trigger_id.to_string(), view.clone()));
        Ok(view_id)
    }

    async fn update_view(&self, view_id: &str, view: &Value) -> Result<()> {
        self.updated_views
            .write()
            .await
            .push((view_id.to_string(), view.clone()));
        Ok(())
    }

    async fn open_dm(&self, chat_user_id: &str) -> Result<String> {
        Ok(format!("D-{}", chat_user_id))
    }

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        blocks: Option<&Value>,
    ) -> Result<()> {
        if *self.fail_posts.read().await {
            anyhow::bail!("mock post failure");
        }
        self.messages.write().await.push(SentMessage {
            channel_id: channel_id.to_string(),
            text: text.to_string(),
            blocks: blocks.cloned(),
        });
        Ok(())
    }

    async fn post_ephemeral(&self, channel_id: &str, chat_user_id: &str, text: &str) -> Result<()> {
        self.ephemerals.write().await.push((
            channel_id.to_string(),
            chat_user_id.to_string(),
            text.to_string(),
        ));
        Ok(())
    }

    async fn publish_home(&self, chat_user_id: &str, view: &Value) -> Result<()> {
        self.homes
            .write()
            .await
            .push((chat_user_id.to_string(), view.clone()));
        Ok(())
    }
}

// ===== Risk analysis =====

pub struct MockRiskAnalysis {
    pub assessment: RwLock<Option<RiskAssessment>>,
}

impl MockRiskAnalysis {
    pub fn scoring(score: u8) -> Self {
        Self {
            assessment: RwLock::new(Some(RiskAssessment {
                score,
                narrative: format!("mock narrative, score {}", score),
                flags: Vec::new(),
            })),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            assessment: RwLock::new(None),
        }
    }
}

#[async_trait]
impl RiskAnalysisService for MockRiskAnalysis {
    async fn analyze(
        &self,
        _request: &RiskAnalysisRequest,
        _context: &MarketContext,
    ) -> Result<RiskAssessment> {
        self.assessment
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("risk service unavailable"))
    }
}

// ===== Shared cache =====

/// Shared cache that always misses; exercises the L1 + provider path.
pub struct NullSharedCache;

#[async_trait]
impl SharedCacheService for NullSharedCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
        Ok(())
    }
}
