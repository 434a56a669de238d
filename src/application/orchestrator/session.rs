use crate::domain::ports::RiskAssessment;
use crate::domain::trading::types::{EntryPriceSource, OrderSide, OrderType, Quote};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Workflow position of one open modal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Opened,
    Quoted,
    PreparingRisk,
    ReadyToSubmit,
    Submitting,
    Confirmed,
    Failed,
}

/// Loop-prevention token for the bidirectional field derivation. While
/// a write-back for field F is in flight, input events for the *other*
/// field are our own echo and get dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatingField {
    #[default]
    None,
    Quantity,
    Notional,
}

/// Durable scraps carried in the modal's private metadata so they
/// survive partial re-renders on the platform side.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModalMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<String>,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl ModalMetadata {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

/// Per-modal state, keyed by view id for the modal's lifetime.
#[derive(Debug, Clone)]
pub struct ModalSession {
    pub view_id: String,
    pub user_id: String,
    pub chat_user_id: String,
    pub channel_id: Option<String>,
    pub correlation_id: String,
    pub state: WorkflowState,
    pub symbol: Option<String>,
    pub quote: Option<Quote>,
    pub entry_price: Option<Decimal>,
    pub entry_price_source: EntryPriceSource,
    pub quote_failed: bool,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub quantity: Option<i64>,
    pub notional: Option<Decimal>,
    pub updating_field: UpdatingField,
    pub risk: Option<RiskAssessment>,
    /// Set when the risk collaborator failed; rendered as a hint and
    /// never blocks submit.
    pub risk_unavailable: bool,
    /// One-line error rendered at the top of the modal on a failed
    /// submission, so the user can adjust and retry in place.
    pub error_banner: Option<String>,
}

impl ModalSession {
    pub fn new(
        view_id: impl Into<String>,
        user_id: impl Into<String>,
        chat_user_id: impl Into<String>,
        channel_id: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            view_id: view_id.into(),
            user_id: user_id.into(),
            chat_user_id: chat_user_id.into(),
            channel_id,
            correlation_id: correlation_id.into(),
            state: WorkflowState::Opened,
            symbol: None,
            quote: None,
            entry_price: None,
            entry_price_source: EntryPriceSource::Quote,
            quote_failed: false,
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            limit_price: None,
            quantity: None,
            notional: None,
            updating_field: UpdatingField::None,
            risk: None,
            risk_unavailable: false,
            error_banner: None,
        }
    }

    pub fn metadata(&self) -> ModalMetadata {
        ModalMetadata {
            entry_price: self.entry_price.map(|p| p.to_string()),
            correlation_id: self.correlation_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }

    /// Submit is enabled once a priced quantity exists and the limit
    /// rule is satisfied.
    pub fn ready_to_submit(&self) -> bool {
        self.entry_price.is_some()
            && self.quantity.map(|q| q >= 1).unwrap_or(false)
            && !(self.order_type.requires_limit_price() && self.limit_price.is_none())
    }

    /// High-risk submissions need the typed ticker as confirmation.
    pub fn needs_risk_confirmation(&self) -> bool {
        self.risk.as_ref().map(|r| r.is_high_risk()).unwrap_or(false)
    }
}

/// Process-wide session store, owned by the orchestrator. Sessions are
/// dropped when the modal confirms, fails or closes.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, ModalSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: ModalSession) {
        self.sessions
            .write()
            .await
            .insert(session.view_id.clone(), session);
    }

    pub async fn get(&self, view_id: &str) -> Option<ModalSession> {
        self.sessions.read().await.get(view_id).cloned()
    }

    /// Mutate a session under the store lock and return a copy of the
    /// result. The closure must not suspend.
    pub async fn update<F, T>(&self, view_id: &str, mutate: F) -> Option<(ModalSession, T)>
    where
        F: FnOnce(&mut ModalSession) -> T,
    {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(view_id).map(|session| {
            let out = mutate(session);
            (session.clone(), out)
        })
    }

    pub async fn remove(&self, view_id: &str) -> Option<ModalSession> {
        self.sessions.write().await.remove(view_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
