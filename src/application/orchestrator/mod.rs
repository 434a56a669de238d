pub mod actions;
pub mod alert_flow;
pub mod derivation;
pub mod session;
pub mod trade_modal;

use crate::application::alerts::AlertEngine;
use crate::application::execution::ExecutionRouter;
use crate::application::notifier::Notifier;
use crate::config::Config;
use crate::domain::alerts::{AlertStatus, RiskAlertConfig};
use crate::domain::audit::{AuditAction, AuditEntry, AuditSeverity, new_correlation_id, short_correlation_id};
use crate::domain::errors::{ChatEventError, ExecutionError, MarketDataError};
use crate::domain::ports::{
    ChatApiService, MarketContext, MarketDataService, RiskAnalysisRequest, RiskAnalysisService,
};
use crate::domain::repositories::{
    AlertRepository, AuditRepository, TradeRepository, UserRepository, WriteOutcome,
};
use crate::domain::trading::types::{
    EntryPriceSource, Trade, is_well_formed_symbol,
};
use crate::domain::user::{Role, User};
use crate::infrastructure::chat::blocks::Block;
use crate::infrastructure::chat::events::ChatEvent;
use actions::ActionId;
use derivation::{
    derive_notional, derive_quantity, extract_price_from_display, parse_money, parse_quantity,
};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use session::{ModalMetadata, ModalSession, SessionStore, UpdatingField, WorkflowState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What the inbound HTTP handler should answer with inside the
/// platform's ack deadline.
#[derive(Debug, Clone)]
pub enum Ack {
    Empty,
    /// Ephemeral text answering a slash command.
    Text(String),
    /// `response_action` payload answering a view submission.
    ResponseAction(Value),
}

/// Drives the per-user, per-modal trade workflow and the alert
/// configuration flows. Owns the session store; detached tasks address
/// modals only by view id, never by trigger id.
pub struct TradeOrchestrator {
    config: Config,
    users: Arc<dyn UserRepository>,
    trades: Arc<dyn TradeRepository>,
    alerts: Arc<dyn AlertRepository>,
    audit: Arc<dyn AuditRepository>,
    market_data: Arc<dyn MarketDataService>,
    risk: Arc<dyn RiskAnalysisService>,
    chat: Arc<dyn ChatApiService>,
    router: Arc<ExecutionRouter>,
    engine: Arc<AlertEngine>,
    notifier: Arc<Notifier>,
    sessions: SessionStore,
}

impl TradeOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        users: Arc<dyn UserRepository>,
        trades: Arc<dyn TradeRepository>,
        alerts: Arc<dyn AlertRepository>,
        audit: Arc<dyn AuditRepository>,
        market_data: Arc<dyn MarketDataService>,
        risk: Arc<dyn RiskAnalysisService>,
        chat: Arc<dyn ChatApiService>,
        router: Arc<ExecutionRouter>,
        engine: Arc<AlertEngine>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            config,
            users,
            trades,
            alerts,
            audit,
            market_data,
            risk,
            chat,
            router,
            engine,
            notifier,
            sessions: SessionStore::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Single entry point for every inbound chat event. Returns the ack
    /// payload; anything slower than the deadline runs detached.
    pub async fn handle_event(self: &Arc<Self>, event: ChatEvent) -> Result<Ack, ChatEventError> {
        match event {
            ChatEvent::SlashCommand {
                command,
                chat_user_id,
                user_name,
                channel_id,
                trigger_id,
                ..
            } => {
                self.handle_slash_command(&command, &chat_user_id, &user_name, channel_id, &trigger_id)
                    .await
            }
            ChatEvent::BlockAction {
                action_id,
                value,
                chat_user_id,
                view_id,
                channel_id,
                private_metadata,
                price_display,
                ..
            } => {
                self.handle_block_action(
                    ActionId::parse(&action_id),
                    value,
                    &chat_user_id,
                    view_id,
                    channel_id,
                    private_metadata,
                    price_display,
                )
                .await?;
                Ok(Ack::Empty)
            }
            ChatEvent::ViewSubmission {
                callback_id,
                view_id,
                chat_user_id,
                state,
                private_metadata,
            } => {
                self.handle_view_submission(&callback_id, &view_id, &chat_user_id, state, &private_metadata)
                    .await
            }
            ChatEvent::ViewClosed { view_id, .. } => {
                // User cancellation tears down the session; persisted
                // trades are never rolled back.
                self.sessions.remove(&view_id).await;
                Ok(Ack::Empty)
            }
            ChatEvent::HomeOpened { chat_user_id } => {
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    orchestrator.render_home(&chat_user_id).await;
                });
                Ok(Ack::Empty)
            }
        }
    }

    /// Resolve the chat user, provisioning a Trader on first contact.
    async fn resolve_user(&self, chat_user_id: &str, user_name: &str) -> anyhow::Result<User> {
        if let Some(user) = self.users.find_by_chat_id(chat_user_id).await? {
            return Ok(user);
        }
        let display_name = if user_name.is_empty() {
            chat_user_id.to_string()
        } else {
            user_name.to_string()
        };
        let user = User::new(chat_user_id, display_name, Role::Trader);
        self.users.create(&user).await?;
        self.audit
            .append(&AuditEntry::new(
                Some(user.user_id.clone()),
                AuditAction::UserCreated,
                "user",
                user.user_id.clone(),
                new_correlation_id(),
            ))
            .await?;
        info!("Provisioned chat user {} as trader", chat_user_id);
        Ok(user)
    }

    async fn audit_policy_violation(&self, user: Option<&User>, reason: &str, correlation_id: &str) {
        let entry = AuditEntry::new(
            user.map(|u| u.user_id.clone()),
            AuditAction::PolicyViolation,
            "chat_event",
            correlation_id.to_string(),
            correlation_id,
        )
        .with_severity(AuditSeverity::High)
        .with_after(json!({"reason": reason}));
        if let Err(e) = self.audit.append(&entry).await {
            error!("Failed to audit policy violation: {}", e);
        }
    }

    async fn handle_slash_command(
        self: &Arc<Self>,
        command: &str,
        chat_user_id: &str,
        user_name: &str,
        channel_id: Option<String>,
        trigger_id: &str,
    ) -> Result<Ack, ChatEventError> {
        let correlation_id = new_correlation_id();
        let user = match self.resolve_user(chat_user_id, user_name).await {
            Ok(user) => user,
            Err(e) => {
                error!("User resolution failed: {}", e);
                return Ok(Ack::Text(format!(
                    "Something went wrong — try again (ref {})",
                    short_correlation_id(&correlation_id)
                )));
            }
        };

        if !user.is_active() {
            self.audit_policy_violation(Some(&user), "suspended user invoked a command", &correlation_id)
                .await;
            return Ok(Ack::Text(
                "Your account is suspended. Contact an administrator.".to_string(),
            ));
        }

        match command {
            "/trade" => {
                if let Some(channel) = &channel_id {
                    if !self.config.channel_approved(channel) {
                        self.audit_policy_violation(
                            Some(&user),
                            &format!("/trade invoked in unapproved channel {}", channel),
                            &correlation_id,
                        )
                        .await;
                        return Ok(Ack::Text(
                            "Trading is not enabled in this channel.".to_string(),
                        ));
                    }
                }

                // The trigger id expires in seconds, so the modal opens
                // on the ack path; everything after goes by view id.
                let mut session =
                    ModalSession::new("", user.user_id.clone(), chat_user_id, channel_id, correlation_id.clone());
                let view = trade_modal::build_trade_modal(&session).to_value();
                match self.chat.open_view(trigger_id, &view).await {
                    Ok(view_id) => {
                        session.view_id = view_id;
                        self.sessions.insert(session).await;
                        Ok(Ack::Empty)
                    }
                    Err(e) => {
                        warn!("views.open failed: {}", e);
                        Ok(Ack::Text(format!(
                            "Could not open the trade window — try again (ref {})",
                            short_correlation_id(&correlation_id)
                        )))
                    }
                }
            }
            "/risk-alert" => {
                let view = alert_flow::build_alert_modal().to_value();
                match self.chat.open_view(trigger_id, &view).await {
                    Ok(_) => Ok(Ack::Empty),
                    Err(e) => {
                        warn!("views.open failed for alert modal: {}", e);
                        Ok(Ack::Text(format!(
                            "Could not open the alert window — try again (ref {})",
                            short_correlation_id(&correlation_id)
                        )))
                    }
                }
            }
            "/risk-alerts" => {
                let alerts = self
                    .alerts
                    .find_by_owner(&user.user_id)
                    .await
                    .unwrap_or_default();
                let blocks = alert_flow::alert_list_blocks(&alerts);
                let blocks_json = serde_json::to_value(&blocks).unwrap_or(Value::Null);
                // The interactive list always goes to the DM; in-channel
                // invocations get a pointer so nothing leaks publicly.
                let delivered = match self.chat.open_dm(chat_user_id).await {
                    Ok(dm) => self
                        .chat
                        .post_message(&dm, "Your risk alerts", Some(&blocks_json))
                        .await
                        .is_ok(),
                    Err(_) => false,
                };
                if !delivered {
                    return Ok(Ack::Text("Could not list alerts — try again.".to_string()));
                }
                if channel_id.is_some() {
                    Ok(Ack::Text("Sent your risk alerts to your DMs.".to_string()))
                } else {
                    Ok(Ack::Empty)
                }
            }
            other => Ok(Ack::Text(format!("Unknown command: {}", other))),
        }
    }

    /// Effective entry price for a derivation. The rendered display
    /// block is authoritative; the session and the modal's private
    /// metadata are the re-render-proof fallbacks.
    fn effective_price(
        session: &ModalSession,
        price_display: Option<&str>,
        metadata: Option<&str>,
    ) -> Option<Decimal> {
        price_display
            .and_then(extract_price_from_display)
            .or(session.entry_price)
            .or_else(|| {
                metadata
                    .map(ModalMetadata::decode)
                    .and_then(|m| m.entry_price)
                    .and_then(|raw| raw.parse().ok())
            })
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_block_action(
        self: &Arc<Self>,
        action: ActionId,
        value: Option<String>,
        chat_user_id: &str,
        view_id: Option<String>,
        channel_id: Option<String>,
        private_metadata: Option<String>,
        price_display: Option<String>,
    ) -> Result<(), ChatEventError> {
        match action {
            ActionId::SymbolInput => {
                let Some(view_id) = view_id else { return Ok(()) };
                let symbol = value.unwrap_or_default().trim().to_ascii_uppercase();
                if symbol.is_empty() || !is_well_formed_symbol(&symbol) {
                    return Ok(());
                }
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    orchestrator.fetch_quote_into_modal(&view_id, &symbol).await;
                });
                Ok(())
            }
            ActionId::QuantityInput => {
                let Some(view_id) = view_id else { return Ok(()) };
                self.derive_field(
                    &view_id,
                    UpdatingField::Quantity,
                    value.unwrap_or_default(),
                    price_display.as_deref(),
                    private_metadata.as_deref(),
                )
                .await;
                Ok(())
            }
            ActionId::NotionalInput => {
                let Some(view_id) = view_id else { return Ok(()) };
                self.derive_field(
                    &view_id,
                    UpdatingField::Notional,
                    value.unwrap_or_default(),
                    price_display.as_deref(),
                    private_metadata.as_deref(),
                )
                .await;
                Ok(())
            }
            ActionId::SideSelect => {
                let Some(view_id) = view_id else { return Ok(()) };
                if let Some(side) = value.as_deref().and_then(crate::domain::trading::types::OrderSide::parse) {
                    self.mutate_and_render(&view_id, |s| s.side = side).await;
                }
                Ok(())
            }
            ActionId::OrderTypeSelect => {
                let Some(view_id) = view_id else { return Ok(()) };
                if let Some(order_type) =
                    value.as_deref().and_then(crate::domain::trading::types::OrderType::parse)
                {
                    self.mutate_and_render(&view_id, |s| s.order_type = order_type)
                        .await;
                }
                Ok(())
            }
            ActionId::LimitPriceInput => {
                let Some(view_id) = view_id else { return Ok(()) };
                let price = value.as_deref().and_then(parse_money);
                self.mutate_and_render(&view_id, |s| s.limit_price = price).await;
                Ok(())
            }
            ActionId::EntryPriceInput => {
                let Some(view_id) = view_id else { return Ok(()) };
                if let Some(price) = value.as_deref().and_then(parse_money) {
                    self.mutate_and_render(&view_id, |s| {
                        s.entry_price = Some(price);
                        s.entry_price_source = EntryPriceSource::User;
                        s.state = WorkflowState::Quoted;
                        if let Some(qty) = s.quantity {
                            s.notional = Some(derive_notional(qty, price));
                        }
                    })
                    .await;
                }
                Ok(())
            }
            ActionId::AnalyzeRisk => {
                let Some(view_id) = view_id else { return Ok(()) };
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    orchestrator.analyze_risk_into_modal(&view_id).await;
                });
                Ok(())
            }
            ActionId::AlertPause => {
                self.transition_alert(value.as_deref(), chat_user_id, channel_id, AlertStatus::Paused)
                    .await;
                Ok(())
            }
            ActionId::AlertResume => {
                self.transition_alert(value.as_deref(), chat_user_id, channel_id, AlertStatus::Active)
                    .await;
                Ok(())
            }
            ActionId::AlertDelete => {
                self.transition_alert(value.as_deref(), chat_user_id, channel_id, AlertStatus::Deleted)
                    .await;
                Ok(())
            }
            ActionId::ConfirmTokenInput => Ok(()),
            ActionId::Unknown(raw) => {
                warn!("Rejected unknown action id: {}", raw);
                Err(ChatEventError::UnknownAction { action_id: raw })
            }
        }
    }

    /// Detached quote fetch keyed by view id. A rate-limit or provider
    /// failure leaves the workflow in the symbol stage with submit
    /// disabled; an outage additionally opens manual price entry.
    async fn fetch_quote_into_modal(self: &Arc<Self>, view_id: &str, symbol: &str) {
        let known = self.market_data.validate_symbol(symbol).await.unwrap_or(false);
        if !known {
            let updated = self
                .sessions
                .update(view_id, |s| {
                    s.symbol = Some(symbol.to_string());
                    s.quote = None;
                    s.entry_price = None;
                    s.error_banner = Some(format!("Unknown symbol {} — check the symbol", symbol));
                })
                .await;
            if let Some((session, _)) = updated {
                self.render(&session).await;
            }
            return;
        }

        // Bounded by the deadline inherited from the originating event.
        let deadline = Duration::from_secs(self.config.external_call_deadline_secs);
        let fetched = match tokio::time::timeout(deadline, self.market_data.get_quote(symbol)).await
        {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Unavailable {
                reason: format!("quote fetch exceeded {:?}", deadline),
            }),
        };

        match fetched {
            Ok(quote) => {
                let updated = self
                    .sessions
                    .update(view_id, |s| {
                        s.symbol = Some(symbol.to_string());
                        s.entry_price = Some(quote.price);
                        s.entry_price_source = EntryPriceSource::Quote;
                        s.quote = Some(quote.clone());
                        s.quote_failed = false;
                        s.error_banner = None;
                        s.state = WorkflowState::Quoted;
                        if let Some(qty) = s.quantity {
                            s.notional = Some(derive_notional(qty, quote.price));
                        }
                    })
                    .await;
                if let Some((session, _)) = updated {
                    self.render(&session).await;
                }
            }
            Err(e @ MarketDataError::RateLimited) | Err(e @ MarketDataError::CircuitOpen { .. }) => {
                // Keep the symbol stage; no synchronous retry.
                warn!("Quote for {} backpressured: {}", symbol, e);
                let updated = self
                    .sessions
                    .update(view_id, |s| {
                        s.symbol = Some(symbol.to_string());
                        s.error_banner =
                            Some("Quotes are briefly unavailable — try again in a moment".to_string());
                    })
                    .await;
                if let Some((session, _)) = updated {
                    self.render(&session).await;
                }
            }
            Err(e) => {
                warn!("Quote for {} failed: {}", symbol, e);
                let updated = self
                    .sessions
                    .update(view_id, |s| {
                        s.symbol = Some(symbol.to_string());
                        s.quote_failed = true;
                        s.entry_price = None;
                        s.error_banner = None;
                    })
                    .await;
                if let Some((session, _)) = updated {
                    self.render(&session).await;
                }
            }
        }
    }

    /// One leg of the bidirectional derivation, serialized per modal by
    /// the `updating_field` token.
    async fn derive_field(
        &self,
        view_id: &str,
        field: UpdatingField,
        raw_value: String,
        price_display: Option<&str>,
        metadata: Option<&str>,
    ) {
        let outcome = self
            .sessions
            .update(view_id, |session| {
                // An in-flight write-back for the other field means this
                // event is our own echo: drop it.
                if session.updating_field != UpdatingField::None && session.updating_field != field
                {
                    return false;
                }

                let price = Self::effective_price(session, price_display, metadata);

                match field {
                    UpdatingField::Quantity => {
                        let Some(quantity) = parse_quantity(&raw_value) else {
                            return false;
                        };
                        session.quantity = Some(quantity);
                        let Some(price) = price else { return false };
                        if price <= Decimal::ZERO {
                            return false;
                        }
                        session.updating_field = UpdatingField::Quantity;
                        session.notional = Some(derive_notional(quantity, price));
                        true
                    }
                    UpdatingField::Notional => {
                        let Some(notional) = parse_money(&raw_value) else {
                            return false;
                        };
                        session.notional = Some(notional);
                        let Some(price) = price else { return false };
                        // Division by zero is a no-op, not an exception.
                        let Some(quantity) = derive_quantity(notional, price) else {
                            return false;
                        };
                        session.updating_field = UpdatingField::Notional;
                        session.quantity = Some(quantity);
                        true
                    }
                    UpdatingField::None => false,
                }
            })
            .await;

        let Some((session, wrote_back)) = outcome else {
            return;
        };
        if !wrote_back {
            return;
        }

        // Write the dependent field back, then clear the token on ack.
        self.render(&session).await;
        self.sessions
            .update(view_id, |s| s.updating_field = UpdatingField::None)
            .await;
    }

    async fn mutate_and_render<F>(&self, view_id: &str, mutate: F)
    where
        F: FnOnce(&mut ModalSession),
    {
        if let Some((session, _)) = self.sessions.update(view_id, mutate).await {
            self.render(&session).await;
        }
    }

    async fn render(&self, session: &ModalSession) {
        let view = trade_modal::build_trade_modal(session).to_value();
        if let Err(e) = self.chat.update_view(&session.view_id, &view).await {
            warn!("views.update failed for {}: {}", session.view_id, e);
        }
    }

    /// Best-effort AI risk call, bounded by the configured timeout. A
    /// failure renders "risk unavailable" and never blocks submit.
    async fn analyze_risk_into_modal(self: &Arc<Self>, view_id: &str) {
        let Some(session) = self.sessions.get(view_id).await else {
            return;
        };
        let (Some(symbol), Some(entry_price), Some(quantity)) =
            (session.symbol.clone(), session.entry_price, session.quantity)
        else {
            self.mutate_and_render(view_id, |s| {
                s.error_banner =
                    Some("Complete symbol, price and quantity before analyzing risk".to_string());
            })
            .await;
            return;
        };

        self.mutate_and_render(view_id, |s| {
            s.state = WorkflowState::PreparingRisk;
            s.error_banner = None;
        })
        .await;

        let request = RiskAnalysisRequest {
            symbol: symbol.clone(),
            side: session.side,
            quantity,
            order_type: session.order_type,
            entry_price,
        };
        let context = MarketContext {
            quote: session.quote.clone(),
            vix: self.market_data.get_vix().await.ok(),
            market_open: self.market_data.is_market_open().await.ok(),
        };

        let deadline = Duration::from_secs(self.config.risk_ai_timeout_secs);
        let result = tokio::time::timeout(deadline, self.risk.analyze(&request, &context)).await;

        match result {
            Ok(Ok(assessment)) => {
                info!("Risk score {} for {} x{}", assessment.score, symbol, quantity);
                self.mutate_and_render(view_id, |s| {
                    s.risk = Some(assessment);
                    s.risk_unavailable = false;
                    s.state = WorkflowState::ReadyToSubmit;
                })
                .await;
            }
            Ok(Err(e)) => {
                warn!("Risk analysis failed: {}", e);
                self.mutate_and_render(view_id, |s| {
                    s.risk = None;
                    s.risk_unavailable = true;
                    s.state = WorkflowState::Quoted;
                })
                .await;
            }
            Err(_) => {
                warn!("Risk analysis timed out after {:?}", deadline);
                self.mutate_and_render(view_id, |s| {
                    s.risk = None;
                    s.risk_unavailable = true;
                    s.state = WorkflowState::Quoted;
                })
                .await;
            }
        }
    }

    async fn transition_alert(
        &self,
        alert_id: Option<&str>,
        chat_user_id: &str,
        channel_id: Option<String>,
        target: AlertStatus,
    ) {
        let Some(alert_id) = alert_id else { return };
        let correlation_id = new_correlation_id();

        let user = match self.users.find_by_chat_id(chat_user_id).await {
            Ok(Some(user)) => user,
            _ => return,
        };
        let alert = match self.alerts.find_by_id(alert_id).await {
            Ok(Some(alert)) => alert,
            _ => return,
        };
        if alert.owner_user_id != user.user_id && user.role != Role::Admin {
            self.audit_policy_violation(
                Some(&user),
                &format!("attempted to modify alert {} owned by another user", alert_id),
                &correlation_id,
            )
            .await;
            return;
        }

        let valid = matches!(
            (alert.status, target),
            (AlertStatus::Active, AlertStatus::Paused)
                | (AlertStatus::Paused, AlertStatus::Active)
                | (AlertStatus::Active, AlertStatus::Deleted)
                | (AlertStatus::Paused, AlertStatus::Deleted)
        );
        if !valid {
            return;
        }

        if let Err(e) = self.alerts.set_status(alert_id, target).await {
            error!("Alert transition failed: {}", e);
            return;
        }
        let entry = AuditEntry::new(
            Some(user.user_id.clone()),
            AuditAction::AlertStatusChanged,
            "alert",
            alert_id.to_string(),
            &correlation_id,
        )
        .with_before(json!({"status": alert.status.as_str()}))
        .with_after(json!({"status": target.as_str()}));
        if let Err(e) = self.audit.append(&entry).await {
            error!("Failed to audit alert transition: {}", e);
        }

        let text = match target {
            AlertStatus::Paused => format!("Alert '{}' paused.", alert.name),
            AlertStatus::Active => format!("Alert '{}' resumed.", alert.name),
            AlertStatus::Deleted => format!(
                "Alert '{}' deleted. Deletion is soft — an admin can restore it.",
                alert.name
            ),
        };
        match channel_id {
            Some(channel) => {
                let _ = self.chat.post_ephemeral(&channel, chat_user_id, &text).await;
            }
            None => {
                if let Ok(dm) = self.chat.open_dm(chat_user_id).await {
                    let _ = self.chat.post_message(&dm, &text, None).await;
                }
            }
        }
    }

    async fn handle_view_submission(
        self: &Arc<Self>,
        callback_id: &str,
        view_id: &str,
        chat_user_id: &str,
        state: Value,
        private_metadata: &str,
    ) -> Result<Ack, ChatEventError> {
        match callback_id {
            trade_modal::TRADE_MODAL_CALLBACK => {
                self.handle_trade_submission(view_id, chat_user_id, state, private_metadata)
                    .await
            }
            alert_flow::ALERT_MODAL_CALLBACK => {
                self.handle_alert_submission(view_id, chat_user_id, state).await
            }
            other => Err(ChatEventError::Malformed {
                reason: format!("unknown view callback: {}", other),
            }),
        }
    }

    async fn handle_trade_submission(
        self: &Arc<Self>,
        view_id: &str,
        chat_user_id: &str,
        state: Value,
        private_metadata: &str,
    ) -> Result<Ack, ChatEventError> {
        let input = trade_modal::parse_submission(&state);

        let merged = self
            .sessions
            .update(view_id, |session| {
                if let Some(symbol) = &input.symbol {
                    session.symbol = Some(symbol.clone());
                }
                if let Some(side) = input.side {
                    session.side = side;
                }
                if let Some(order_type) = input.order_type {
                    session.order_type = order_type;
                }
                if input.limit_price.is_some() {
                    session.limit_price = input.limit_price;
                }
                if let Some(quantity) = input.quantity {
                    session.quantity = Some(quantity);
                }
                if let Some(notional) = input.notional {
                    session.notional = Some(notional);
                }
                if session.entry_price.is_none() {
                    if let Some(price) = input.manual_entry_price {
                        session.entry_price = Some(price);
                        session.entry_price_source = EntryPriceSource::User;
                    }
                }
                if session.entry_price.is_none() {
                    // Metadata survives re-renders even when the session
                    // predates a process restart.
                    let metadata = ModalMetadata::decode(private_metadata);
                    session.entry_price = metadata.entry_price.and_then(|p| p.parse().ok());
                }
                session.error_banner = None;
            })
            .await;

        let Some((session, ())) = merged else {
            // Session evaporated (restart or closed elsewhere).
            return Ok(Ack::ResponseAction(json!({
                "response_action": "errors",
                "errors": {
                    "trade_symbol_input_block": "This window expired — run /trade again"
                }
            })));
        };

        if let Some(errors) = trade_modal::validation_errors(&session, &input) {
            return Ok(Ack::ResponseAction(json!({
                "response_action": "errors",
                "errors": errors,
            })));
        }

        let trade = Trade::pending(
            session.user_id.clone(),
            session.symbol.clone().unwrap_or_default(),
            session.side,
            session.quantity.unwrap_or(0),
            session.order_type,
            session.limit_price,
            session.entry_price.unwrap_or_default(),
            session.entry_price_source,
        );

        let (submitting, _) = self
            .sessions
            .update(view_id, |s| s.state = WorkflowState::Submitting)
            .await
            .unwrap_or((session.clone(), ()));

        let orchestrator = Arc::clone(self);
        let chat_user = chat_user_id.to_string();
        let task_view_id = view_id.to_string();
        tokio::spawn(async move {
            orchestrator
                .execute_submission(&task_view_id, &chat_user, trade)
                .await;
        });

        // Optimistic confirmation inside the ack deadline.
        Ok(Ack::ResponseAction(json!({
            "response_action": "update",
            "view": trade_modal::submitting_view(&submitting).to_value(),
        })))
    }

    /// Detached execution: routes the trade, then updates the modal by
    /// view id with fallback ordering modal-update -> DM -> ephemeral.
    async fn execute_submission(self: &Arc<Self>, view_id: &str, chat_user_id: &str, trade: Trade) {
        let session = self.sessions.get(view_id).await;
        let correlation_id = session
            .as_ref()
            .map(|s| s.correlation_id.clone())
            .unwrap_or_else(new_correlation_id);
        let op_id = format!("view:{}", view_id);

        let result = self.router.execute(trade.clone(), &op_id, &correlation_id).await;

        match result {
            Ok(report) if report.success => {
                let confirmed = self
                    .sessions
                    .update(view_id, |s| s.state = WorkflowState::Confirmed)
                    .await
                    .map(|(s, _)| s);
                let fallback_session = confirmed.unwrap_or_else(|| {
                    let mut s = ModalSession::new(
                        view_id,
                        trade.user_id.clone(),
                        chat_user_id,
                        None,
                        correlation_id.clone(),
                    );
                    s.symbol = Some(trade.symbol.clone());
                    s
                });
                let view = trade_modal::confirmed_view(&fallback_session, &trade, &report).to_value();
                self.deliver_outcome(
                    &fallback_session,
                    &view,
                    &format!(
                        "Trade confirmed: {} {} × {} @ {}",
                        trade.side,
                        trade.symbol,
                        report.filled_quantity,
                        report
                            .fill_price
                            .map(|p| format!("${}", p))
                            .unwrap_or_else(|| "—".to_string())
                    ),
                )
                .await;

                if let Ok(Some(user)) = self.users.find_by_id(&trade.user_id).await {
                    self.notifier.send_confirmation(&user, &trade, &report).await;
                }
                self.sessions.remove(view_id).await;
            }
            Ok(report) => {
                // Persisted but not cleanly filled (timeout, reject,
                // partial): surface the state and keep the session for
                // a retry.
                let message = report
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("order finished as {}", report.status));
                self.fail_modal(view_id, chat_user_id, &trade, &message, &correlation_id)
                    .await;
            }
            Err(e) => {
                if let ExecutionError::Internal { reason } = &e {
                    let entry = AuditEntry::new(
                        Some(trade.user_id.clone()),
                        AuditAction::SystemError,
                        "trade",
                        trade.trade_id.clone(),
                        &correlation_id,
                    )
                    .with_severity(AuditSeverity::Error)
                    .with_after(json!({"reason": reason}));
                    if let Err(audit_err) = self.audit.append(&entry).await {
                        error!("Failed to audit system error: {}", audit_err);
                    }
                }
                let message = user_facing_error(&e);
                self.fail_modal(view_id, chat_user_id, &trade, &message, &correlation_id)
                    .await;
            }
        }
    }

    async fn fail_modal(
        &self,
        view_id: &str,
        chat_user_id: &str,
        trade: &Trade,
        message: &str,
        correlation_id: &str,
    ) {
        let short = short_correlation_id(correlation_id);
        let banner = format!("{} (ref {})", message, short);
        let failed = self
            .sessions
            .update(view_id, |s| {
                s.state = WorkflowState::Failed;
                s.error_banner = Some(banner.clone());
            })
            .await
            .map(|(s, _)| s);

        match failed {
            Some(session) => {
                // Full modal again so the user can adjust and retry.
                let view = trade_modal::build_trade_modal(&session).to_value();
                self.deliver_outcome(&session, &view, &banner).await;
            }
            None => {
                let mut session = ModalSession::new(
                    view_id,
                    trade.user_id.clone(),
                    chat_user_id,
                    None,
                    correlation_id.to_string(),
                );
                session.symbol = Some(trade.symbol.clone());
                let view = trade_modal::failed_view(&session, message, short).to_value();
                self.deliver_outcome(&session, &view, &banner).await;
            }
        }
    }

    /// Fallback ordering when no channel context is available:
    /// modal-update -> direct message -> ephemeral channel message.
    async fn deliver_outcome(&self, session: &ModalSession, view: &Value, text: &str) {
        if self.chat.update_view(&session.view_id, view).await.is_ok() {
            return;
        }
        if let Ok(dm) = self.chat.open_dm(&session.chat_user_id).await {
            if self.chat.post_message(&dm, text, None).await.is_ok() {
                return;
            }
        }
        if let Some(channel) = &session.channel_id {
            let _ = self
                .chat
                .post_ephemeral(channel, &session.chat_user_id, text)
                .await;
        }
    }

    async fn handle_alert_submission(
        self: &Arc<Self>,
        view_id: &str,
        chat_user_id: &str,
        state: Value,
    ) -> Result<Ack, ChatEventError> {
        let input = alert_flow::parse_alert_submission(&state);
        if let Some(errors) = alert_flow::alert_validation_errors(&input) {
            return Ok(Ack::ResponseAction(json!({
                "response_action": "errors",
                "errors": errors,
            })));
        }

        let correlation_id = new_correlation_id();
        let user = match self.resolve_user(chat_user_id, "").await {
            Ok(user) => user,
            Err(e) => {
                error!("User resolution failed during alert creation: {}", e);
                return Ok(Ack::ResponseAction(json!({
                    "response_action": "errors",
                    "errors": {"alert_name_input_block": format!(
                        "Something went wrong — try again (ref {})",
                        short_correlation_id(&correlation_id)
                    )},
                })));
            }
        };

        let alert = RiskAlertConfig::new(
            user.user_id.clone(),
            input.name.clone().unwrap_or_default(),
            input.trade_size_threshold.unwrap_or_default(),
            input.loss_pct_threshold.unwrap_or_default(),
            input.vix_threshold.unwrap_or_default(),
            input.monitor_new,
            input.scan_existing,
        );

        let op_id = format!("view:{}", view_id);
        match self.alerts.create(&alert, &op_id).await {
            Ok(WriteOutcome::Applied) => {
                let entry = AuditEntry::new(
                    Some(user.user_id.clone()),
                    AuditAction::AlertCreated,
                    "alert",
                    alert.alert_id.clone(),
                    &correlation_id,
                )
                .with_after(json!({
                    "name": alert.name,
                    "trade_size_threshold": alert.trade_size_threshold.to_string(),
                    "loss_pct_threshold": alert.loss_pct_threshold.to_string(),
                    "vix_threshold": alert.vix_threshold.to_string(),
                }));
                if let Err(e) = self.audit.append(&entry).await {
                    error!("Failed to audit alert creation: {}", e);
                }

                if alert.scan_existing_at_create {
                    let engine = Arc::clone(&self.engine);
                    let scan_alert = alert.clone();
                    let scan_correlation = correlation_id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = engine.scan_existing(&scan_alert, &scan_correlation).await {
                            error!("Scan for new alert {} failed: {}", scan_alert.alert_id, e);
                        }
                    });
                }

                Ok(Ack::ResponseAction(json!({
                    "response_action": "update",
                    "view": alert_flow::alert_created_view(&alert).to_value(),
                })))
            }
            Ok(WriteOutcome::Duplicate) => Ok(Ack::ResponseAction(json!({
                "response_action": "update",
                "view": alert_flow::alert_created_view(&alert).to_value(),
            }))),
            Err(e) => {
                error!("Alert creation failed: {}", e);
                Ok(Ack::ResponseAction(json!({
                    "response_action": "errors",
                    "errors": {"alert_name_input_block": format!(
                        "Something went wrong — try again (ref {})",
                        short_correlation_id(&correlation_id)
                    )},
                })))
            }
        }
    }

    /// Home-tab summary. Best-effort: failures are logged, never
    /// surfaced.
    async fn render_home(self: &Arc<Self>, chat_user_id: &str) {
        let Ok(user) = self.resolve_user(chat_user_id, "").await else {
            return;
        };
        let trades = self
            .trades
            .find_recent_by_user(&user.user_id, 5)
            .await
            .unwrap_or_default();
        let alerts = self
            .alerts
            .find_by_owner(&user.user_id)
            .await
            .unwrap_or_default();
        let active_alerts = alerts.iter().filter(|a| a.is_active()).count();

        let mut blocks = vec![Block::section(format!(
            "*Welcome back, {}.*\nActive alerts: {}",
            user.display_name, active_alerts
        ))];
        if trades.is_empty() {
            blocks.push(Block::context("No trades yet — start with /trade."));
        } else {
            blocks.push(Block::Divider);
            for trade in &trades {
                blocks.push(Block::section(format!(
                    "{} *{}* × {} — {}",
                    trade.side, trade.symbol, trade.quantity, trade.status
                )));
            }
        }

        let view = crate::infrastructure::chat::blocks::HomeView::new(blocks).to_value();
        if let Err(e) = self.chat.publish_home(chat_user_id, &view).await {
            warn!("views.publish failed for {}: {}", chat_user_id, e);
        }
    }
}

/// Map router errors to the imperative, trace-free messages the modal
/// shows.
fn user_facing_error(error: &ExecutionError) -> String {
    match error {
        ExecutionError::Validation { reason } => format!("Check the order: {}", reason),
        ExecutionError::InsufficientFunds { need, available } => format!(
            "Insufficient buying power: need ${}, available ${}",
            need, available
        ),
        ExecutionError::MarketClosed { symbol } => {
            format!("Market is closed for {} — queue a limit order instead", symbol)
        }
        ExecutionError::BrokerUnavailable { .. } => {
            "The broker is unavailable — retry".to_string()
        }
        ExecutionError::Rejected { reason } => format!("Order rejected: {}", reason),
        ExecutionError::Timeout { .. } => {
            "The order is submitted but unconfirmed — check back shortly".to_string()
        }
        ExecutionError::Internal { .. } => "Something went wrong — retry".to_string(),
    }
}
