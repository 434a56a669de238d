use crate::application::execution::simulator::TradeSimulator;
use crate::config::Config;
use crate::domain::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::domain::errors::ExecutionError;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{BrokerOrderRequest, BrokerOrderStatus, BrokerService, MarketDataService};
use crate::domain::repositories::{
    AuditRepository, PositionRepository, TradeRepository, WriteOutcome,
};
use crate::domain::trading::position::Position;
use crate::domain::trading::types::{
    ExecutionReport, OrderType, Trade, TradeStatus, Venue, is_well_formed_symbol,
};
use crate::infrastructure::broker::{PAPER_KEY_PREFIX, is_paper_host};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Fill-poll backoff schedule; the final step repeats until the budget
/// runs out.
const POLL_SCHEDULE_MS: [u64; 5] = [250, 500, 1000, 2000, 4000];
const POLL_BUDGET: Duration = Duration::from_secs(15);

/// Routing guards distilled from configuration at build time.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub use_real_trading: bool,
    pub broker_enabled: bool,
    pub broker_key_id: String,
    pub broker_base_url: String,
    pub after_hours_limit_orders: bool,
    pub max_position_size: i64,
    pub max_trade_value: Decimal,
}

impl ExecutionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            use_real_trading: config.use_real_trading,
            broker_enabled: config.broker_enabled,
            broker_key_id: config.broker_key_id.clone(),
            broker_base_url: config.broker_base_url.clone(),
            after_hours_limit_orders: config.after_hours_limit_orders,
            max_position_size: config.max_position_size,
            max_trade_value: config.max_trade_value,
        }
    }
}

/// Where an order goes and why it was downgraded, if it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub venue: Venue,
    pub downgrade_reason: Option<String>,
    pub severity: AuditSeverity,
}

impl RoutingDecision {
    fn simulator() -> Self {
        Self {
            venue: Venue::Simulator,
            downgrade_reason: None,
            severity: AuditSeverity::Info,
        }
    }

    fn downgrade(reason: impl Into<String>, severity: AuditSeverity) -> Self {
        Self {
            venue: Venue::Simulator,
            downgrade_reason: Some(reason.into()),
            severity,
        }
    }
}

/// Selects the venue, validates preconditions, submits, monitors the
/// fill and persists the outcome atomically before emitting the
/// trade-executed event.
pub struct ExecutionRouter {
    config: ExecutionConfig,
    broker: Arc<dyn BrokerService>,
    simulator: TradeSimulator,
    market_data: Arc<dyn MarketDataService>,
    trades: Arc<dyn TradeRepository>,
    positions: Arc<dyn PositionRepository>,
    audit: Arc<dyn AuditRepository>,
    bus: EventBus,
}

impl ExecutionRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutionConfig,
        broker: Arc<dyn BrokerService>,
        simulator: TradeSimulator,
        market_data: Arc<dyn MarketDataService>,
        trades: Arc<dyn TradeRepository>,
        positions: Arc<dyn PositionRepository>,
        audit: Arc<dyn AuditRepository>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            broker,
            simulator,
            market_data,
            trades,
            positions,
            audit,
            bus,
        }
    }

    /// Paper-mode guard set. The broker is used only when every guard
    /// holds; any mismatch routes to the simulator, and a live (non
    /// paper) host is refused outright with a HIGH-severity audit.
    pub fn routing_decision(&self) -> RoutingDecision {
        if !self.config.use_real_trading {
            return RoutingDecision::simulator();
        }
        if !self.config.broker_enabled {
            return RoutingDecision::downgrade("broker integration disabled", AuditSeverity::Warn);
        }
        if !self.config.broker_key_id.starts_with(PAPER_KEY_PREFIX) {
            return RoutingDecision::downgrade(
                "broker credentials are not paper-trading keys",
                AuditSeverity::Warn,
            );
        }
        if !is_paper_host(&self.config.broker_base_url) {
            return RoutingDecision::downgrade(
                format!(
                    "live endpoint refused: {} is not a paper-trading host",
                    self.config.broker_base_url
                ),
                AuditSeverity::High,
            );
        }
        RoutingDecision {
            venue: Venue::Broker,
            downgrade_reason: None,
            severity: AuditSeverity::Info,
        }
    }

    fn validate(&self, trade: &Trade) -> Result<(), ExecutionError> {
        if trade.status != TradeStatus::Pending {
            return Err(ExecutionError::Validation {
                reason: format!("trade is {}, expected pending", trade.status),
            });
        }
        if !is_well_formed_symbol(&trade.symbol) {
            return Err(ExecutionError::Validation {
                reason: format!("malformed symbol: {}", trade.symbol),
            });
        }
        if trade.quantity < 1 {
            return Err(ExecutionError::Validation {
                reason: "quantity must be at least 1".to_string(),
            });
        }
        if trade.quantity > self.config.max_position_size {
            return Err(ExecutionError::Validation {
                reason: format!(
                    "quantity {} exceeds the {} share cap",
                    trade.quantity, self.config.max_position_size
                ),
            });
        }
        if trade.notional() > self.config.max_trade_value {
            return Err(ExecutionError::Validation {
                reason: format!(
                    "notional {} exceeds the {} cap",
                    trade.notional(),
                    self.config.max_trade_value
                ),
            });
        }
        if trade.order_type.requires_limit_price() && trade.limit_price.is_none() {
            return Err(ExecutionError::Validation {
                reason: format!("{} orders require a limit price", trade.order_type),
            });
        }
        Ok(())
    }

    async fn audit_downgrade(&self, trade: &Trade, decision: &RoutingDecision, correlation_id: &str) {
        let Some(reason) = &decision.downgrade_reason else {
            return;
        };
        let entry = AuditEntry::new(
            Some(trade.user_id.clone()),
            AuditAction::RoutingDowngrade,
            "trade",
            trade.trade_id.clone(),
            correlation_id,
        )
        .with_severity(decision.severity)
        .with_after(json!({
            "reason": reason,
            "venue": decision.venue.as_str(),
        }));
        if let Err(e) = self.audit.append(&entry).await {
            error!("Failed to audit routing downgrade: {}", e);
        }
    }

    /// Broker pre-trade checks. All run before anything is written, so
    /// a failure leaves no trace beyond its error.
    async fn broker_pre_checks(&self, trade: &Trade) -> Result<(), ExecutionError> {
        let tradable = self
            .broker
            .is_symbol_tradable(&trade.symbol)
            .await
            .map_err(|e| ExecutionError::BrokerUnavailable {
                reason: e.to_string(),
            })?;
        if !tradable {
            return Err(ExecutionError::Rejected {
                reason: format!("{} is not tradable at the broker", trade.symbol),
            });
        }

        let market_open = self.market_data.is_market_open().await.unwrap_or(false);
        let after_hours_ok =
            trade.order_type == OrderType::Limit && self.config.after_hours_limit_orders;
        if !market_open && !after_hours_ok {
            return Err(ExecutionError::MarketClosed {
                symbol: trade.symbol.clone(),
            });
        }

        let account =
            self.broker
                .account()
                .await
                .map_err(|e| ExecutionError::BrokerUnavailable {
                    reason: e.to_string(),
                })?;
        let required = trade.notional();
        if account.buying_power < required {
            return Err(ExecutionError::InsufficientFunds {
                need: required,
                available: account.buying_power,
            });
        }
        Ok(())
    }

    /// Submit to the broker and poll the fill on the backoff schedule.
    async fn execute_broker(&self, trade: &Trade) -> Result<ExecutionReport, ExecutionError> {
        let request = BrokerOrderRequest {
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.quantity,
            order_type: trade.order_type,
            limit_price: trade.limit_price,
        };

        let mut order = self.broker.submit_order(&request).await.map_err(|e| {
            ExecutionError::BrokerUnavailable {
                reason: e.to_string(),
            }
        })?;
        let submitted_at = order.submitted_at;
        let started = Instant::now();
        let mut partial_recorded = false;
        let mut polls_after_partial = 0u32;
        let mut step = 0usize;

        while !order.status.is_terminal() {
            if started.elapsed() >= POLL_BUDGET {
                break;
            }
            if order.status == BrokerOrderStatus::PartiallyFilled {
                if !partial_recorded {
                    info!(
                        "Order {} partially filled: {}/{}",
                        order.order_id, order.filled_quantity, trade.quantity
                    );
                    partial_recorded = true;
                } else if polls_after_partial >= 1 {
                    // One extra poll after the partial was recorded.
                    break;
                } else {
                    polls_after_partial += 1;
                }
            }

            let delay = POLL_SCHEDULE_MS[step.min(POLL_SCHEDULE_MS.len() - 1)];
            step += 1;
            let remaining = POLL_BUDGET.saturating_sub(started.elapsed());
            tokio::time::sleep(Duration::from_millis(delay).min(remaining)).await;

            match self.broker.get_order(&order.order_id).await {
                Ok(updated) => order = updated,
                Err(e) => warn!("Fill poll failed for {}: {}", order.order_id, e),
            }
        }

        let now = Utc::now();
        let report = match order.status {
            BrokerOrderStatus::Filled => ExecutionReport {
                success: true,
                execution_id: Some(order.order_id),
                status: TradeStatus::Filled,
                filled_quantity: order.filled_quantity,
                fill_price: order.filled_avg_price,
                venue: Venue::Broker,
                submitted_at,
                filled_at: Some(now),
                error: None,
            },
            BrokerOrderStatus::PartiallyFilled => ExecutionReport {
                success: false,
                execution_id: Some(order.order_id),
                status: TradeStatus::PartiallyFilled,
                filled_quantity: order.filled_quantity,
                fill_price: order.filled_avg_price,
                venue: Venue::Broker,
                submitted_at,
                filled_at: None,
                error: Some("order partially filled within the poll budget".to_string()),
            },
            BrokerOrderStatus::Rejected => ExecutionReport {
                success: false,
                execution_id: Some(order.order_id),
                status: TradeStatus::Rejected,
                filled_quantity: 0,
                fill_price: None,
                venue: Venue::Broker,
                submitted_at,
                filled_at: None,
                error: Some("order rejected by broker".to_string()),
            },
            BrokerOrderStatus::Cancelled => ExecutionReport {
                success: false,
                execution_id: Some(order.order_id),
                status: TradeStatus::Cancelled,
                filled_quantity: order.filled_quantity,
                fill_price: order.filled_avg_price,
                venue: Venue::Broker,
                submitted_at,
                filled_at: None,
                error: Some("order cancelled at the venue".to_string()),
            },
            // Still accepted after the budget: leave Submitted for a
            // background reconciler to finalize later.
            BrokerOrderStatus::Accepted => ExecutionReport {
                success: false,
                execution_id: Some(order.order_id),
                status: TradeStatus::Submitted,
                filled_quantity: order.filled_quantity,
                fill_price: order.filled_avg_price,
                venue: Venue::Broker,
                submitted_at,
                filled_at: None,
                error: Some(format!(
                    "fill confirmation timed out after {}ms",
                    started.elapsed().as_millis()
                )),
            },
        };
        Ok(report)
    }

    /// Persist the routed outcome and publish the trade-executed event
    /// once the store acknowledges.
    async fn persist_outcome(
        &self,
        mut trade: Trade,
        report: &ExecutionReport,
        op_id: &str,
        correlation_id: &str,
    ) -> Result<Trade, ExecutionError> {
        trade.status = report.status;
        trade.execution_id = report.execution_id.clone();
        trade.venue = Some(report.venue);
        if report.filled_quantity > 0 {
            trade.filled_quantity = Some(report.filled_quantity);
            trade.fill_price = report.fill_price;
        }
        trade.updated_at = Utc::now();

        // Positions fold in fills only at terminal status.
        let mut position = self
            .positions
            .get(&trade.user_id, &trade.symbol)
            .await
            .map_err(internal)?
            .unwrap_or_else(|| Position::flat(&trade.user_id, &trade.symbol));
        if trade.status == TradeStatus::Filled {
            if let (Some(qty), Some(price)) = (trade.filled_quantity, trade.fill_price) {
                position.apply_fill(trade.side, qty, price);
            }
        }

        let audit = AuditEntry::new(
            Some(trade.user_id.clone()),
            AuditAction::TradeExecuted,
            "trade",
            trade.trade_id.clone(),
            correlation_id,
        )
        .with_after(json!({
            "status": trade.status.as_str(),
            "venue": report.venue.as_str(),
            "filled_quantity": report.filled_quantity,
            "fill_price": report.fill_price.map(|p| p.to_string()),
        }));

        let outcome = self
            .trades
            .finalize(&trade, &position, &audit, &format!("fill:{}", op_id))
            .await
            .map_err(internal)?;

        if outcome == WriteOutcome::Applied && trade.is_terminal() {
            self.bus.publish_detached(DomainEvent::TradeExecuted {
                trade: trade.clone(),
                report: report.clone(),
                correlation_id: correlation_id.to_string(),
            });
        }
        Ok(trade)
    }

    /// Route and execute one pending trade. Pre-write failures return
    /// a typed error and leave no rows behind; post-submit outcomes are
    /// always persisted and normalized into the report.
    pub async fn execute(
        &self,
        trade: Trade,
        op_id: &str,
        correlation_id: &str,
    ) -> Result<ExecutionReport, ExecutionError> {
        self.validate(&trade)?;

        let known = self
            .market_data
            .validate_symbol(&trade.symbol)
            .await
            .unwrap_or(false);
        if !known {
            return Err(ExecutionError::Validation {
                reason: format!("unknown symbol: {}", trade.symbol),
            });
        }

        let mut decision = self.routing_decision();
        self.audit_downgrade(&trade, &decision, correlation_id).await;

        if decision.venue == Venue::Broker {
            match self.broker_pre_checks(&trade).await {
                Ok(()) => {}
                Err(ExecutionError::BrokerUnavailable { reason }) => {
                    // Downgrade for this call only.
                    decision = RoutingDecision::downgrade(
                        format!("broker unavailable: {}", reason),
                        AuditSeverity::Warn,
                    );
                    self.audit_downgrade(&trade, &decision, correlation_id).await;
                }
                Err(other) => return Err(other),
            }
        }

        // Claim the op id before touching a venue; a duplicate submit
        // reports the original trade instead of executing twice.
        let inserted = self
            .trades
            .insert(&trade, &format!("submit:{}", op_id))
            .await
            .map_err(internal)?;
        if inserted == WriteOutcome::Duplicate {
            info!("Duplicate submission for op {}", op_id);
            let original = self
                .trades
                .find_by_op_id(&format!("submit:{}", op_id))
                .await
                .map_err(internal)?;
            return Ok(report_from_trade(original.as_ref().unwrap_or(&trade)));
        }

        let submit_audit = AuditEntry::new(
            Some(trade.user_id.clone()),
            AuditAction::TradeSubmitted,
            "trade",
            trade.trade_id.clone(),
            correlation_id,
        )
        .with_after(json!({
            "symbol": trade.symbol,
            "side": trade.side.as_str(),
            "quantity": trade.quantity,
            "order_type": trade.order_type.as_str(),
            "entry_price": trade.entry_price.to_string(),
            "venue": decision.venue.as_str(),
        }));
        if let Err(e) = self.audit.append(&submit_audit).await {
            error!("Failed to audit trade submission: {}", e);
        }

        let report = match decision.venue {
            Venue::Broker => match self.execute_broker(&trade).await {
                Ok(report) => report,
                Err(ExecutionError::BrokerUnavailable { reason }) => {
                    let downgrade = RoutingDecision::downgrade(
                        format!("broker unavailable at submit: {}", reason),
                        AuditSeverity::Warn,
                    );
                    self.audit_downgrade(&trade, &downgrade, correlation_id).await;
                    self.simulator.execute(&trade)
                }
                Err(other) => return Err(other),
            },
            Venue::Simulator => self.simulator.execute(&trade),
        };

        self.persist_outcome(trade, &report, op_id, correlation_id)
            .await?;
        Ok(report)
    }
}

fn internal(e: anyhow::Error) -> ExecutionError {
    ExecutionError::Internal {
        reason: e.to_string(),
    }
}

fn report_from_trade(trade: &Trade) -> ExecutionReport {
    ExecutionReport {
        success: trade.status == TradeStatus::Filled,
        execution_id: trade.execution_id.clone(),
        status: trade.status,
        filled_quantity: trade.filled_quantity.unwrap_or(0),
        fill_price: trade.fill_price,
        venue: trade.venue.unwrap_or(Venue::Simulator),
        submitted_at: trade.created_at,
        filled_at: trade.fill_price.map(|_| trade.updated_at),
        error: None,
    }
}
