//! Row decoding shared by the repositories. Missing required columns
//! are hard errors; unknown columns are simply never read, which gives
//! forward compatibility for free.

use crate::domain::alerts::{AlertStatus, AlertTriggerEvent, RiskAlertConfig};
use crate::domain::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::domain::trading::position::Position;
use crate::domain::trading::types::{
    EntryPriceSource, OrderSide, OrderType, Trade, TradeStatus, Venue,
};
use crate::domain::user::{Role, User, UserStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", raw))
}

pub fn parse_decimal(raw: &str, column: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid decimal in {}: {}", column, raw))
}

fn parse_opt_decimal(raw: Option<String>, column: &str) -> Result<Option<Decimal>> {
    raw.map(|s| parse_decimal(&s, column)).transpose()
}

pub fn user_from_row(row: &SqliteRow) -> Result<User> {
    let role_raw: String = row.try_get("role")?;
    let status_raw: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(User {
        user_id: row.try_get("user_id")?,
        chat_id: row.try_get("chat_id")?,
        display_name: row.try_get("display_name")?,
        role: Role::parse(&role_raw).with_context(|| format!("Unknown role: {}", role_raw))?,
        assigned_manager_id: row.try_get("assigned_manager_id")?,
        status: UserStatus::parse(&status_raw)
            .with_context(|| format!("Unknown user status: {}", status_raw))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    let side_raw: String = row.try_get("side")?;
    let order_type_raw: String = row.try_get("order_type")?;
    let source_raw: String = row.try_get("entry_price_source")?;
    let status_raw: String = row.try_get("status")?;
    let entry_price: String = row.try_get("entry_price")?;
    let commission: String = row.try_get("commission")?;
    let venue_raw: Option<String> = row.try_get("venue")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Trade {
        trade_id: row.try_get("trade_id")?,
        user_id: row.try_get("user_id")?,
        symbol: row.try_get("symbol")?,
        side: OrderSide::parse(&side_raw)
            .with_context(|| format!("Unknown side: {}", side_raw))?,
        quantity: row.try_get("quantity")?,
        order_type: OrderType::parse(&order_type_raw)
            .with_context(|| format!("Unknown order type: {}", order_type_raw))?,
        limit_price: parse_opt_decimal(row.try_get("limit_price")?, "limit_price")?,
        entry_price: parse_decimal(&entry_price, "entry_price")?,
        entry_price_source: EntryPriceSource::parse(&source_raw)
            .with_context(|| format!("Unknown entry price source: {}", source_raw))?,
        status: TradeStatus::parse(&status_raw)
            .with_context(|| format!("Unknown trade status: {}", status_raw))?,
        execution_id: row.try_get("execution_id")?,
        fill_price: parse_opt_decimal(row.try_get("fill_price")?, "fill_price")?,
        filled_quantity: row.try_get("filled_quantity")?,
        commission: parse_decimal(&commission, "commission")?,
        venue: venue_raw.as_deref().and_then(Venue::parse),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub fn position_from_row(row: &SqliteRow) -> Result<Position> {
    let cost_basis: String = row.try_get("cost_basis")?;
    let realized_pnl: String = row.try_get("realized_pnl")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Position {
        user_id: row.try_get("user_id")?,
        symbol: row.try_get("symbol")?,
        net_quantity: row.try_get("net_quantity")?,
        cost_basis: parse_decimal(&cost_basis, "cost_basis")?,
        realized_pnl: parse_decimal(&realized_pnl, "realized_pnl")?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub fn alert_from_row(row: &SqliteRow) -> Result<RiskAlertConfig> {
    let trade_size: String = row.try_get("trade_size_threshold")?;
    let loss_pct: String = row.try_get("loss_pct_threshold")?;
    let vix: String = row.try_get("vix_threshold")?;
    let status_raw: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(RiskAlertConfig {
        alert_id: row.try_get("alert_id")?,
        owner_user_id: row.try_get("owner_user_id")?,
        name: row.try_get("name")?,
        trade_size_threshold: parse_decimal(&trade_size, "trade_size_threshold")?,
        loss_pct_threshold: parse_decimal(&loss_pct, "loss_pct_threshold")?,
        vix_threshold: parse_decimal(&vix, "vix_threshold")?,
        monitor_new: row.try_get::<i64, _>("monitor_new")? != 0,
        scan_existing_at_create: row.try_get::<i64, _>("scan_existing_at_create")? != 0,
        status: AlertStatus::parse(&status_raw)
            .with_context(|| format!("Unknown alert status: {}", status_raw))?,
        trigger_count: row.try_get("trigger_count")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub fn alert_event_from_row(row: &SqliteRow) -> Result<AlertTriggerEvent> {
    let trade_size: String = row.try_get("trade_size")?;
    let loss_pct: String = row.try_get("loss_pct")?;
    let vix_level: String = row.try_get("vix_level")?;
    let side_raw: String = row.try_get("side")?;
    let triggered_at: String = row.try_get("triggered_at")?;

    Ok(AlertTriggerEvent {
        event_id: row.try_get("event_id")?,
        alert_id: row.try_get("alert_id")?,
        trade_id: row.try_get("trade_id")?,
        owner_user_id: row.try_get("owner_user_id")?,
        trade_size: parse_decimal(&trade_size, "trade_size")?,
        loss_pct: parse_decimal(&loss_pct, "loss_pct")?,
        vix_level: parse_decimal(&vix_level, "vix_level")?,
        symbol: row.try_get("symbol")?,
        side: OrderSide::parse(&side_raw)
            .with_context(|| format!("Unknown side: {}", side_raw))?,
        triggered_at: parse_timestamp(&triggered_at)?,
    })
}

pub fn audit_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    let timestamp: String = row.try_get("timestamp")?;
    let action_raw: String = row.try_get("action")?;
    let severity_raw: String = row.try_get("severity")?;
    let before_json: Option<String> = row.try_get("before_json")?;
    let after_json: Option<String> = row.try_get("after_json")?;

    let severity = match severity_raw.as_str() {
        "info" => AuditSeverity::Info,
        "warn" => AuditSeverity::Warn,
        "high" => AuditSeverity::High,
        "error" => AuditSeverity::Error,
        other => anyhow::bail!("Unknown audit severity: {}", other),
    };

    Ok(AuditEntry {
        audit_id: row.try_get("audit_id")?,
        timestamp: parse_timestamp(&timestamp)?,
        actor_user_id: row.try_get("actor_user_id")?,
        action: AuditAction::parse(&action_raw)
            .with_context(|| format!("Unknown audit action: {}", action_raw))?,
        severity,
        subject_kind: row.try_get("subject_kind")?,
        subject_id: row.try_get("subject_id")?,
        before: before_json.as_deref().map(serde_json::from_str).transpose()?,
        after: after_json.as_deref().map(serde_json::from_str).transpose()?,
        correlation_id: row.try_get("correlation_id")?,
    })
}
