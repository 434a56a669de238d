//! Risk-alert configuration surfaces: the creation modal and the
//! manage list with pause/resume/delete buttons.

use crate::application::orchestrator::derivation::parse_money;
use crate::domain::alerts::{AlertStatus, RiskAlertConfig};
use crate::infrastructure::chat::blocks::{Block, Button, Element, ModalView, SelectOption, Text};
use rust_decimal::Decimal;
use serde_json::Value;

pub const ALERT_MODAL_CALLBACK: &str = "alert_modal";

fn yes_no(selected: bool) -> (Vec<SelectOption>, SelectOption) {
    let options = vec![
        SelectOption::new("Yes", "yes"),
        SelectOption::new("No", "no"),
    ];
    let initial = if selected {
        SelectOption::new("Yes", "yes")
    } else {
        SelectOption::new("No", "no")
    };
    (options, initial)
}

fn threshold_input(action_id: &str, label: &str, placeholder: &str) -> Block {
    Block::Input {
        block_id: format!("{}_block", action_id),
        label: Text::plain(label),
        element: Element::PlainTextInput {
            action_id: action_id.to_string(),
            initial_value: None,
            placeholder: Some(Text::plain(placeholder)),
            dispatch_action_config: None,
        },
        dispatch_action: None,
        optional: None,
    }
}

fn toggle_input(action_id: &str, label: &str, selected: bool) -> Block {
    let (options, initial) = yes_no(selected);
    Block::Input {
        block_id: format!("{}_block", action_id),
        label: Text::plain(label),
        element: Element::StaticSelect {
            action_id: action_id.to_string(),
            options,
            initial_option: Some(initial),
            placeholder: None,
        },
        dispatch_action: None,
        optional: None,
    }
}

pub fn build_alert_modal() -> ModalView {
    ModalView::new(ALERT_MODAL_CALLBACK, "New Risk Alert")
        .with_submit_label("Create alert")
        .with_blocks(vec![
            threshold_input("alert_name_input", "Alert name", "Big drawdown"),
            threshold_input(
                "alert_trade_size_input",
                "Trade size threshold (USD)",
                "10000",
            ),
            threshold_input("alert_loss_pct_input", "Loss threshold (%)", "3"),
            threshold_input("alert_vix_input", "VIX threshold", "20"),
            toggle_input("alert_monitor_select", "Monitor new trades", true),
            toggle_input(
                "alert_scan_select",
                "Scan existing trades on creation",
                false,
            ),
        ])
}

#[derive(Debug, Clone, Default)]
pub struct AlertSubmission {
    pub name: Option<String>,
    pub trade_size_threshold: Option<Decimal>,
    pub loss_pct_threshold: Option<Decimal>,
    pub vix_threshold: Option<Decimal>,
    pub monitor_new: bool,
    pub scan_existing: bool,
}

pub fn parse_alert_submission(state: &Value) -> AlertSubmission {
    use crate::infrastructure::chat::events::state_value;

    AlertSubmission {
        name: state_value(state, "alert_name_input")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        trade_size_threshold: state_value(state, "alert_trade_size_input")
            .and_then(|s| parse_money(&s)),
        loss_pct_threshold: state_value(state, "alert_loss_pct_input")
            .and_then(|s| parse_money(&s)),
        vix_threshold: state_value(state, "alert_vix_input").and_then(|s| parse_money(&s)),
        monitor_new: state_value(state, "alert_monitor_select").as_deref() == Some("yes"),
        scan_existing: state_value(state, "alert_scan_select").as_deref() == Some("yes"),
    }
}

/// Validation errors keyed by block id, or None when clean.
pub fn alert_validation_errors(input: &AlertSubmission) -> Option<Value> {
    let mut errors = serde_json::Map::new();

    if input.name.is_none() {
        errors.insert(
            "alert_name_input_block".to_string(),
            Value::String("Name the alert".to_string()),
        );
    }
    match input.trade_size_threshold {
        Some(v) if v >= Decimal::ZERO => {}
        _ => {
            errors.insert(
                "alert_trade_size_input_block".to_string(),
                Value::String("Enter a non-negative dollar threshold".to_string()),
            );
        }
    }
    match input.loss_pct_threshold {
        Some(v) if v >= Decimal::ZERO && v <= Decimal::from(100) => {}
        _ => {
            errors.insert(
                "alert_loss_pct_input_block".to_string(),
                Value::String("Loss threshold must be between 0 and 100".to_string()),
            );
        }
    }
    match input.vix_threshold {
        Some(v) if v >= Decimal::ZERO => {}
        _ => {
            errors.insert(
                "alert_vix_input_block".to_string(),
                Value::String("Enter a non-negative VIX threshold".to_string()),
            );
        }
    }

    if errors.is_empty() {
        None
    } else {
        Some(Value::Object(errors))
    }
}

pub fn alert_created_view(alert: &RiskAlertConfig) -> ModalView {
    let mut blocks = vec![
        Block::section(format!(":bell: *{}* is active.", alert.name)),
        Block::section(format!(
            "Fires when trade size ≥ ${}, loss ≥ {}% and VIX ≥ {}.",
            alert.trade_size_threshold, alert.loss_pct_threshold, alert.vix_threshold
        )),
    ];
    if alert.scan_existing_at_create {
        blocks.push(Block::context(
            "Scanning existing trades now — a summary will arrive by DM.",
        ));
    }
    ModalView::new(ALERT_MODAL_CALLBACK, "Alert Created")
        .with_submit_label("Done")
        .with_blocks(blocks)
}

/// Message blocks for `/risk-alerts`: one section per alert with its
/// state controls. Delete is soft and reversible, so it is presented
/// without ceremony.
pub fn alert_list_blocks(alerts: &[RiskAlertConfig]) -> Vec<Block> {
    if alerts.is_empty() {
        return vec![Block::section(
            "No risk alerts yet. Create one with `/risk-alert`.",
        )];
    }

    let mut blocks = Vec::new();
    for alert in alerts {
        blocks.push(Block::section(format!(
            "*{}* — {} · size ≥ ${} · loss ≥ {}% · VIX ≥ {} · triggered {}×",
            alert.name,
            alert.status.as_str(),
            alert.trade_size_threshold,
            alert.loss_pct_threshold,
            alert.vix_threshold,
            alert.trigger_count
        )));

        let mut buttons = Vec::new();
        match alert.status {
            AlertStatus::Active => {
                buttons.push(Button::new("Pause", "alert_pause").with_value(&alert.alert_id));
            }
            AlertStatus::Paused => {
                buttons.push(
                    Button::new("Resume", "alert_resume")
                        .with_value(&alert.alert_id)
                        .primary(),
                );
            }
            AlertStatus::Deleted => {}
        }
        if alert.status != AlertStatus::Deleted {
            buttons.push(
                Button::new("Delete", "alert_delete")
                    .with_value(&alert.alert_id)
                    .danger(),
            );
            blocks.push(Block::Actions {
                block_id: None,
                elements: buttons,
            });
        }
        blocks.push(Block::Divider);
    }
    blocks
}
