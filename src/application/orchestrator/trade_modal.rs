//! Trade modal rendering and submission decoding. One modal is reused
//! for the whole workflow: every state renders the full view and the
//! platform swaps it in place by view id.

use crate::application::orchestrator::derivation::{parse_money, parse_quantity};
use crate::application::orchestrator::session::{ModalSession, WorkflowState};
use crate::domain::trading::types::{
    ExecutionReport, OrderSide, OrderType, Trade, is_well_formed_symbol,
};
use crate::infrastructure::chat::blocks::{
    Block, Button, DispatchActionConfig, Element, ModalView, SelectOption, Text,
};
use rust_decimal::Decimal;
use serde_json::Value;

pub const TRADE_MODAL_CALLBACK: &str = "trade_modal";
pub const PRICE_DISPLAY_BLOCK: &str = "current_price_display";

fn side_option(side: OrderSide) -> SelectOption {
    match side {
        OrderSide::Buy => SelectOption::new("Buy", "buy"),
        OrderSide::Sell => SelectOption::new("Sell", "sell"),
    }
}

fn order_type_option(order_type: OrderType) -> SelectOption {
    match order_type {
        OrderType::Market => SelectOption::new("Market", "market"),
        OrderType::Limit => SelectOption::new("Limit", "limit"),
        OrderType::Stop => SelectOption::new("Stop", "stop"),
        OrderType::StopLimit => SelectOption::new("Stop Limit", "stop_limit"),
    }
}

/// The display block is the authoritative source the derivations read
/// the price back from, so its format is load-bearing.
pub fn price_display_text(session: &ModalSession) -> String {
    match (&session.symbol, session.entry_price) {
        (Some(symbol), Some(price)) => {
            format!("*{}* — Current price: ${}", symbol, price)
        }
        (Some(symbol), None) if session.quote_failed => format!(
            "Quote for *{}* is unavailable — enter a price manually below.",
            symbol
        ),
        (Some(symbol), None) => format!("Fetching quote for *{}*…", symbol),
        _ => "Enter a symbol to fetch a quote.".to_string(),
    }
}

fn text_input(
    action_id: &str,
    label: &str,
    initial: Option<String>,
    placeholder: &str,
    live: bool,
) -> Block {
    Block::Input {
        block_id: format!("{}_block", action_id),
        label: Text::plain(label),
        element: Element::PlainTextInput {
            action_id: action_id.to_string(),
            initial_value: initial,
            placeholder: Some(Text::plain(placeholder)),
            dispatch_action_config: live.then(DispatchActionConfig::on_character_entered),
        },
        dispatch_action: live.then_some(true),
        optional: Some(true),
    }
}

pub fn build_trade_modal(session: &ModalSession) -> ModalView {
    let mut blocks = Vec::new();
    if let Some(banner) = &session.error_banner {
        blocks.push(Block::section(format!(":x: {}", banner)));
        blocks.push(Block::Divider);
    }
    blocks.extend(vec![
        text_input(
            "trade_symbol_input",
            "Symbol",
            session.symbol.clone(),
            "AAPL",
            true,
        ),
        Block::section_with_id(PRICE_DISPLAY_BLOCK, price_display_text(session)),
        Block::Input {
            block_id: "trade_side_select_block".to_string(),
            label: Text::plain("Side"),
            element: Element::StaticSelect {
                action_id: "trade_side_select".to_string(),
                options: vec![side_option(OrderSide::Buy), side_option(OrderSide::Sell)],
                initial_option: Some(side_option(session.side)),
                placeholder: None,
            },
            dispatch_action: Some(true),
            optional: None,
        },
        Block::Input {
            block_id: "trade_order_type_select_block".to_string(),
            label: Text::plain("Order type"),
            element: Element::StaticSelect {
                action_id: "trade_order_type_select".to_string(),
                options: vec![
                    order_type_option(OrderType::Market),
                    order_type_option(OrderType::Limit),
                    order_type_option(OrderType::Stop),
                    order_type_option(OrderType::StopLimit),
                ],
                initial_option: Some(order_type_option(session.order_type)),
                placeholder: None,
            },
            dispatch_action: Some(true),
            optional: None,
        },
        text_input(
            "trade_quantity_input",
            "Quantity (shares)",
            session.quantity.map(|q| q.to_string()),
            "100",
            true,
        ),
        text_input(
            "trade_notional_input",
            "Notional (USD)",
            session.notional.map(|n| n.to_string()),
            "15000.00",
            true,
        ),
    ]);

    if session.order_type.requires_limit_price() {
        blocks.push(text_input(
            "trade_limit_price_input",
            "Limit price",
            session.limit_price.map(|p| p.to_string()),
            "150.00",
            false,
        ));
        if session.limit_price.is_none() {
            blocks.push(Block::context(
                "Limit and stop-limit orders need a limit price before submit.",
            ));
        }
    }

    if session.quote_failed && session.entry_price.is_none() {
        blocks.push(text_input(
            "trade_entry_price_input",
            "Entry price (manual)",
            None,
            "150.00",
            false,
        ));
    }

    match &session.risk {
        Some(risk) => {
            blocks.push(Block::Divider);
            blocks.push(Block::section(format!(
                "*Risk score: {}/10*\n{}",
                risk.score, risk.narrative
            )));
            if !risk.flags.is_empty() {
                blocks.push(Block::context(risk.flags.join(" · ")));
            }
            if risk.is_high_risk() {
                blocks.push(text_input(
                    "trade_confirm_token_input",
                    "Type the ticker symbol to confirm this high-risk trade",
                    None,
                    session.symbol.as_deref().unwrap_or("SYMBOL"),
                    false,
                ));
            }
        }
        None if session.state == WorkflowState::PreparingRisk => {
            blocks.push(Block::context("Analyzing risk…"));
        }
        None if session.risk_unavailable => {
            blocks.push(Block::context(
                "Risk analysis unavailable — submission is not blocked.",
            ));
        }
        None => {}
    }

    blocks.push(Block::Actions {
        block_id: Some("trade_actions_block".to_string()),
        elements: vec![Button::new("Analyze risk", "trade_analyze_risk")],
    });

    ModalView::new(TRADE_MODAL_CALLBACK, "Place Trade")
        .with_submit_label("Submit order")
        .with_blocks(blocks)
        .with_private_metadata(session.metadata().encode())
}

/// Optimistic view shown as the submission ack.
pub fn submitting_view(session: &ModalSession) -> ModalView {
    let summary = format!(
        "Submitting {} *{}* × {}…",
        session.side,
        session.symbol.as_deref().unwrap_or("?"),
        session.quantity.unwrap_or(0),
    );
    ModalView::new(TRADE_MODAL_CALLBACK, "Place Trade")
        .with_submit_label("Done")
        .with_blocks(vec![
            Block::section(summary),
            Block::context("You can close this window; a confirmation will follow."),
        ])
        .with_private_metadata(session.metadata().encode())
}

pub fn confirmed_view(session: &ModalSession, trade: &Trade, report: &ExecutionReport) -> ModalView {
    let fill = report
        .fill_price
        .map(|p| format!("${}", p))
        .unwrap_or_else(|| "—".to_string());
    ModalView::new(TRADE_MODAL_CALLBACK, "Trade Confirmed")
        .with_submit_label("Done")
        .with_blocks(vec![
            Block::section(format!(
                ":white_check_mark: *{} {} × {}*",
                trade.side, trade.symbol, report.filled_quantity
            )),
            Block::section(format!(
                "Fill price: {}\nVenue: {}\nStatus: {}",
                fill, report.venue, report.status
            )),
            Block::context(format!("ref {}", &session.correlation_id[..8.min(session.correlation_id.len())])),
        ])
        .with_private_metadata(session.metadata().encode())
}

pub fn failed_view(session: &ModalSession, message: &str, short_correlation: &str) -> ModalView {
    ModalView::new(TRADE_MODAL_CALLBACK, "Trade Failed")
        .with_submit_label("Retry")
        .with_blocks(vec![
            Block::section(format!(":x: {}", message)),
            Block::context(format!("ref {} — adjust and retry", short_correlation)),
        ])
        .with_private_metadata(session.metadata().encode())
}

/// What the user actually typed when they pressed submit.
#[derive(Debug, Clone, Default)]
pub struct SubmissionInput {
    pub symbol: Option<String>,
    pub side: Option<OrderSide>,
    pub order_type: Option<OrderType>,
    pub quantity: Option<i64>,
    pub notional: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub manual_entry_price: Option<Decimal>,
    pub confirm_token: Option<String>,
}

pub fn parse_submission(state: &Value) -> SubmissionInput {
    use crate::infrastructure::chat::events::state_value;

    SubmissionInput {
        symbol: state_value(state, "trade_symbol_input")
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty()),
        side: state_value(state, "trade_side_select").and_then(|s| OrderSide::parse(&s)),
        order_type: state_value(state, "trade_order_type_select")
            .and_then(|s| OrderType::parse(&s)),
        quantity: state_value(state, "trade_quantity_input").and_then(|s| parse_quantity(&s)),
        notional: state_value(state, "trade_notional_input").and_then(|s| parse_money(&s)),
        limit_price: state_value(state, "trade_limit_price_input").and_then(|s| parse_money(&s)),
        manual_entry_price: state_value(state, "trade_entry_price_input")
            .and_then(|s| parse_money(&s)),
        confirm_token: state_value(state, "trade_confirm_token_input")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    }
}

/// Inline validation errors keyed by block id, in the platform's
/// `response_action: errors` shape. None means the submission is clean.
pub fn validation_errors(session: &ModalSession, input: &SubmissionInput) -> Option<Value> {
    let mut errors = serde_json::Map::new();

    match &input.symbol {
        Some(symbol) if is_well_formed_symbol(symbol) => {}
        Some(_) => {
            errors.insert(
                "trade_symbol_input_block".to_string(),
                Value::String("Symbols are 1-5 uppercase letters — check the symbol".to_string()),
            );
        }
        None => {
            errors.insert(
                "trade_symbol_input_block".to_string(),
                Value::String("Enter a symbol".to_string()),
            );
        }
    }

    match input.quantity {
        Some(q) if q >= 1 => {}
        _ => {
            errors.insert(
                "trade_quantity_input_block".to_string(),
                Value::String("Quantity must be a whole number of at least 1".to_string()),
            );
        }
    }

    let order_type = input.order_type.unwrap_or(session.order_type);
    if order_type.requires_limit_price() && input.limit_price.is_none() {
        errors.insert(
            "trade_limit_price_input_block".to_string(),
            Value::String("Enter a limit price for this order type".to_string()),
        );
    }

    if session.entry_price.is_none() && input.manual_entry_price.is_none() {
        errors.insert(
            PRICE_DISPLAY_BLOCK.to_string(),
            Value::String("No price available yet — wait for the quote or enter one".to_string()),
        );
    }

    if session.needs_risk_confirmation() {
        let expected = session.symbol.clone().or_else(|| input.symbol.clone());
        let confirmed = match (&input.confirm_token, &expected) {
            (Some(token), Some(symbol)) => token == symbol,
            _ => false,
        };
        if !confirmed {
            errors.insert(
                "trade_confirm_token_input_block".to_string(),
                Value::String(
                    "High-risk trade: type the ticker symbol exactly to confirm".to_string(),
                ),
            );
        }
    }

    if errors.is_empty() {
        None
    } else {
        Some(Value::Object(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::EntryPriceSource;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn quoted_session() -> ModalSession {
        let mut session = ModalSession::new("V1", "u-1", "U123", None, "corr-12345678");
        session.symbol = Some("AAPL".to_string());
        session.entry_price = Some(dec!(150.00));
        session.entry_price_source = EntryPriceSource::Quote;
        session.state = WorkflowState::Quoted;
        session
    }

    #[test]
    fn test_modal_carries_metadata_and_display() {
        let view = build_trade_modal(&quoted_session());
        let json = view.to_value();
        assert_eq!(json["callback_id"], TRADE_MODAL_CALLBACK);
        assert!(
            json["private_metadata"]
                .as_str()
                .unwrap()
                .contains("150.00")
        );

        let rendered = json["blocks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|b| b["block_id"] == PRICE_DISPLAY_BLOCK)
            .unwrap();
        assert!(
            rendered["text"]["text"]
                .as_str()
                .unwrap()
                .contains("$150.00")
        );
    }

    #[test]
    fn test_limit_hint_only_for_limit_types() {
        let mut session = quoted_session();
        let view = build_trade_modal(&session);
        assert!(!view.to_value().to_string().contains("need a limit price"));

        session.order_type = OrderType::Limit;
        let view = build_trade_modal(&session);
        assert!(view.to_value().to_string().contains("need a limit price"));
    }

    #[test]
    fn test_parse_submission_reads_all_fields() {
        let state = json!({"values": {
            "trade_symbol_input_block": {"trade_symbol_input": {"value": "aapl"}},
            "trade_side_select_block": {"trade_side_select": {"selected_option": {"value": "sell"}}},
            "trade_order_type_select_block": {"trade_order_type_select": {"selected_option": {"value": "limit"}}},
            "trade_quantity_input_block": {"trade_quantity_input": {"value": "1,000"}},
            "trade_notional_input_block": {"trade_notional_input": {"value": "$15,000.00"}},
            "trade_limit_price_input_block": {"trade_limit_price_input": {"value": "149.50"}},
        }});

        let input = parse_submission(&state);
        assert_eq!(input.symbol.as_deref(), Some("AAPL"));
        assert_eq!(input.side, Some(OrderSide::Sell));
        assert_eq!(input.order_type, Some(OrderType::Limit));
        assert_eq!(input.quantity, Some(1000));
        assert_eq!(input.notional, Some(dec!(15000.00)));
        assert_eq!(input.limit_price, Some(dec!(149.50)));
    }

    #[test]
    fn test_validation_flags_missing_limit_price() {
        let session = quoted_session();
        let input = SubmissionInput {
            symbol: Some("AAPL".to_string()),
            quantity: Some(100),
            order_type: Some(OrderType::Limit),
            ..SubmissionInput::default()
        };
        let errors = validation_errors(&session, &input).unwrap();
        assert!(errors.get("trade_limit_price_input_block").is_some());
    }

    #[test]
    fn test_validation_requires_typed_ticker_when_high_risk() {
        let mut session = quoted_session();
        session.risk = Some(crate::domain::ports::RiskAssessment {
            score: 9,
            narrative: "concentrated".to_string(),
            flags: vec![],
        });

        let mut input = SubmissionInput {
            symbol: Some("AAPL".to_string()),
            quantity: Some(100),
            order_type: Some(OrderType::Market),
            ..SubmissionInput::default()
        };
        let errors = validation_errors(&session, &input).unwrap();
        assert!(errors.get("trade_confirm_token_input_block").is_some());

        input.confirm_token = Some("AAPL".to_string());
        assert!(validation_errors(&session, &input).is_none());
    }

    #[test]
    fn test_clean_submission_passes() {
        let session = quoted_session();
        let input = SubmissionInput {
            symbol: Some("AAPL".to_string()),
            quantity: Some(100),
            order_type: Some(OrderType::Market),
            side: Some(OrderSide::Buy),
            ..SubmissionInput::default()
        };
        assert!(validation_errors(&session, &input).is_none());
    }
}
