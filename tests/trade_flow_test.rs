//! End-to-end trade workflow: slash command through modal interaction
//! to a persisted execution, over mock collaborators.

mod common;

use common::{build_harness, settle, sim_config};
use rust_decimal_macros::dec;
use serde_json::json;
use tradedesk::application::orchestrator::Ack;
use tradedesk::config::Config;
use tradedesk::domain::audit::AuditAction;
use tradedesk::domain::repositories::{
    AuditRepository, PositionRepository, TradeRepository, UserRepository,
};
use tradedesk::domain::trading::types::TradeStatus;
use tradedesk::infrastructure::chat::events::ChatEvent;

fn slash_trade(chat_user: &str, user_name: &str) -> ChatEvent {
    ChatEvent::SlashCommand {
        command: "/trade".to_string(),
        text: String::new(),
        chat_user_id: chat_user.to_string(),
        user_name: user_name.to_string(),
        channel_id: Some("C1".to_string()),
        trigger_id: "trig-1".to_string(),
    }
}

fn symbol_action(view_id: &str, symbol: &str) -> ChatEvent {
    ChatEvent::BlockAction {
        action_id: "trade_symbol_input".to_string(),
        value: Some(symbol.to_string()),
        chat_user_id: "U-AN1".to_string(),
        view_id: Some(view_id.to_string()),
        trigger_id: None,
        channel_id: None,
        state: json!({}),
        private_metadata: None,
        price_display: None,
    }
}

fn quantity_action(view_id: &str, quantity: &str) -> ChatEvent {
    ChatEvent::BlockAction {
        action_id: "trade_quantity_input".to_string(),
        value: Some(quantity.to_string()),
        chat_user_id: "U-AN1".to_string(),
        view_id: Some(view_id.to_string()),
        trigger_id: None,
        channel_id: None,
        state: json!({}),
        private_metadata: None,
        price_display: None,
    }
}

fn submission(view_id: &str) -> ChatEvent {
    ChatEvent::ViewSubmission {
        callback_id: "trade_modal".to_string(),
        view_id: view_id.to_string(),
        chat_user_id: "U-AN1".to_string(),
        state: json!({"values": {
            "trade_symbol_input_block": {"trade_symbol_input": {"value": "AAPL"}},
            "trade_side_select_block": {"trade_side_select": {"selected_option": {"value": "buy"}}},
            "trade_order_type_select_block": {"trade_order_type_select": {"selected_option": {"value": "market"}}},
            "trade_quantity_input_block": {"trade_quantity_input": {"value": "100"}},
            "trade_notional_input_block": {"trade_notional_input": {"value": "15000.00"}},
        }}),
        private_metadata: String::new(),
    }
}

#[tokio::test]
async fn test_simulated_buy_fully_filled() {
    let harness = build_harness(sim_config(), None).await;
    harness.market.set_price("AAPL", dec!(150.00)).await;

    // /trade opens the modal within the ack path.
    let ack = harness
        .orchestrator
        .handle_event(slash_trade("U-AN1", "analyst-1"))
        .await
        .unwrap();
    assert!(matches!(ack, Ack::Empty));
    assert_eq!(harness.chat.opened_views.read().await.len(), 1);

    let view_id = "V0".to_string(); // first id issued by the mock

    // Symbol entry fetches the quote into the modal.
    harness
        .orchestrator
        .handle_event(symbol_action(&view_id, "AAPL"))
        .await
        .unwrap();
    settle().await;
    let session = harness.orchestrator.sessions().get(&view_id).await.unwrap();
    assert_eq!(session.entry_price, Some(dec!(150.00)));

    // Quantity entry derives the notional.
    harness
        .orchestrator
        .handle_event(quantity_action(&view_id, "100"))
        .await
        .unwrap();
    let session = harness.orchestrator.sessions().get(&view_id).await.unwrap();
    assert_eq!(session.notional, Some(dec!(15000.00)));

    // Submission acks optimistically and executes detached.
    let ack = harness
        .orchestrator
        .handle_event(submission(&view_id))
        .await
        .unwrap();
    match ack {
        Ack::ResponseAction(v) => assert_eq!(v["response_action"], "update"),
        other => panic!("expected response_action, got {:?}", other),
    }
    settle().await;

    // Trade persisted as filled at the slipped price.
    let user = harness.users.find_by_chat_id("U-AN1").await.unwrap().unwrap();
    let trades = harness.trades.find_recent_by_user(&user.user_id, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];
    assert_eq!(trade.status, TradeStatus::Filled);
    assert_eq!(trade.filled_quantity, Some(100));
    assert_eq!(trade.fill_price, Some(dec!(150.0150)));

    // Position reflects the fill.
    let position = harness
        .positions
        .get(&user.user_id, "AAPL")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.net_quantity, 100);
    assert_eq!(position.cost_basis, dec!(150.0150));

    // Audit carries submission and execution under one correlation id.
    let entries = harness
        .audit
        .find_by_correlation(&session.correlation_id)
        .await
        .unwrap();
    assert!(entries.iter().any(|e| e.action == AuditAction::TradeSubmitted));
    assert!(entries.iter().any(|e| e.action == AuditAction::TradeExecuted));

    // No alert exists, so no trigger events.
    // Confirmation DM delivered; session gone.
    assert!(harness.chat.message_count().await >= 1);
    assert!(harness.orchestrator.sessions().get(&view_id).await.is_none());
}

#[tokio::test]
async fn test_live_host_routing_refused() {
    let config = Config {
        use_real_trading: true,
        broker_enabled: true,
        broker_key_id: "PKTEST".to_string(),
        broker_base_url: "https://api.broker.example.com".to_string(),
        ..sim_config()
    };
    let harness = build_harness(config, None).await;
    harness.market.set_price("AAPL", dec!(150.00)).await;

    harness
        .orchestrator
        .handle_event(slash_trade("U-AN1", "analyst-1"))
        .await
        .unwrap();
    harness
        .orchestrator
        .handle_event(symbol_action("V0", "AAPL"))
        .await
        .unwrap();
    settle().await;
    harness
        .orchestrator
        .handle_event(submission("V0"))
        .await
        .unwrap();
    settle().await;

    // Executes in the simulator despite real-trading config.
    let user = harness.users.find_by_chat_id("U-AN1").await.unwrap().unwrap();
    let trades = harness.trades.find_recent_by_user(&user.user_id, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(
        trades[0].venue,
        Some(tradedesk::domain::trading::types::Venue::Simulator)
    );
    assert_eq!(trades[0].status, TradeStatus::Filled);

    // And the refusal is audited as a routing downgrade.
    let recent = harness.audit.find_recent(20).await.unwrap();
    assert!(
        recent
            .iter()
            .any(|e| e.action == AuditAction::RoutingDowngrade)
    );
}

#[tokio::test]
async fn test_quote_outage_keeps_submit_disabled() {
    let harness = build_harness(sim_config(), None).await;
    harness.market.set_price("AAPL", dec!(150)).await;
    harness.market.fail_quotes(true).await;

    harness
        .orchestrator
        .handle_event(slash_trade("U-AN1", "analyst-1"))
        .await
        .unwrap();
    harness
        .orchestrator
        .handle_event(symbol_action("V0", "AAPL"))
        .await
        .unwrap();
    settle().await;

    // Workflow proceeds (session alive, symbol kept) but with no entry
    // price the submission gates on the price error.
    let session = harness.orchestrator.sessions().get("V0").await.unwrap();
    assert_eq!(session.symbol.as_deref(), Some("AAPL"));
    assert!(session.entry_price.is_none());
    assert!(!session.ready_to_submit());

    let ack = harness
        .orchestrator
        .handle_event(submission("V0"))
        .await
        .unwrap();
    // Submission without a price is rejected inline, not executed.
    match ack {
        Ack::ResponseAction(v) => assert_eq!(v["response_action"], "errors"),
        other => panic!("expected errors, got {:?}", other),
    }
}

#[tokio::test]
async fn test_suspended_user_is_refused_and_audited() {
    let harness = build_harness(sim_config(), None).await;

    // Provision, then suspend.
    harness
        .orchestrator
        .handle_event(slash_trade("U-SUS", "suspended-1"))
        .await
        .unwrap();
    let user = harness.users.find_by_chat_id("U-SUS").await.unwrap().unwrap();
    harness
        .users
        .set_status(&user.user_id, tradedesk::domain::user::UserStatus::Suspended)
        .await
        .unwrap();

    let ack = harness
        .orchestrator
        .handle_event(slash_trade("U-SUS", "suspended-1"))
        .await
        .unwrap();
    match ack {
        Ack::Text(text) => assert!(text.contains("suspended")),
        other => panic!("expected refusal text, got {:?}", other),
    }

    let recent = harness.audit.find_recent(20).await.unwrap();
    assert!(
        recent
            .iter()
            .any(|e| e.action == AuditAction::PolicyViolation)
    );
}

#[tokio::test]
async fn test_unknown_action_id_is_a_typed_error() {
    let harness = build_harness(sim_config(), None).await;
    let event = ChatEvent::BlockAction {
        action_id: "legacy_glob_handler".to_string(),
        value: None,
        chat_user_id: "U-AN1".to_string(),
        view_id: Some("V0".to_string()),
        trigger_id: None,
        channel_id: None,
        state: json!({}),
        private_metadata: None,
        price_display: None,
    };
    let result = harness.orchestrator.handle_event(event).await;
    assert!(matches!(
        result,
        Err(tradedesk::domain::errors::ChatEventError::UnknownAction { .. })
    ));
}
