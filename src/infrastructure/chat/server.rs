//! Inbound HTTP surface for the chat platform. Handlers verify the
//! request signature, decode the event and answer within the
//! platform's ack deadline; anything slower runs detached inside the
//! orchestrator.

use crate::application::orchestrator::{Ack, TradeOrchestrator};
use crate::infrastructure::chat::events::{
    parse_event_callback, parse_interaction, parse_slash_command,
};
use crate::infrastructure::chat::signature::verify_signature;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";

pub struct ChatServer {
    pub orchestrator: Arc<TradeOrchestrator>,
    pub signing_secret: String,
}

pub fn router(server: Arc<ChatServer>) -> Router {
    Router::new()
        .route("/slack/commands", post(handle_command))
        .route("/slack/interactions", post(handle_interaction))
        .route("/slack/events", post(handle_event_callback))
        .route("/healthz", get(healthz))
        .with_state(server)
}

async fn healthz() -> &'static str {
    "ok"
}

fn authenticate(server: &ChatServer, headers: &HeaderMap, body: &str) -> Result<(), Response> {
    if server.signing_secret.is_empty() {
        warn!("Signature verification disabled: no signing secret configured");
        return Ok(());
    }
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    verify_signature(
        &server.signing_secret,
        timestamp,
        body,
        provided,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!("Rejected inbound request: {}", e);
        StatusCode::UNAUTHORIZED.into_response()
    })
}

fn ack_response(ack: Ack) -> Response {
    match ack {
        Ack::Empty => StatusCode::OK.into_response(),
        Ack::Text(text) => Json(json!({
            "response_type": "ephemeral",
            "text": text,
        }))
        .into_response(),
        Ack::ResponseAction(value) => Json(value).into_response(),
    }
}

async fn handle_command(
    State(server): State<Arc<ChatServer>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(response) = authenticate(&server, &headers, &body) {
        return response;
    }
    let event = match parse_slash_command(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Malformed slash command: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    match server.orchestrator.handle_event(event).await {
        Ok(ack) => ack_response(ack),
        Err(e) => {
            warn!("Slash command handling failed: {}", e);
            StatusCode::OK.into_response()
        }
    }
}

async fn handle_interaction(
    State(server): State<Arc<ChatServer>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(response) = authenticate(&server, &headers, &body) {
        return response;
    }
    let event = match parse_interaction(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Malformed interaction payload: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    match server.orchestrator.handle_event(event).await {
        Ok(ack) => ack_response(ack),
        Err(e) => {
            // Unknown action ids are rejected with a typed error; the
            // platform still gets its ack.
            warn!("Interaction handling failed: {}", e);
            StatusCode::OK.into_response()
        }
    }
}

async fn handle_event_callback(
    State(server): State<Arc<ChatServer>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(response) = authenticate(&server, &headers, &body) {
        return response;
    }
    let json: Value = match serde_json::from_str(&body) {
        Ok(json) => json,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    // URL verification handshake echoes the challenge.
    if json["type"] == "url_verification" {
        return Json(json!({"challenge": json["challenge"]})).into_response();
    }

    if let Some(event) = parse_event_callback(&json) {
        let orchestrator = Arc::clone(&server.orchestrator);
        tokio::spawn(async move {
            if let Err(e) = orchestrator.handle_event(event).await {
                warn!("Event callback handling failed: {}", e);
            }
        });
    }
    StatusCode::OK.into_response()
}
