//! Inbound chat events, decoded from the platform's two wire shapes:
//! form-encoded slash commands and form-encoded `payload=<json>`
//! interaction callbacks.

use crate::domain::errors::ChatEventError;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum ChatEvent {
    SlashCommand {
        command: String,
        text: String,
        chat_user_id: String,
        user_name: String,
        channel_id: Option<String>,
        trigger_id: String,
    },
    BlockAction {
        action_id: String,
        value: Option<String>,
        chat_user_id: String,
        view_id: Option<String>,
        trigger_id: Option<String>,
        channel_id: Option<String>,
        state: Value,
        private_metadata: Option<String>,
        /// Rendered text of the current-price display block, when the
        /// payload carries the view. Authoritative for derivations.
        price_display: Option<String>,
    },
    ViewSubmission {
        callback_id: String,
        view_id: String,
        chat_user_id: String,
        state: Value,
        private_metadata: String,
    },
    ViewClosed {
        view_id: String,
        chat_user_id: String,
    },
    HomeOpened {
        chat_user_id: String,
    },
}

fn form_fields(body: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(body.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Decode a slash-command POST body.
pub fn parse_slash_command(body: &str) -> Result<ChatEvent, ChatEventError> {
    let fields = form_fields(body);
    let required = |key: &str| -> Result<String, ChatEventError> {
        fields
            .get(key)
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ChatEventError::Malformed {
                reason: format!("missing {}", key),
            })
    };

    Ok(ChatEvent::SlashCommand {
        command: required("command")?,
        text: fields.get("text").cloned().unwrap_or_default(),
        chat_user_id: required("user_id")?,
        user_name: fields.get("user_name").cloned().unwrap_or_default(),
        channel_id: fields.get("channel_id").cloned().filter(|v| !v.is_empty()),
        trigger_id: required("trigger_id")?,
    })
}

/// Decode an interaction POST body (`payload=<json>`).
pub fn parse_interaction(body: &str) -> Result<ChatEvent, ChatEventError> {
    let fields = form_fields(body);
    let payload = fields
        .get("payload")
        .ok_or_else(|| ChatEventError::Malformed {
            reason: "missing payload".to_string(),
        })?;
    let json: Value = serde_json::from_str(payload).map_err(|e| ChatEventError::Malformed {
        reason: format!("payload is not JSON: {}", e),
    })?;

    let kind = json["type"].as_str().unwrap_or_default();
    let chat_user_id = json["user"]["id"]
        .as_str()
        .ok_or_else(|| ChatEventError::Malformed {
            reason: "missing user.id".to_string(),
        })?
        .to_string();

    match kind {
        "block_actions" => {
            let action = json["actions"]
                .get(0)
                .ok_or_else(|| ChatEventError::Malformed {
                    reason: "empty actions array".to_string(),
                })?;
            let action_id = action["action_id"]
                .as_str()
                .ok_or_else(|| ChatEventError::Malformed {
                    reason: "missing action_id".to_string(),
                })?
                .to_string();
            // Buttons carry `value`; inputs carry `value`; selects carry
            // `selected_option.value`.
            let value = action["value"]
                .as_str()
                .or_else(|| action["selected_option"]["value"].as_str())
                .map(str::to_string);

            let price_display = json["view"]["blocks"].as_array().and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["block_id"] == "current_price_display")
                    .and_then(|b| b["text"]["text"].as_str())
                    .map(str::to_string)
            });

            Ok(ChatEvent::BlockAction {
                action_id,
                value,
                chat_user_id,
                view_id: json["view"]["id"].as_str().map(str::to_string),
                trigger_id: json["trigger_id"].as_str().map(str::to_string),
                channel_id: json["channel"]["id"].as_str().map(str::to_string),
                state: json["view"]["state"].clone(),
                private_metadata: json["view"]["private_metadata"]
                    .as_str()
                    .map(str::to_string),
                price_display,
            })
        }
        "view_submission" => Ok(ChatEvent::ViewSubmission {
            callback_id: json["view"]["callback_id"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            view_id: json["view"]["id"]
                .as_str()
                .ok_or_else(|| ChatEventError::Malformed {
                    reason: "missing view.id".to_string(),
                })?
                .to_string(),
            chat_user_id,
            state: json["view"]["state"].clone(),
            private_metadata: json["view"]["private_metadata"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        }),
        "view_closed" => Ok(ChatEvent::ViewClosed {
            view_id: json["view"]["id"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            chat_user_id,
        }),
        other => Err(ChatEventError::Malformed {
            reason: format!("unsupported interaction type: {}", other),
        }),
    }
}

/// Decode an Events-API callback. Returns None for event types the
/// system does not handle.
pub fn parse_event_callback(json: &Value) -> Option<ChatEvent> {
    let event = &json["event"];
    match event["type"].as_str() {
        Some("app_home_opened") => Some(ChatEvent::HomeOpened {
            chat_user_id: event["user"].as_str()?.to_string(),
        }),
        _ => None,
    }
}

/// Pull a submitted input value out of `view.state.values` by action
/// id, regardless of which block it sits in.
pub fn state_value(state: &Value, action_id: &str) -> Option<String> {
    let values = state.get("values")?.as_object()?;
    for block in values.values() {
        if let Some(entry) = block.get(action_id) {
            if let Some(v) = entry.get("value").and_then(Value::as_str) {
                return Some(v.to_string());
            }
            if let Some(v) = entry
                .get("selected_option")
                .and_then(|o| o.get("value"))
                .and_then(Value::as_str)
            {
                return Some(v.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_slash_command() {
        let body = "command=%2Ftrade&text=&user_id=U123&user_name=analyst-1&channel_id=C9&trigger_id=13345224609.738474920.8088930838d88f008e0";
        let event = parse_slash_command(body).unwrap();
        match event {
            ChatEvent::SlashCommand {
                command,
                chat_user_id,
                channel_id,
                trigger_id,
                ..
            } => {
                assert_eq!(command, "/trade");
                assert_eq!(chat_user_id, "U123");
                assert_eq!(channel_id.as_deref(), Some("C9"));
                assert!(trigger_id.starts_with("13345224609"));
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_slash_command_without_trigger_is_rejected() {
        assert!(parse_slash_command("command=%2Ftrade&user_id=U123").is_err());
    }

    #[test]
    fn test_parse_block_action() {
        let payload = json!({
            "type": "block_actions",
            "user": {"id": "U123"},
            "trigger_id": "trig-1",
            "view": {
                "id": "V456",
                "private_metadata": "{\"entry_price\":\"150.00\"}",
                "state": {"values": {}},
                "blocks": [
                    {"type": "section", "block_id": "current_price_display",
                     "text": {"type": "mrkdwn", "text": "*AAPL* — Current price: $150.00"}}
                ]
            },
            "actions": [{"action_id": "quantity_input", "value": "100"}]
        });
        let body = format!(
            "payload={}",
            url::form_urlencoded::byte_serialize(payload.to_string().as_bytes())
                .collect::<String>()
        );

        let event = parse_interaction(&body).unwrap();
        match event {
            ChatEvent::BlockAction {
                action_id,
                value,
                view_id,
                price_display,
                ..
            } => {
                assert_eq!(action_id, "quantity_input");
                assert_eq!(value.as_deref(), Some("100"));
                assert_eq!(view_id.as_deref(), Some("V456"));
                assert_eq!(
                    price_display.as_deref(),
                    Some("*AAPL* — Current price: $150.00")
                );
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_state_value_finds_inputs_and_selects() {
        let state = json!({
            "values": {
                "symbol_block": {
                    "symbol_input": {"type": "plain_text_input", "value": "AAPL"}
                },
                "side_block": {
                    "side_select": {
                        "type": "static_select",
                        "selected_option": {"value": "buy"}
                    }
                }
            }
        });
        assert_eq!(state_value(&state, "symbol_input").as_deref(), Some("AAPL"));
        assert_eq!(state_value(&state, "side_select").as_deref(), Some("buy"));
        assert_eq!(state_value(&state, "missing"), None);
    }
}
