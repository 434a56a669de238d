//! Typed block-kit layout structures for the chat platform.
//!
//! Optional fields must be omitted from the wire form rather than sent
//! as null; the platform rejects nulls. Every optional is therefore
//! `skip_serializing_if`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Text {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<bool>,
}

impl Text {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: "plain_text".to_string(),
            text: text.into(),
            emoji: Some(true),
        }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn".to_string(),
            text: text.into(),
            emoji: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub text: Text,
    pub value: String,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text: Text::plain(label),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Text,
    pub action_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// "primary" or "danger"; omitted for the default look.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl Button {
    pub fn new(label: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            kind: "button".to_string(),
            text: Text::plain(label),
            action_id: action_id.into(),
            value: None,
            style: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn primary(mut self) -> Self {
        self.style = Some("primary".to_string());
        self
    }

    pub fn danger(mut self) -> Self {
        self.style = Some("danger".to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchActionConfig {
    pub trigger_actions_on: Vec<String>,
}

impl DispatchActionConfig {
    /// Fire a block action on every character entered.
    pub fn on_character_entered() -> Self {
        Self {
            trigger_actions_on: vec!["on_character_entered".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Element {
    #[serde(rename = "plain_text_input")]
    PlainTextInput {
        action_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_value: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        placeholder: Option<Text>,
        #[serde(skip_serializing_if = "Option::is_none")]
        dispatch_action_config: Option<DispatchActionConfig>,
    },
    #[serde(rename = "static_select")]
    StaticSelect {
        action_id: String,
        options: Vec<SelectOption>,
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_option: Option<SelectOption>,
        #[serde(skip_serializing_if = "Option::is_none")]
        placeholder: Option<Text>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Block {
    #[serde(rename = "section")]
    Section {
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        text: Text,
    },
    #[serde(rename = "divider")]
    Divider,
    #[serde(rename = "input")]
    Input {
        block_id: String,
        label: Text,
        element: Element,
        #[serde(skip_serializing_if = "Option::is_none")]
        dispatch_action: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        optional: Option<bool>,
    },
    #[serde(rename = "actions")]
    Actions {
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        elements: Vec<Button>,
    },
    #[serde(rename = "context")]
    Context { elements: Vec<Text> },
}

impl Block {
    pub fn section(text: impl Into<String>) -> Self {
        Block::Section {
            block_id: None,
            text: Text::mrkdwn(text),
        }
    }

    pub fn section_with_id(block_id: impl Into<String>, text: impl Into<String>) -> Self {
        Block::Section {
            block_id: Some(block_id.into()),
            text: Text::mrkdwn(text),
        }
    }

    pub fn context(text: impl Into<String>) -> Self {
        Block::Context {
            elements: vec![Text::mrkdwn(text)],
        }
    }
}

/// A modal view. Views with input blocks must always carry a submit
/// definition, so `submit` is not optional here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalView {
    #[serde(rename = "type")]
    pub kind: String,
    pub callback_id: String,
    pub title: Text,
    pub submit: Text,
    pub close: Text,
    pub blocks: Vec<Block>,
    pub private_metadata: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_on_close: Option<bool>,
}

impl ModalView {
    pub fn new(callback_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: "modal".to_string(),
            callback_id: callback_id.into(),
            title: Text::plain(title),
            submit: Text::plain("Submit"),
            close: Text::plain("Cancel"),
            blocks: Vec::new(),
            private_metadata: String::new(),
            notify_on_close: Some(true),
        }
    }

    pub fn with_submit_label(mut self, label: impl Into<String>) -> Self {
        self.submit = Text::plain(label);
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Block>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_private_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.private_metadata = metadata.into();
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Home-tab surface.
#[derive(Debug, Clone, Serialize)]
pub struct HomeView {
    #[serde(rename = "type")]
    pub kind: String,
    pub blocks: Vec<Block>,
}

impl HomeView {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            kind: "home".to_string(),
            blocks,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_omits_missing_style() {
        let button = Button::new("Submit", "submit_trade");
        let json = serde_json::to_value(&button).unwrap();
        assert!(json.get("style").is_none());
        assert!(json.get("value").is_none());

        let styled = Button::new("Delete", "delete_alert").danger();
        let json = serde_json::to_value(&styled).unwrap();
        assert_eq!(json["style"], "danger");
    }

    #[test]
    fn test_modal_always_has_submit() {
        let view = ModalView::new("trade_modal", "Place Trade");
        let json = view.to_value();
        assert_eq!(json["type"], "modal");
        assert_eq!(json["submit"]["type"], "plain_text");
    }

    #[test]
    fn test_input_block_serialization() {
        let block = Block::Input {
            block_id: "symbol_block".to_string(),
            label: Text::plain("Symbol"),
            element: Element::PlainTextInput {
                action_id: "symbol_input".to_string(),
                initial_value: None,
                placeholder: Some(Text::plain("AAPL")),
                dispatch_action_config: Some(DispatchActionConfig::on_character_entered()),
            },
            dispatch_action: Some(true),
            optional: None,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "input");
        assert_eq!(json["element"]["type"], "plain_text_input");
        assert!(json["element"].get("initial_value").is_none());
        assert!(json.get("optional").is_none());
    }
}
