use crate::domain::ports::ChatApiService;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::{Value, json};
use std::time::Duration;

/// Web API client for the chat platform. Each call posts JSON with the
/// bot token and checks the platform's `ok` envelope.
pub struct ChatClient {
    client: ClientWithMiddleware,
    base_url: String,
    bot_token: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            // No retry middleware: the ack deadline leaves no room for it.
            client: HttpClientFactory::create_fast_client(Duration::from_secs(3)),
            base_url: base_url.into(),
            bot_token: bot_token.into(),
        }
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Chat API call failed: {}", method))?;

        let envelope: Value = response
            .json()
            .await
            .with_context(|| format!("Chat API returned non-JSON for {}", method))?;

        if envelope["ok"].as_bool() != Some(true) {
            let error = envelope["error"].as_str().unwrap_or("unknown_error");
            anyhow::bail!("Chat API {} rejected: {}", method, error);
        }
        Ok(envelope)
    }
}

#[async_trait]
impl ChatApiService for ChatClient {
    async fn open_view(&self, trigger_id: &str, view: &Value) -> Result<String> {
        let envelope = self
            .call("views.open", json!({"trigger_id": trigger_id, "view": view}))
            .await?;
        envelope["view"]["id"]
            .as_str()
            .map(str::to_string)
            .context("views.open response missing view id")
    }

    async fn update_view(&self, view_id: &str, view: &Value) -> Result<()> {
        self.call("views.update", json!({"view_id": view_id, "view": view}))
            .await?;
        Ok(())
    }

    async fn open_dm(&self, chat_user_id: &str) -> Result<String> {
        let envelope = self
            .call("conversations.open", json!({"users": chat_user_id}))
            .await?;
        envelope["channel"]["id"]
            .as_str()
            .map(str::to_string)
            .context("conversations.open response missing channel id")
    }

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        blocks: Option<&Value>,
    ) -> Result<()> {
        let mut body = json!({"channel": channel_id, "text": text});
        if let Some(blocks) = blocks {
            body["blocks"] = blocks.clone();
        }
        self.call("chat.postMessage", body).await?;
        Ok(())
    }

    async fn post_ephemeral(&self, channel_id: &str, chat_user_id: &str, text: &str) -> Result<()> {
        self.call(
            "chat.postEphemeral",
            json!({"channel": channel_id, "user": chat_user_id, "text": text}),
        )
        .await?;
        Ok(())
    }

    async fn publish_home(&self, chat_user_id: &str, view: &Value) -> Result<()> {
        self.call("views.publish", json!({"user_id": chat_user_id, "view": view}))
            .await?;
        Ok(())
    }
}
