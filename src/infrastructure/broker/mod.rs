use crate::domain::ports::{
    BrokerAccount, BrokerOrder, BrokerOrderRequest, BrokerOrderStatus, BrokerPosition,
    BrokerService,
};
use crate::domain::trading::types::{OrderSide, OrderType};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

/// Key ids issued for paper accounts carry this prefix; the router
/// refuses to route when it is missing.
pub const PAPER_KEY_PREFIX: &str = "PK";
/// Paper-trading hosts carry this prefix; any other host is a live
/// endpoint and is never dispatched to.
pub const PAPER_HOST_PREFIX: &str = "paper-";

/// True only when the broker base URL points at a paper-trading host.
pub fn is_paper_host(base_url: &str) -> bool {
    url::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.starts_with(PAPER_HOST_PREFIX)))
        .unwrap_or(false)
}

#[derive(Debug, Serialize)]
struct OrderRequestBody {
    symbol: String,
    qty: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    buying_power: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    tradable: bool,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: String,
    avg_entry_price: String,
}

fn map_order_status(raw: &str) -> BrokerOrderStatus {
    match raw {
        "filled" => BrokerOrderStatus::Filled,
        "partially_filled" => BrokerOrderStatus::PartiallyFilled,
        "rejected" | "expired" | "suspended" => BrokerOrderStatus::Rejected,
        "canceled" | "cancelled" | "done_for_day" => BrokerOrderStatus::Cancelled,
        _ => BrokerOrderStatus::Accepted,
    }
}

fn to_broker_order(raw: OrderResponse) -> BrokerOrder {
    BrokerOrder {
        status: map_order_status(&raw.status),
        filled_quantity: raw
            .filled_qty
            .as_deref()
            .and_then(|q| Decimal::from_str(q).ok())
            .and_then(|d| d.trunc().to_i64())
            .unwrap_or(0),
        filled_avg_price: raw
            .filled_avg_price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok()),
        submitted_at: raw.submitted_at.unwrap_or_else(Utc::now),
        order_id: raw.id,
    }
}

/// REST client against the broker's paper-trading API.
pub struct PaperBrokerClient {
    client: ClientWithMiddleware,
    key_id: String,
    secret: String,
    base_url: String,
}

impl PaperBrokerClient {
    pub fn new(
        key_id: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            key_id: key_id.into(),
            secret: secret.into(),
            base_url: base_url.into(),
        }
    }

    fn get(&self, path: &str) -> reqwest_middleware::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header(KEY_HEADER, &self.key_id)
            .header(SECRET_HEADER, &self.secret)
    }
}

#[async_trait]
impl BrokerService for PaperBrokerClient {
    async fn account(&self) -> Result<BrokerAccount> {
        let response = self
            .get("/v2/account")
            .send()
            .await
            .context("Failed to fetch broker account")?;
        let body = response
            .text()
            .await
            .context("Failed to read account body")?;
        let account: AccountResponse = serde_json::from_str(&body)
            .map_err(|e| anyhow::anyhow!("Failed to decode account: {}. Body: {}", e, body))?;

        Ok(BrokerAccount {
            buying_power: Decimal::from_str(&account.buying_power).unwrap_or(Decimal::ZERO),
            status: account.status,
        })
    }

    async fn is_symbol_tradable(&self, symbol: &str) -> Result<bool> {
        let response = self
            .get(&format!("/v2/assets/{}", symbol))
            .send()
            .await
            .context("Failed to fetch asset")?;

        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        let asset: AssetResponse = response.json().await.context("Failed to decode asset")?;
        Ok(asset.tradable)
    }

    async fn submit_order(&self, request: &BrokerOrderRequest) -> Result<BrokerOrder> {
        let body = OrderRequestBody {
            symbol: request.symbol.clone(),
            qty: request.quantity.to_string(),
            side: match request.side {
                OrderSide::Buy => "buy".to_string(),
                OrderSide::Sell => "sell".to_string(),
            },
            order_type: match request.order_type {
                OrderType::Market => "market".to_string(),
                OrderType::Limit => "limit".to_string(),
                OrderType::Stop => "stop".to_string(),
                OrderType::StopLimit => "stop_limit".to_string(),
            },
            time_in_force: "day".to_string(),
            limit_price: request.limit_price.map(|p| p.to_string()),
        };

        let response = self
            .client
            .post(format!("{}/v2/orders", self.base_url))
            .header(KEY_HEADER, &self.key_id)
            .header(SECRET_HEADER, &self.secret)
            .json(&body)
            .send()
            .await
            .context("Failed to submit order")?;

        let status = response.status();
        let text = response.text().await.context("Failed to read order body")?;
        if !status.is_success() {
            anyhow::bail!("Order submit failed ({}): {}", status, text);
        }

        let order: OrderResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Failed to decode order: {}. Body: {}", e, text))?;
        info!("Broker accepted order {} ({})", order.id, order.status);
        Ok(to_broker_order(order))
    }

    async fn get_order(&self, order_id: &str) -> Result<BrokerOrder> {
        let response = self
            .get(&format!("/v2/orders/{}", order_id))
            .send()
            .await
            .context("Failed to fetch order")?;
        let order: OrderResponse = response.json().await.context("Failed to decode order")?;
        Ok(to_broker_order(order))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.client
            .delete(format!("{}/v2/orders/{}", self.base_url, order_id))
            .header(KEY_HEADER, &self.key_id)
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await
            .context("Failed to cancel order")?;
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        let response = self
            .get("/v2/positions")
            .send()
            .await
            .context("Failed to fetch positions")?;
        let raw: Vec<PositionResponse> =
            response.json().await.context("Failed to decode positions")?;

        Ok(raw
            .into_iter()
            .map(|p| BrokerPosition {
                symbol: p.symbol,
                quantity: Decimal::from_str(&p.qty).unwrap_or(Decimal::ZERO),
                avg_entry_price: Decimal::from_str(&p.avg_entry_price).unwrap_or(Decimal::ZERO),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_host_detection() {
        assert!(is_paper_host("https://paper-api.alpaca.markets"));
        assert!(!is_paper_host("https://api.alpaca.markets"));
        assert!(!is_paper_host("https://api.broker.example.com"));
        assert!(!is_paper_host("not a url"));
    }

    #[test]
    fn test_order_status_mapping() {
        assert_eq!(map_order_status("filled"), BrokerOrderStatus::Filled);
        assert_eq!(
            map_order_status("partially_filled"),
            BrokerOrderStatus::PartiallyFilled
        );
        assert_eq!(map_order_status("rejected"), BrokerOrderStatus::Rejected);
        assert_eq!(map_order_status("canceled"), BrokerOrderStatus::Cancelled);
        assert_eq!(map_order_status("new"), BrokerOrderStatus::Accepted);
        assert_eq!(map_order_status("pending_new"), BrokerOrderStatus::Accepted);
    }
}
