use crate::domain::ports::{MarketContext, RiskAnalysisRequest, RiskAnalysisService, RiskAssessment};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    score: u8,
    narrative: String,
    #[serde(default)]
    flags: Vec<String>,
}

/// Client for the AI risk-analysis collaborator. Best-effort by
/// contract: the whole call is bounded by the configured timeout and a
/// failure renders as "risk unavailable" upstream, never blocking
/// submission.
pub struct RiskAnalysisClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl RiskAnalysisClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: HttpClientFactory::create_fast_client(timeout),
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RiskAnalysisService for RiskAnalysisClient {
    async fn analyze(
        &self,
        request: &RiskAnalysisRequest,
        context: &MarketContext,
    ) -> Result<RiskAssessment> {
        let body = json!({
            "trade": {
                "symbol": request.symbol,
                "side": request.side.as_str(),
                "quantity": request.quantity,
                "order_type": request.order_type.as_str(),
                "entry_price": request.entry_price.to_string(),
            },
            "market_context": {
                "price": context.quote.as_ref().map(|q| q.price.to_string()),
                "change_pct": context.quote.as_ref().map(|q| q.change_pct.to_string()),
                "vix": context.vix.map(|v| v.to_string()),
                "market_open": context.market_open,
            },
        });

        let call = async {
            let response = self
                .client
                .post(format!("{}/analyze", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .context("Risk analysis request failed")?;

            if !response.status().is_success() {
                anyhow::bail!("Risk analysis returned {}", response.status());
            }

            let analysis: AnalysisResponse = response
                .json()
                .await
                .context("Failed to decode risk analysis")?;
            Ok::<_, anyhow::Error>(analysis)
        };

        let analysis = tokio::time::timeout(self.timeout, call)
            .await
            .context("Risk analysis timed out")??;

        Ok(RiskAssessment {
            score: analysis.score.min(10),
            narrative: analysis.narrative,
            flags: analysis.flags,
        })
    }
}
