use crate::domain::errors::MarketDataError;
use crate::domain::trading::types::Quote;
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Instant;
use tracing::debug;

const API_KEY_HEADER: &str = "X-Api-Key";

/// Raw quote payload from the provider.
#[derive(Debug, Deserialize)]
struct ProviderQuote {
    price: Decimal,
    #[allow(dead_code)]
    open: Option<Decimal>,
    high: Decimal,
    low: Decimal,
    prev_close: Decimal,
    volume: i64,
    #[serde(default)]
    market_cap: Option<Decimal>,
    #[serde(default)]
    pe: Option<Decimal>,
    ts: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SymbolDirectory {
    symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MarketStatus {
    open: bool,
}

/// Thin HTTP client for the external quote provider. Status codes map
/// to the typed error set; the gateway layers caching, rate limiting
/// and the circuit breaker on top.
pub struct QuoteProviderClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
}

impl QuoteProviderClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let url = build_url_with_query(
            &format!("{}/quote", self.base_url),
            &[("symbol", symbol)],
        );
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| MarketDataError::Unavailable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(MarketDataError::NotFound {
                symbol: symbol.to_string(),
            });
        }
        if status.as_u16() == 429 {
            return Err(MarketDataError::RateLimited);
        }
        if !status.is_success() {
            return Err(MarketDataError::Unavailable {
                reason: format!("provider returned {}", status),
            });
        }

        let raw: ProviderQuote =
            response
                .json()
                .await
                .map_err(|e| MarketDataError::Unavailable {
                    reason: format!("bad quote body: {}", e),
                })?;

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!("Quote {} fetched in {}ms", symbol, latency_ms);

        let change = raw.price - raw.prev_close;
        let change_pct = if raw.prev_close.is_zero() {
            Decimal::ZERO
        } else {
            change / raw.prev_close * Decimal::from(100)
        };

        Ok(Quote {
            symbol: symbol.to_string(),
            price: raw.price,
            previous_close: raw.prev_close,
            change,
            change_pct,
            day_high: raw.high,
            day_low: raw.low,
            volume: raw.volume,
            market_cap: raw.market_cap,
            pe: raw.pe,
            as_of: raw.ts,
            source_latency_ms: latency_ms,
        })
    }

    /// Tradable-symbol directory backing the allow-list.
    pub async fn fetch_symbol_directory(&self) -> Result<HashSet<String>, MarketDataError> {
        let url = format!("{}/symbols", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| MarketDataError::Unavailable {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MarketDataError::Unavailable {
                reason: format!("symbol directory returned {}", response.status()),
            });
        }

        let directory: SymbolDirectory =
            response
                .json()
                .await
                .map_err(|e| MarketDataError::Unavailable {
                    reason: format!("bad directory body: {}", e),
                })?;

        Ok(directory.symbols.into_iter().collect())
    }

    pub async fn fetch_market_open(&self) -> Result<bool, MarketDataError> {
        let url = format!("{}/market-status", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| MarketDataError::Unavailable {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MarketDataError::Unavailable {
                reason: format!("market status returned {}", response.status()),
            });
        }

        let status: MarketStatus =
            response
                .json()
                .await
                .map_err(|e| MarketDataError::Unavailable {
                    reason: format!("bad status body: {}", e),
                })?;

        Ok(status.open)
    }
}
