pub mod provider;

use crate::config::Config;
use crate::domain::errors::MarketDataError;
use crate::domain::ports::{MarketDataService, SharedCacheService};
use crate::domain::trading::types::{Quote, is_well_formed_symbol};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::rate_limiter::TokenBucketLimiter;
use crate::infrastructure::core::ttl_cache::TtlCache;
use async_trait::async_trait;
use provider::QuoteProviderClient;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const L1_CAPACITY: usize = 1024;
const GATEWAY_BUCKET_KEY: &str = "gateway";
const MARKET_STATUS_TTL: Duration = Duration::from_secs(60);

/// Rate-limited, cached, circuit-broken access to the quote provider.
///
/// Read order is L1 (in-process) -> L2 (shared) -> provider; every
/// provider hit writes back through both tiers. Process-wide state
/// (buckets, breaker, caches) lives here and nowhere else.
pub struct MarketDataGateway {
    provider: QuoteProviderClient,
    shared_cache: Arc<dyn SharedCacheService>,
    limiter: TokenBucketLimiter,
    breaker: CircuitBreaker,
    l1_quotes: TtlCache<Quote>,
    l1_vix: TtlCache<Decimal>,
    allow_list: RwLock<Option<AllowList>>,
    market_open: RwLock<Option<(Instant, bool)>>,
    vix_symbol: String,
    quote_l1_ttl: Duration,
    quote_l2_ttl: Duration,
    vix_ttl: Duration,
    directory_ttl: Duration,
}

struct AllowList {
    symbols: HashSet<String>,
    fetched_at: Instant,
}

impl MarketDataGateway {
    pub fn new(config: &Config, shared_cache: Arc<dyn SharedCacheService>) -> Self {
        Self {
            provider: QuoteProviderClient::new(&config.quote_base_url, &config.quote_api_key),
            shared_cache,
            limiter: TokenBucketLimiter::new(config.quote_rate_per_min, config.quote_burst),
            breaker: CircuitBreaker::for_market_data("quote-provider"),
            l1_quotes: TtlCache::new(L1_CAPACITY),
            l1_vix: TtlCache::new(4),
            allow_list: RwLock::new(None),
            market_open: RwLock::new(None),
            vix_symbol: config.vix_symbol.clone(),
            quote_l1_ttl: Duration::from_secs(config.quote_l1_ttl_secs),
            quote_l2_ttl: Duration::from_secs(config.quote_l2_ttl_secs),
            vix_ttl: Duration::from_secs(config.vix_ttl_secs),
            directory_ttl: Duration::from_secs(config.symbol_directory_ttl_secs),
        }
    }

    async fn fetch_quote_from_provider(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        if !self.limiter.try_acquire(GATEWAY_BUCKET_KEY).await {
            return Err(MarketDataError::RateLimited);
        }

        match self.breaker.call(self.provider.fetch_quote(symbol)).await {
            Ok(quote) => Ok(quote),
            Err(CircuitBreakerError::Open { retry_in }) => Err(MarketDataError::CircuitOpen {
                retry_in_ms: retry_in.as_millis() as u64,
            }),
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }

    fn l2_quote_key(symbol: &str) -> String {
        format!("quote:{}", symbol)
    }

    async fn l2_get_quote(&self, symbol: &str) -> Option<Quote> {
        match self.shared_cache.get(&Self::l2_quote_key(symbol)).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Shared cache read failed for {}: {}", symbol, e);
                None
            }
        }
    }

    async fn l2_put_quote(&self, quote: &Quote) {
        if let Ok(bytes) = serde_json::to_vec(quote) {
            if let Err(e) = self
                .shared_cache
                .set(&Self::l2_quote_key(&quote.symbol), &bytes, self.quote_l2_ttl)
                .await
            {
                warn!("Shared cache write failed for {}: {}", quote.symbol, e);
            }
        }
    }

    async fn allow_list_contains(&self, symbol: &str) -> Result<bool, MarketDataError> {
        {
            let guard = self.allow_list.read().await;
            if let Some(list) = guard.as_ref() {
                if list.fetched_at.elapsed() < self.directory_ttl {
                    return Ok(list.symbols.contains(symbol));
                }
            }
        }

        if !self.limiter.try_acquire(GATEWAY_BUCKET_KEY).await {
            // Serve a stale directory over failing the validation.
            let guard = self.allow_list.read().await;
            if let Some(list) = guard.as_ref() {
                return Ok(list.symbols.contains(symbol));
            }
            return Err(MarketDataError::RateLimited);
        }

        match self.provider.fetch_symbol_directory().await {
            Ok(symbols) => {
                let contains = symbols.contains(symbol);
                *self.allow_list.write().await = Some(AllowList {
                    symbols,
                    fetched_at: Instant::now(),
                });
                Ok(contains)
            }
            Err(e) => {
                warn!("Symbol directory refresh failed: {}", e);
                let guard = self.allow_list.read().await;
                match guard.as_ref() {
                    Some(list) => Ok(list.symbols.contains(symbol)),
                    // No directory at all: fall back to shape-only validation.
                    None => Ok(true),
                }
            }
        }
    }
}

#[async_trait]
impl MarketDataService for MarketDataGateway {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        if !is_well_formed_symbol(symbol) {
            return Err(MarketDataError::InvalidSymbol {
                symbol: symbol.to_string(),
            });
        }

        if let Some(quote) = self.l1_quotes.get(symbol).await {
            debug!("Quote {} served from L1", symbol);
            return Ok(quote);
        }

        if let Some(quote) = self.l2_get_quote(symbol).await {
            debug!("Quote {} served from L2", symbol);
            self.l1_quotes
                .insert(symbol, quote.clone(), self.quote_l1_ttl)
                .await;
            return Ok(quote);
        }

        let quote = self.fetch_quote_from_provider(symbol).await?;
        self.l1_quotes
            .insert(symbol, quote.clone(), self.quote_l1_ttl)
            .await;
        self.l2_put_quote(&quote).await;
        Ok(quote)
    }

    async fn get_vix(&self) -> Result<Decimal, MarketDataError> {
        if let Some(level) = self.l1_vix.get("vix").await {
            return Ok(level);
        }

        if let Ok(Some(bytes)) = self.shared_cache.get("vix").await {
            if let Ok(text) = std::str::from_utf8(&bytes) {
                if let Ok(level) = Decimal::from_str(text) {
                    self.l1_vix.insert("vix", level, self.vix_ttl).await;
                    return Ok(level);
                }
            }
        }

        let quote = self.fetch_quote_from_provider(&self.vix_symbol).await?;
        let level = quote.price;
        self.l1_vix.insert("vix", level, self.vix_ttl).await;
        if let Err(e) = self
            .shared_cache
            .set("vix", level.to_string().as_bytes(), self.vix_ttl)
            .await
        {
            warn!("Shared cache write failed for vix: {}", e);
        }
        Ok(level)
    }

    async fn is_market_open(&self) -> Result<bool, MarketDataError> {
        {
            let guard = self.market_open.read().await;
            if let Some((fetched_at, open)) = *guard {
                if fetched_at.elapsed() < MARKET_STATUS_TTL {
                    return Ok(open);
                }
            }
        }

        match self.provider.fetch_market_open().await {
            Ok(open) => {
                *self.market_open.write().await = Some((Instant::now(), open));
                Ok(open)
            }
            Err(e) => {
                // Closed is the safe answer when the clock is unreachable.
                warn!("Market status fetch failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn validate_symbol(&self, symbol: &str) -> Result<bool, MarketDataError> {
        if !is_well_formed_symbol(symbol) {
            return Ok(false);
        }
        self.allow_list_contains(symbol).await
    }
}
