use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Hour-of-day window `[start, end)` in UTC during which non-critical
/// notifications are suppressed. A window that wraps midnight is valid
/// (e.g. 22-07).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl FromStr for QuietHours {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("Invalid QUIET_HOURS: {}. Expected START-END", s))?;
        let start_hour: u32 = start.trim().parse().context("Invalid quiet-hours start")?;
        let end_hour: u32 = end.trim().parse().context("Invalid quiet-hours end")?;
        if start_hour > 23 || end_hour > 23 {
            anyhow::bail!("Quiet hours must be 0-23, got {}-{}", start_hour, end_hour);
        }
        Ok(QuietHours {
            start_hour,
            end_hour,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Chat platform
    pub chat_signing_secret: String,
    pub chat_bot_token: String,
    pub chat_base_url: String,
    /// Channels where /trade is allowed. Empty = every channel approved.
    pub approved_channels: Vec<String>,

    // Quote provider
    pub quote_api_key: String,
    pub quote_base_url: String,
    pub vix_symbol: String,
    pub quote_rate_per_min: u32,
    pub quote_burst: u32,
    pub quote_l1_ttl_secs: u64,
    pub quote_l2_ttl_secs: u64,
    pub vix_ttl_secs: u64,
    pub symbol_directory_ttl_secs: u64,

    // Broker (paper only)
    pub use_real_trading: bool,
    pub broker_enabled: bool,
    pub broker_key_id: String,
    pub broker_secret: String,
    pub broker_base_url: String,
    pub after_hours_limit_orders: bool,

    // Trade caps
    pub max_position_size: i64,
    pub max_trade_value: Decimal,

    // AI risk service
    pub risk_ai_base_url: String,
    pub risk_ai_api_key: String,
    pub risk_ai_timeout_secs: u64,

    // Persistence
    pub database_url: String,

    // Server
    pub bind_addr: String,

    // Notifications
    pub quiet_hours: Option<QuietHours>,
    pub notify_rate_per_min: u32,

    /// Default deadline inherited by external calls made on behalf of
    /// one chat event.
    pub external_call_deadline_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let chat_signing_secret = env::var("CHAT_SIGNING_SECRET").unwrap_or_default();
        let chat_bot_token = env::var("CHAT_BOT_TOKEN").unwrap_or_default();
        let chat_base_url =
            env::var("CHAT_BASE_URL").unwrap_or_else(|_| "https://slack.com/api".to_string());

        let approved_channels: Vec<String> = env::var("APPROVED_CHANNELS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let quote_api_key = env::var("QUOTE_API_KEY").unwrap_or_default();
        let quote_base_url = env::var("QUOTE_BASE_URL")
            .unwrap_or_else(|_| "https://quotes.example.com/v1".to_string());
        let vix_symbol = env::var("VIX_SYMBOL").unwrap_or_else(|_| "VIX".to_string());

        let quote_rate_per_min = parse_env("QUOTE_RATE_PER_MIN", 60)?;
        let quote_burst = parse_env("QUOTE_BURST", 10)?;
        let quote_l1_ttl_secs = parse_env("QUOTE_L1_TTL_SECS", 5)?;
        let quote_l2_ttl_secs = parse_env("QUOTE_L2_TTL_SECS", 60)?;
        let vix_ttl_secs = parse_env("VIX_TTL_SECS", 300)?;
        let symbol_directory_ttl_secs = parse_env("SYMBOL_DIRECTORY_TTL_SECS", 3600)?;

        let use_real_trading = parse_bool("USE_REAL_TRADING", false)?;
        let broker_enabled = parse_bool("BROKER_ENABLED", false)?;
        let broker_key_id = env::var("BROKER_KEY_ID").unwrap_or_default();
        let broker_secret = env::var("BROKER_SECRET").unwrap_or_default();
        let broker_base_url = env::var("BROKER_BASE_URL")
            .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());
        let after_hours_limit_orders = parse_bool("AFTER_HOURS_LIMIT_ORDERS", true)?;

        let max_position_size = parse_env("MAX_POSITION_SIZE", 10_000i64)?;
        let max_trade_value = env::var("MAX_TRADE_VALUE")
            .ok()
            .map(|s| Decimal::from_str(&s))
            .transpose()
            .context("Invalid MAX_TRADE_VALUE")?
            .unwrap_or_else(|| Decimal::from(1_000_000));

        let risk_ai_base_url =
            env::var("RISK_AI_BASE_URL").unwrap_or_else(|_| "https://risk.example.com".to_string());
        let risk_ai_api_key = env::var("RISK_AI_API_KEY").unwrap_or_default();
        let risk_ai_timeout_secs = parse_env("RISK_AI_TIMEOUT_SECS", 5)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/tradedesk.db".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let quiet_hours = match env::var("QUIET_HOURS") {
            Ok(raw) if !raw.trim().is_empty() => Some(QuietHours::from_str(raw.trim())?),
            _ => None,
        };
        let notify_rate_per_min = parse_env("NOTIFY_RATE_PER_MIN", 30)?;

        let external_call_deadline_secs = parse_env("EXTERNAL_CALL_DEADLINE_SECS", 10)?;

        Ok(Self {
            chat_signing_secret,
            chat_bot_token,
            chat_base_url,
            approved_channels,
            quote_api_key,
            quote_base_url,
            vix_symbol,
            quote_rate_per_min,
            quote_burst,
            quote_l1_ttl_secs,
            quote_l2_ttl_secs,
            vix_ttl_secs,
            symbol_directory_ttl_secs,
            use_real_trading,
            broker_enabled,
            broker_key_id,
            broker_secret,
            broker_base_url,
            after_hours_limit_orders,
            max_position_size,
            max_trade_value,
            risk_ai_base_url,
            risk_ai_api_key,
            risk_ai_timeout_secs,
            database_url,
            bind_addr,
            quiet_hours,
            notify_rate_per_min,
            external_call_deadline_secs,
        })
    }

    /// True when the configured channel list approves this channel.
    pub fn channel_approved(&self, channel_id: &str) -> bool {
        self.approved_channels.is_empty()
            || self.approved_channels.iter().any(|c| c == channel_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chat_signing_secret: String::new(),
            chat_bot_token: String::new(),
            chat_base_url: "https://slack.com/api".to_string(),
            approved_channels: Vec::new(),
            quote_api_key: String::new(),
            quote_base_url: "https://quotes.example.com/v1".to_string(),
            vix_symbol: "VIX".to_string(),
            quote_rate_per_min: 60,
            quote_burst: 10,
            quote_l1_ttl_secs: 5,
            quote_l2_ttl_secs: 60,
            vix_ttl_secs: 300,
            symbol_directory_ttl_secs: 3600,
            use_real_trading: false,
            broker_enabled: false,
            broker_key_id: String::new(),
            broker_secret: String::new(),
            broker_base_url: "https://paper-api.alpaca.markets".to_string(),
            after_hours_limit_orders: true,
            max_position_size: 10_000,
            max_trade_value: Decimal::from(1_000_000),
            risk_ai_base_url: "https://risk.example.com".to_string(),
            risk_ai_api_key: String::new(),
            risk_ai_timeout_secs: 5,
            database_url: "sqlite://data/tradedesk.db".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            quiet_hours: None,
            notify_rate_per_min: 30,
            external_call_deadline_secs: 10,
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("Invalid {}: {}. Expected true/false", key, other),
        },
        Err(_) => Ok(default),
    }
}
