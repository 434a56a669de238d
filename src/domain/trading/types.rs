use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "market" => Some(OrderType::Market),
            "limit" => Some(OrderType::Limit),
            "stop" => Some(OrderType::Stop),
            "stop_limit" => Some(OrderType::StopLimit),
            _ => None,
        }
    }

    /// Limit and StopLimit orders must carry a limit price.
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Submitted => "submitted",
            TradeStatus::PartiallyFilled => "partially_filled",
            TradeStatus::Filled => "filled",
            TradeStatus::Rejected => "rejected",
            TradeStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TradeStatus::Pending),
            "submitted" => Some(TradeStatus::Submitted),
            "partially_filled" => Some(TradeStatus::PartiallyFilled),
            "filled" => Some(TradeStatus::Filled),
            "rejected" => Some(TradeStatus::Rejected),
            "cancelled" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal trades are immutable; only the execution router mutates
    /// a trade before it reaches one of these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Filled | TradeStatus::Rejected | TradeStatus::Cancelled
        )
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Simulator,
    Broker,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Simulator => "simulator",
            Venue::Broker => "broker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simulator" => Some(Venue::Simulator),
            "broker" => Some(Venue::Broker),
            _ => None,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the entry price snapshot came from: the quote gateway, or
/// manual user entry after a quote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPriceSource {
    Quote,
    User,
}

impl EntryPriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPriceSource::Quote => "quote",
            EntryPriceSource::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quote" => Some(EntryPriceSource::Quote),
            "user" => Some(EntryPriceSource::User),
            _ => None,
        }
    }
}

/// A trade order as it moves through the workflow. Created by the
/// orchestrator in `Pending`, mutated only by the execution router
/// until terminal, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub entry_price: Decimal,
    pub entry_price_source: EntryPriceSource,
    pub status: TradeStatus,
    pub execution_id: Option<String>,
    pub fill_price: Option<Decimal>,
    pub filled_quantity: Option<i64>,
    pub commission: Decimal,
    pub venue: Option<Venue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: i64,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        entry_price: Decimal,
        entry_price_source: EntryPriceSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            trade_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            order_type,
            limit_price,
            entry_price,
            entry_price_source,
            status: TradeStatus::Pending,
            execution_id: None,
            fill_price: None,
            filled_quantity: None,
            commission: Decimal::ZERO,
            venue: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Gross market value at the entry price snapshot.
    pub fn notional(&self) -> Decimal {
        Decimal::from(self.quantity) * self.entry_price
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `filled_quantity × fill_price`, the executed size used by the
    /// alert predicate. Zero until a fill is recorded.
    pub fn executed_size(&self) -> Decimal {
        match (self.filled_quantity, self.fill_price) {
            (Some(qty), Some(price)) => Decimal::from(qty) * price,
            _ => Decimal::ZERO,
        }
    }
}

/// Snapshot quote from the market data gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub previous_close: Decimal,
    pub change: Decimal,
    pub change_pct: Decimal,
    pub day_high: Decimal,
    pub day_low: Decimal,
    pub volume: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe: Option<Decimal>,
    pub as_of: DateTime<Utc>,
    pub source_latency_ms: u64,
}

/// Normalized outcome of a routed execution, common to both venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub execution_id: Option<String>,
    pub status: TradeStatus,
    pub filled_quantity: i64,
    pub fill_price: Option<Decimal>,
    pub venue: Venue,
    pub submitted_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Symbols are 1-5 uppercase ASCII letters. Checked before any
/// network call is attempted.
pub fn is_well_formed_symbol(symbol: &str) -> bool {
    !symbol.is_empty() && symbol.len() <= 5 && symbol.chars().all(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_well_formedness() {
        assert!(is_well_formed_symbol("A"));
        assert!(is_well_formed_symbol("AAPL"));
        assert!(is_well_formed_symbol("GOOGL"));

        assert!(!is_well_formed_symbol(""));
        assert!(!is_well_formed_symbol("TOOLONG"));
        assert!(!is_well_formed_symbol("aapl"));
        assert!(!is_well_formed_symbol("BRK.B"));
        assert!(!is_well_formed_symbol("AAP1"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(TradeStatus::Filled.is_terminal());
        assert!(TradeStatus::Rejected.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
        assert!(!TradeStatus::Pending.is_terminal());
        assert!(!TradeStatus::Submitted.is_terminal());
        assert!(!TradeStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_trade_notional() {
        let trade = Trade::pending(
            "u-1",
            "AAPL",
            OrderSide::Buy,
            100,
            OrderType::Market,
            None,
            dec!(150.00),
            EntryPriceSource::Quote,
        );
        assert_eq!(trade.notional(), dec!(15000.00));
        assert_eq!(trade.status, TradeStatus::Pending);
        assert_eq!(trade.executed_size(), Decimal::ZERO);
    }

    #[test]
    fn test_executed_size_uses_fill() {
        let mut trade = Trade::pending(
            "u-1",
            "AAPL",
            OrderSide::Buy,
            100,
            OrderType::Market,
            None,
            dec!(150.00),
            EntryPriceSource::Quote,
        );
        trade.fill_price = Some(dec!(150.0150));
        trade.filled_quantity = Some(100);
        assert_eq!(trade.executed_size(), dec!(15001.5000));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TradeStatus::Pending,
            TradeStatus::Submitted,
            TradeStatus::PartiallyFilled,
            TradeStatus::Filled,
            TradeStatus::Rejected,
            TradeStatus::Cancelled,
        ] {
            assert_eq!(TradeStatus::parse(status.as_str()), Some(status));
        }
    }
}
