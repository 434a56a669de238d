use rust_decimal::Decimal;
use thiserror::Error;

/// Failure classification for the execution router: validation, funds,
/// market hours, venue availability, timeout.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid trade: {reason}")]
    Validation { reason: String },

    #[error("Insufficient buying power: need ${need}, available ${available}")]
    InsufficientFunds { need: Decimal, available: Decimal },

    #[error("Market is closed for {symbol}")]
    MarketClosed { symbol: String },

    #[error("Broker unavailable: {reason}")]
    BrokerUnavailable { reason: String },

    #[error("Order rejected by venue: {reason}")]
    Rejected { reason: String },

    #[error("Fill confirmation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Persistence or other system failure; surfaced to the user as a
    /// generic message with the correlation id.
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

/// Errors surfaced by the market data gateway.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Unknown symbol: {symbol}")]
    NotFound { symbol: String },

    #[error("Symbol failed validation: {symbol}")]
    InvalidSymbol { symbol: String },

    #[error("Quote provider rate limit exhausted")]
    RateLimited,

    #[error("Quote provider unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Circuit open; retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },
}

impl MarketDataError {
    /// Callers must not retry these synchronously.
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            MarketDataError::RateLimited | MarketDataError::CircuitOpen { .. }
        )
    }
}

/// Errors raised while delivering chat notifications.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("User {user_id} has no reachable DM channel")]
    NoChannel { user_id: String },
}

/// Errors raised while decoding or authenticating inbound chat events.
#[derive(Debug, Error)]
pub enum ChatEventError {
    #[error("Request signature rejected")]
    BadSignature,

    #[error("Request timestamp outside tolerance")]
    StaleTimestamp,

    #[error("Unknown action id: {action_id}")]
    UnknownAction { action_id: String },

    #[error("Malformed payload: {reason}")]
    Malformed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_execution_error_messages() {
        let err = ExecutionError::InsufficientFunds {
            need: dec!(15000),
            available: dec!(12000.50),
        };
        let msg = err.to_string();
        assert!(msg.contains("15000"));
        assert!(msg.contains("12000.50"));
    }

    #[test]
    fn test_backpressure_classification() {
        assert!(MarketDataError::RateLimited.is_backpressure());
        assert!(MarketDataError::CircuitOpen { retry_in_ms: 500 }.is_backpressure());
        assert!(
            !MarketDataError::NotFound {
                symbol: "AAPL".into()
            }
            .is_backpressure()
        );
    }
}
