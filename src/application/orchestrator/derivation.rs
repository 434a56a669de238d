//! Bidirectional quantity/notional derivation. Pure arithmetic, no
//! suspension: the caller holds the session lock across a derivation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// `notional = quantity × price`, rounded half-to-even to cents.
pub fn derive_notional(quantity: i64, entry_price: Decimal) -> Decimal {
    (Decimal::from(quantity) * entry_price)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// `quantity = floor(notional / price)`. A non-positive price makes the
/// derivation a no-op rather than an exception; the typed notional is
/// never upscaled in response.
pub fn derive_quantity(notional: Decimal, entry_price: Decimal) -> Option<i64> {
    if entry_price <= Decimal::ZERO {
        return None;
    }
    (notional / entry_price).floor().to_i64()
}

/// Parse a user-typed money amount: tolerate "$", thousands separators
/// and whitespace.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Parse a user-typed share count.
pub fn parse_quantity(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Pull the price out of a rendered display block such as
/// "Current price: $1,234.56". The display is authoritative for
/// derivations; the modal's private metadata is the fallback.
pub fn extract_price_from_display(text: &str) -> Option<Decimal> {
    let dollar = text.find('$')?;
    let tail = &text[dollar + 1..];
    let token: String = tail
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ','))
        .filter(|c| *c != ',')
        .collect();
    if token.is_empty() {
        return None;
    }
    token.parse().ok()
}
