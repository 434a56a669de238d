use crate::domain::trading::types::{OrderSide, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Net position per (user, symbol). Derived state: recomputed from the
/// user's terminal trades whenever a trade reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub user_id: String,
    pub symbol: String,
    /// Signed share count. Buys add, sells subtract.
    pub net_quantity: i64,
    /// Volume-weighted average price of the opening fills.
    pub cost_basis: Decimal,
    pub realized_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn flat(user_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            symbol: symbol.into(),
            net_quantity: 0,
            cost_basis: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Fold one fill into the position. Opening fills move the VWAP
    /// cost basis; closing fills realize P&L against it. A fill that
    /// crosses through flat re-opens on the far side at the fill price.
    pub fn apply_fill(&mut self, side: OrderSide, quantity: i64, price: Decimal) {
        if quantity <= 0 {
            return;
        }
        let signed: i64 = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        if self.net_quantity == 0 || (self.net_quantity > 0) == (signed > 0) {
            // Opening or adding: blend into the VWAP.
            let held = Decimal::from(self.net_quantity.abs());
            let added = Decimal::from(quantity);
            let total = held + added;
            self.cost_basis = (held * self.cost_basis + added * price) / total;
            self.net_quantity += signed;
        } else {
            let closing = quantity.min(self.net_quantity.abs());
            let per_share = if self.net_quantity > 0 {
                price - self.cost_basis
            } else {
                self.cost_basis - price
            };
            self.realized_pnl += per_share * Decimal::from(closing);
            self.net_quantity += signed;

            if self.net_quantity == 0 {
                self.cost_basis = Decimal::ZERO;
            } else if (self.net_quantity > 0) == (signed > 0) {
                // Crossed through flat; the remainder opens at the fill price.
                self.cost_basis = price;
            }
        }
        self.updated_at = Utc::now();
    }

    /// Rebuild the position from scratch over terminal trades, oldest
    /// first. Idempotent by construction; used by the async fallback
    /// when the store cannot commit the trade and position together.
    pub fn recompute(user_id: &str, symbol: &str, terminal_trades: &[Trade]) -> Self {
        let mut position = Position::flat(user_id, symbol);
        for trade in terminal_trades {
            if trade.symbol != symbol || trade.user_id != user_id {
                continue;
            }
            if let (Some(qty), Some(price)) = (trade.filled_quantity, trade.fill_price) {
                position.apply_fill(trade.side, qty, price);
            }
        }
        position
    }

    pub fn is_flat(&self) -> bool {
        self.net_quantity == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_long_sets_vwap() {
        let mut pos = Position::flat("u-1", "AAPL");
        pos.apply_fill(OrderSide::Buy, 100, dec!(150.0150));
        assert_eq!(pos.net_quantity, 100);
        assert_eq!(pos.cost_basis, dec!(150.0150));
        assert_eq!(pos.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_adding_blends_vwap() {
        let mut pos = Position::flat("u-1", "AAPL");
        pos.apply_fill(OrderSide::Buy, 100, dec!(100));
        pos.apply_fill(OrderSide::Buy, 100, dec!(110));
        assert_eq!(pos.net_quantity, 200);
        assert_eq!(pos.cost_basis, dec!(105));
    }

    #[test]
    fn test_partial_close_realizes_pnl() {
        let mut pos = Position::flat("u-1", "AAPL");
        pos.apply_fill(OrderSide::Buy, 100, dec!(100));
        pos.apply_fill(OrderSide::Sell, 40, dec!(110));
        assert_eq!(pos.net_quantity, 60);
        assert_eq!(pos.cost_basis, dec!(100));
        assert_eq!(pos.realized_pnl, dec!(400));
    }

    #[test]
    fn test_full_close_flattens() {
        let mut pos = Position::flat("u-1", "AAPL");
        pos.apply_fill(OrderSide::Buy, 100, dec!(100));
        pos.apply_fill(OrderSide::Sell, 100, dec!(90));
        assert!(pos.is_flat());
        assert_eq!(pos.cost_basis, Decimal::ZERO);
        assert_eq!(pos.realized_pnl, dec!(-1000));
    }

    #[test]
    fn test_cross_through_flat_reopens_short() {
        let mut pos = Position::flat("u-1", "AAPL");
        pos.apply_fill(OrderSide::Buy, 100, dec!(100));
        pos.apply_fill(OrderSide::Sell, 150, dec!(120));
        assert_eq!(pos.net_quantity, -50);
        assert_eq!(pos.cost_basis, dec!(120));
        assert_eq!(pos.realized_pnl, dec!(2000));
    }

    #[test]
    fn test_recompute_matches_incremental() {
        use crate::domain::trading::types::{EntryPriceSource, OrderType, TradeStatus};

        let mut t1 = Trade::pending(
            "u-1",
            "AAPL",
            OrderSide::Buy,
            100,
            OrderType::Market,
            None,
            dec!(100),
            EntryPriceSource::Quote,
        );
        t1.status = TradeStatus::Filled;
        t1.filled_quantity = Some(100);
        t1.fill_price = Some(dec!(100));

        let mut t2 = t1.clone();
        t2.trade_id = "t-2".into();
        t2.side = OrderSide::Sell;
        t2.filled_quantity = Some(40);
        t2.fill_price = Some(dec!(110));

        let recomputed = Position::recompute("u-1", "AAPL", &[t1, t2]);
        assert_eq!(recomputed.net_quantity, 60);
        assert_eq!(recomputed.realized_pnl, dec!(400));
    }

    #[test]
    fn test_net_quantity_is_signed_sum_of_fills() {
        // Buys add, sells subtract, across an arbitrary sequence.
        let mut pos = Position::flat("u-1", "NVDA");
        pos.apply_fill(OrderSide::Buy, 10, dec!(500));
        pos.apply_fill(OrderSide::Buy, 5, dec!(510));
        pos.apply_fill(OrderSide::Sell, 8, dec!(505));
        assert_eq!(pos.net_quantity, 10 + 5 - 8);
    }
}
