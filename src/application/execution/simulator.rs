use crate::application::execution::slippage::{GaussianSlippage, SlippageModel};
use crate::domain::trading::types::{ExecutionReport, OrderSide, Trade, TradeStatus, Venue};
use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};

/// Orders above this size fill in two tranches.
const PARTIAL_FILL_THRESHOLD: i64 = 10_000;
/// Monetary values carry four fractional digits.
const PRICE_SCALE: u32 = 4;

/// Local execution venue. Fills synchronously against the trade's
/// entry-price snapshot with a deterministic slippage model; commission
/// is always zero.
pub struct TradeSimulator {
    slippage: Box<dyn SlippageModel>,
}

impl TradeSimulator {
    pub fn new() -> Self {
        Self {
            slippage: Box::new(GaussianSlippage::new()),
        }
    }

    pub fn with_slippage(slippage: Box<dyn SlippageModel>) -> Self {
        Self { slippage }
    }

    pub fn execute(&self, trade: &Trade) -> ExecutionReport {
        let epsilon = self.slippage.epsilon(trade.quantity);
        // Buys fill above the snapshot, sells below, mirroring bid/ask.
        let signed_epsilon = match trade.side {
            OrderSide::Buy => epsilon,
            OrderSide::Sell => -epsilon,
        };

        let factor = Decimal::from_f64(1.0 + signed_epsilon).unwrap_or(Decimal::ONE);
        let fill_price = (trade.entry_price * factor)
            .round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointNearestEven);

        if trade.quantity > PARTIAL_FILL_THRESHOLD {
            // First tranche is 30-70% of the order; the remainder fills
            // at the same price within this call.
            let fraction: f64 = rand::rng().random_range(0.30..=0.70);
            let first = ((trade.quantity as f64) * fraction).floor() as i64;
            let first = first.clamp(1, trade.quantity);
            debug!(
                "Simulator split {} {} into tranches of {} and {}",
                trade.quantity,
                trade.symbol,
                first,
                trade.quantity - first
            );
        }

        let now = Utc::now();
        info!(
            "Simulator filled {} {} x{} @ {}",
            trade.side, trade.symbol, trade.quantity, fill_price
        );

        ExecutionReport {
            success: true,
            execution_id: Some(format!("sim-{}", uuid::Uuid::new_v4())),
            status: TradeStatus::Filled,
            filled_quantity: trade.quantity,
            fill_price: Some(fill_price),
            venue: Venue::Simulator,
            submitted_at: now,
            filled_at: Some(now),
            error: None,
        }
    }
}

impl Default for TradeSimulator {
    fn default() -> Self {
        Self::new()
    }
}
