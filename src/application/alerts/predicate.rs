use crate::domain::alerts::RiskAlertConfig;
use crate::domain::trading::types::{OrderSide, Trade};
use rust_decimal::Decimal;

/// The three measurements an alert is judged against. Stored on the
/// trigger event so the record proves the predicate held at the time.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMetrics {
    pub trade_size: Decimal,
    pub loss_pct: Decimal,
    pub vix_level: Decimal,
}

/// Unrealized loss of the trade against the current quote, as a
/// percentage of the entry snapshot, clamped at zero from below. A
/// missing quote counts as no loss.
pub fn loss_pct(trade: &Trade, current_price: Option<Decimal>) -> Decimal {
    let Some(current) = current_price else {
        return Decimal::ZERO;
    };
    if trade.entry_price.is_zero() {
        return Decimal::ZERO;
    }
    let raw = match trade.side {
        OrderSide::Buy => (trade.entry_price - current) / trade.entry_price,
        OrderSide::Sell => (current - trade.entry_price) / trade.entry_price,
    } * Decimal::from(100);
    raw.max(Decimal::ZERO)
}

/// Evaluate one alert against one trade. All three thresholds must
/// hold simultaneously; ties count as matches. Returns the measured
/// metrics on a match.
pub fn evaluate(
    alert: &RiskAlertConfig,
    trade: &Trade,
    current_price: Option<Decimal>,
    vix_level: Decimal,
) -> Option<AlertMetrics> {
    let trade_size = trade.executed_size();
    if trade_size < alert.trade_size_threshold {
        return None;
    }

    let loss = loss_pct(trade, current_price);
    if loss < alert.loss_pct_threshold {
        return None;
    }

    if vix_level < alert.vix_threshold {
        return None;
    }

    Some(AlertMetrics {
        trade_size,
        loss_pct: loss,
        vix_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::{EntryPriceSource, OrderType, TradeStatus};
    use rust_decimal_macros::dec;

    fn filled_trade(side: OrderSide, quantity: i64, entry: Decimal, fill: Decimal) -> Trade {
        let mut trade = Trade::pending(
            "trader-3",
            "AAPL",
            side,
            quantity,
            OrderType::Market,
            None,
            entry,
            EntryPriceSource::Quote,
        );
        trade.status = TradeStatus::Filled;
        trade.filled_quantity = Some(quantity);
        trade.fill_price = Some(fill);
        trade
    }

    fn alert(size: Decimal, loss: Decimal, vix: Decimal) -> RiskAlertConfig {
        RiskAlertConfig::new("pm-7", "Big drawdown", size, loss, vix, true, false)
    }

    #[test]
    fn test_all_three_thresholds_match() {
        // 100 AAPL bought at 150, filled at 150.015, quote now 145.
        let trade = filled_trade(OrderSide::Buy, 100, dec!(150), dec!(150.015));
        let metrics = evaluate(
            &alert(dec!(10000), dec!(3), dec!(20)),
            &trade,
            Some(dec!(145)),
            dec!(22),
        )
        .expect("should match");

        assert_eq!(metrics.trade_size, dec!(15001.5000));
        // (150 - 145) / 150 * 100 = 3.33…%
        assert!(metrics.loss_pct > dec!(3.33) && metrics.loss_pct < dec!(3.34));
        assert_eq!(metrics.vix_level, dec!(22));
    }

    #[test]
    fn test_any_failing_threshold_blocks() {
        let trade = filled_trade(OrderSide::Buy, 100, dec!(150), dec!(150.015));

        // Size below threshold.
        assert!(
            evaluate(
                &alert(dec!(100000), dec!(3), dec!(20)),
                &trade,
                Some(dec!(145)),
                dec!(22)
            )
            .is_none()
        );
        // Loss below threshold.
        assert!(
            evaluate(
                &alert(dec!(10000), dec!(10), dec!(20)),
                &trade,
                Some(dec!(145)),
                dec!(22)
            )
            .is_none()
        );
        // VIX below threshold.
        assert!(
            evaluate(
                &alert(dec!(10000), dec!(3), dec!(25)),
                &trade,
                Some(dec!(145)),
                dec!(22)
            )
            .is_none()
        );
    }

    #[test]
    fn test_ties_count_as_matches() {
        let trade = filled_trade(OrderSide::Buy, 100, dec!(100), dec!(100));
        // trade_size exactly 10_000; loss exactly 5%; vix exactly 20.
        let metrics = evaluate(
            &alert(dec!(10000), dec!(5), dec!(20)),
            &trade,
            Some(dec!(95)),
            dec!(20),
        );
        assert!(metrics.is_some());
    }

    #[test]
    fn test_sell_side_loss_is_inverted() {
        // Short at 100; price rallies to 110: 10% against the seller.
        let trade = filled_trade(OrderSide::Sell, 100, dec!(100), dec!(100));
        assert_eq!(loss_pct(&trade, Some(dec!(110))), dec!(10));
        // Price falls: gain, clamped to zero.
        assert_eq!(loss_pct(&trade, Some(dec!(90))), Decimal::ZERO);
    }

    #[test]
    fn test_missing_quote_means_zero_loss() {
        let trade = filled_trade(OrderSide::Buy, 100, dec!(150), dec!(150));
        assert_eq!(loss_pct(&trade, None), Decimal::ZERO);

        // Zero threshold still matches with no quote.
        assert!(
            evaluate(
                &alert(dec!(0), dec!(0), dec!(0)),
                &trade,
                None,
                Decimal::ZERO
            )
            .is_some()
        );
        // Non-zero loss threshold cannot match without a quote.
        assert!(
            evaluate(
                &alert(dec!(0), dec!(1), dec!(0)),
                &trade,
                None,
                Decimal::ZERO
            )
            .is_none()
        );
    }

    #[test]
    fn test_unfilled_trade_has_zero_size() {
        let mut trade = filled_trade(OrderSide::Buy, 100, dec!(150), dec!(150));
        trade.filled_quantity = None;
        trade.fill_price = None;
        assert!(
            evaluate(
                &alert(dec!(1), dec!(0), dec!(0)),
                &trade,
                Some(dec!(150)),
                dec!(30)
            )
            .is_none()
        );
    }
}
