pub mod router;
pub mod simulator;
pub mod slippage;

pub use router::{ExecutionConfig, ExecutionRouter, RoutingDecision};
pub use simulator::TradeSimulator;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::execution::slippage::FixedSlippage;
    use crate::domain::audit::AuditAction;
    use crate::domain::errors::ExecutionError;
    use crate::domain::repositories::{AuditRepository, PositionRepository, TradeRepository};
    use crate::domain::trading::types::{
        EntryPriceSource, OrderSide, OrderType, Trade, TradeStatus, Venue,
    };
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::mock::{FillScript, MockBroker, MockMarketData};
    use crate::infrastructure::persistence::database::Database;
    use crate::infrastructure::persistence::repositories::{
        SqliteAuditRepository, SqlitePositionRepository, SqliteTradeRepository,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        router: ExecutionRouter,
        trades: Arc<SqliteTradeRepository>,
        positions: Arc<SqlitePositionRepository>,
        audit: Arc<SqliteAuditRepository>,
        market: Arc<MockMarketData>,
        broker: Arc<MockBroker>,
    }

    async fn fixture(config: ExecutionConfig) -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let trades = Arc::new(SqliteTradeRepository::new(db.clone()));
        let positions = Arc::new(SqlitePositionRepository::new(db.clone()));
        let audit = Arc::new(SqliteAuditRepository::new(db));
        let market = Arc::new(MockMarketData::new());
        market.set_price("AAPL", dec!(150.00)).await;
        let broker = Arc::new(MockBroker::new(dec!(1_000_000), dec!(150.01)));

        let router = ExecutionRouter::new(
            config,
            broker.clone(),
            TradeSimulator::with_slippage(Box::new(FixedSlippage(0.0001))),
            market.clone(),
            trades.clone(),
            positions.clone(),
            audit.clone(),
            EventBus::new(),
        );
        Fixture {
            router,
            trades,
            positions,
            audit,
            market,
            broker,
        }
    }

    fn sim_config() -> ExecutionConfig {
        ExecutionConfig {
            use_real_trading: false,
            broker_enabled: false,
            broker_key_id: String::new(),
            broker_base_url: "https://paper-api.alpaca.markets".to_string(),
            after_hours_limit_orders: true,
            max_position_size: 10_000,
            max_trade_value: Decimal::from(1_000_000),
        }
    }

    fn pending_trade(quantity: i64) -> Trade {
        Trade::pending(
            "u-1",
            "AAPL",
            OrderSide::Buy,
            quantity,
            OrderType::Market,
            None,
            dec!(150.00),
            EntryPriceSource::Quote,
        )
    }

    #[tokio::test]
    async fn test_simulated_buy_fully_filled() {
        let fx = fixture(sim_config()).await;
        let trade = pending_trade(100);
        let trade_id = trade.trade_id.clone();

        let report = fx.router.execute(trade, "op-1", "corr-1").await.unwrap();
        assert!(report.success);
        assert_eq!(report.venue, Venue::Simulator);
        assert_eq!(report.fill_price, Some(dec!(150.0150)));

        let stored = fx.trades.find_by_id("u-1", &trade_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TradeStatus::Filled);
        assert_eq!(stored.filled_quantity, Some(100));

        let position = fx.positions.get("u-1", "AAPL").await.unwrap().unwrap();
        assert_eq!(position.net_quantity, 100);
        assert_eq!(position.cost_basis, dec!(150.0150));
    }

    #[tokio::test]
    async fn test_live_host_refused_with_downgrade_audit() {
        let config = ExecutionConfig {
            use_real_trading: true,
            broker_enabled: true,
            broker_key_id: "PKTEST123".to_string(),
            broker_base_url: "https://api.broker.example.com".to_string(),
            ..sim_config()
        };
        let fx = fixture(config).await;

        let decision = fx.router.routing_decision();
        assert_eq!(decision.venue, Venue::Simulator);
        assert!(decision.downgrade_reason.is_some());

        let report = fx
            .router
            .execute(pending_trade(10), "op-1", "corr-7")
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.venue, Venue::Simulator);

        let entries = fx.audit.find_by_correlation("corr-7").await.unwrap();
        assert!(
            entries
                .iter()
                .any(|e| e.action == AuditAction::RoutingDowngrade)
        );
    }

    #[tokio::test]
    async fn test_paper_guards_all_true_routes_to_broker() {
        let config = ExecutionConfig {
            use_real_trading: true,
            broker_enabled: true,
            broker_key_id: "PKTEST123".to_string(),
            broker_base_url: "https://paper-api.alpaca.markets".to_string(),
            ..sim_config()
        };
        let fx = fixture(config).await;
        fx.broker.set_script(FillScript::FillImmediately).await;

        let report = fx
            .router
            .execute(pending_trade(10), "op-1", "corr-1")
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.venue, Venue::Broker);
        assert_eq!(report.fill_price, Some(dec!(150.01)));
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_no_rows() {
        let config = ExecutionConfig {
            use_real_trading: true,
            broker_enabled: true,
            broker_key_id: "PKTEST123".to_string(),
            broker_base_url: "https://paper-api.alpaca.markets".to_string(),
            ..sim_config()
        };
        let fx = fixture(config).await;
        *fx.broker.buying_power.write().await = dec!(100);

        let trade = pending_trade(100);
        let trade_id = trade.trade_id.clone();
        let result = fx.router.execute(trade, "op-1", "corr-1").await;
        assert!(matches!(
            result,
            Err(ExecutionError::InsufficientFunds { .. })
        ));
        assert!(fx.trades.find_by_id("u-1", &trade_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_rejects_oversized_order() {
        let fx = fixture(sim_config()).await;
        let result = fx
            .router
            .execute(pending_trade(20_000), "op-1", "corr-1")
            .await;
        assert!(matches!(result, Err(ExecutionError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected_before_routing() {
        let fx = fixture(sim_config()).await;
        let mut trade = pending_trade(10);
        trade.symbol = "ZZZZ".to_string();
        let result = fx.router.execute(trade, "op-1", "corr-1").await;
        assert!(matches!(result, Err(ExecutionError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_op_id_executes_once() {
        let fx = fixture(sim_config()).await;

        let first = fx
            .router
            .execute(pending_trade(100), "op-42", "corr-1")
            .await
            .unwrap();
        assert!(first.success);

        let replay = fx
            .router
            .execute(pending_trade(100), "op-42", "corr-2")
            .await
            .unwrap();
        // The replay reports the original execution rather than filling
        // a second trade.
        assert_eq!(replay.execution_id, first.execution_id);

        let filled = fx
            .trades
            .find_by_status(TradeStatus::Filled, 10)
            .await
            .unwrap();
        assert_eq!(filled.len(), 1);

        let position = fx.positions.get("u-1", "AAPL").await.unwrap().unwrap();
        assert_eq!(position.net_quantity, 100);
    }

    #[tokio::test]
    async fn test_broker_never_chosen_with_any_guard_false() {
        let paper = ExecutionConfig {
            use_real_trading: true,
            broker_enabled: true,
            broker_key_id: "PKTEST123".to_string(),
            broker_base_url: "https://paper-api.alpaca.markets".to_string(),
            ..sim_config()
        };

        for broken in [
            ExecutionConfig {
                use_real_trading: false,
                ..paper.clone()
            },
            ExecutionConfig {
                broker_enabled: false,
                ..paper.clone()
            },
            ExecutionConfig {
                broker_key_id: "AKLIVE123".to_string(),
                ..paper.clone()
            },
            ExecutionConfig {
                broker_base_url: "https://api.alpaca.markets".to_string(),
                ..paper.clone()
            },
        ] {
            let fx = fixture(broken).await;
            assert_eq!(fx.router.routing_decision().venue, Venue::Simulator);
        }

        let fx = fixture(paper).await;
        assert_eq!(fx.router.routing_decision().venue, Venue::Broker);
    }

    #[tokio::test]
    async fn test_market_closed_refuses_market_orders() {
        let config = ExecutionConfig {
            use_real_trading: true,
            broker_enabled: true,
            broker_key_id: "PKTEST123".to_string(),
            broker_base_url: "https://paper-api.alpaca.markets".to_string(),
            ..sim_config()
        };
        let fx = fixture(config).await;
        fx.market.set_market_open(false).await;

        let result = fx.router.execute(pending_trade(10), "op-1", "corr-1").await;
        assert!(matches!(result, Err(ExecutionError::MarketClosed { .. })));
    }
}
