//! Idempotent resubmission: the same op id never executes twice, and
//! the store ends up with exactly one trade, one position update and
//! one execution audit entry.

mod common;

use common::{build_harness, sim_config};
use rust_decimal_macros::dec;
use tradedesk::domain::audit::AuditAction;
use tradedesk::domain::repositories::{
    AuditRepository, PositionRepository, TradeRepository, UserRepository,
};
use tradedesk::domain::trading::types::{
    EntryPriceSource, OrderSide, OrderType, Trade, TradeStatus,
};
use tradedesk::domain::user::{Role, User};

fn pending(user_id: &str) -> Trade {
    Trade::pending(
        user_id.to_string(),
        "AAPL",
        OrderSide::Buy,
        100,
        OrderType::Market,
        None,
        dec!(150.00),
        EntryPriceSource::Quote,
    )
}

#[tokio::test]
async fn test_resubmitted_op_id_is_a_noop() {
    let harness = build_harness(sim_config(), None).await;
    harness.market.set_price("AAPL", dec!(150)).await;

    let user = User::new("U-R1", "retrier", Role::Trader);
    harness.users.create(&user).await.unwrap();

    // The client retried: the same submit arrives twice as op-42.
    let first = harness
        .router
        .execute(pending(&user.user_id), "op-42", "corr-1")
        .await
        .unwrap();
    let second = harness
        .router
        .execute(pending(&user.user_id), "op-42", "corr-2")
        .await
        .unwrap();

    // The replay reports the original execution.
    assert!(first.success);
    assert_eq!(second.execution_id, first.execution_id);

    // Exactly one trade exists.
    let trades = harness
        .trades
        .find_recent_by_user(&user.user_id, 10)
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Filled);

    // Exactly one position update: 100 shares, not 200.
    let position = harness
        .positions
        .get(&user.user_id, "AAPL")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.net_quantity, 100);

    // Exactly one execution audit entry.
    let executed: Vec<_> = harness
        .audit
        .find_recent(50)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == AuditAction::TradeExecuted)
        .collect();
    assert_eq!(executed.len(), 1);
}

#[tokio::test]
async fn test_concurrent_resubmission_executes_once() {
    let harness = build_harness(sim_config(), None).await;
    harness.market.set_price("AAPL", dec!(150)).await;

    let user = User::new("U-R2", "racer", Role::Trader);
    harness.users.create(&user).await.unwrap();

    let a = harness
        .router
        .execute(pending(&user.user_id), "op-race", "corr-a");
    let b = harness
        .router
        .execute(pending(&user.user_id), "op-race", "corr-b");
    let (first, second) = tokio::join!(a, b);
    assert!(first.is_ok());
    assert!(second.is_ok());

    let trades = harness
        .trades
        .find_recent_by_user(&user.user_id, 10)
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);

    let position = harness
        .positions
        .get(&user.user_id, "AAPL")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.net_quantity, 100);
}
