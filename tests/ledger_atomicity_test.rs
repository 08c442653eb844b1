use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tradecore::application::ledger::{LedgerConfig, TradeEngine, TradeRequest};
use tradecore::domain::errors::TradingError;
use tradecore::domain::repositories::LedgerStore;
use tradecore::infrastructure::repositories::{FailurePoint, InMemoryLedgerStore};

fn engine(store: &InMemoryLedgerStore) -> Arc<TradeEngine> {
    Arc::new(TradeEngine::new(Arc::new(store.clone()), LedgerConfig::default()))
}

/// Test: Concurrent buys on one portfolio either settle fully or fail with a
/// retryable conflict, and the balance equation holds afterwards.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buys_keep_balance_equation() {
    let store = InMemoryLedgerStore::new();
    let engine = engine(&store);
    let portfolio = engine.open_portfolio("alice").await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let engine = engine.clone();
            let pid = portfolio.id;
            tokio::spawn(async move {
                engine
                    .execute_trade(TradeRequest::buy(pid, format!("SYM{}", i), dec!(1), dec!(50)))
                    .await
            })
        })
        .collect();

    let mut settled = 0usize;
    let mut conflicts = 0usize;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => settled += 1,
            Err(TradingError::ConcurrencyConflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected failure: {}", other),
        }
    }
    assert_eq!(settled + conflicts, 20);
    assert!(settled >= 1);

    let after = store.find_portfolio(portfolio.id).await.unwrap().unwrap();
    let trades = store.trades(portfolio.id).await.unwrap();
    let positions = store.open_positions(portfolio.id).await.unwrap();

    assert_eq!(trades.len(), settled);
    assert_eq!(positions.len(), settled);
    assert_eq!(after.balance, dec!(10000) - dec!(50) * Decimal::from(settled));
}

/// Test: Conflicts are retryable; retrying each intent until it settles
/// applies every one of them exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retried_conflicts_all_settle_exactly_once() {
    let store = InMemoryLedgerStore::new();
    let engine = engine(&store);
    let portfolio = engine.open_portfolio("bob").await.unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let engine = engine.clone();
            let pid = portfolio.id;
            tokio::spawn(async move {
                loop {
                    let request = TradeRequest::buy(pid, format!("R{}", i), dec!(2), dec!(25));
                    match engine.execute_trade(request).await {
                        Ok(result) => return result,
                        Err(e) if e.is_retryable() => tokio::task::yield_now().await,
                        Err(e) => panic!("unexpected failure: {}", e),
                    }
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let after = store.find_portfolio(portfolio.id).await.unwrap().unwrap();
    assert_eq!(store.trades(portfolio.id).await.unwrap().len(), 10);
    assert_eq!(after.balance, dec!(9500));
}

/// Test: A failure at any step after the trade insert leaves no orphaned
/// trade and no partial position.
#[tokio::test]
async fn test_no_orphaned_trades_at_any_failure_point() {
    for point in [
        FailurePoint::InsertTrade,
        FailurePoint::UpsertPosition,
        FailurePoint::UpdatePortfolio,
        FailurePoint::Commit,
    ] {
        let store = InMemoryLedgerStore::new();
        let engine = engine(&store);
        let portfolio = engine.open_portfolio("carol").await.unwrap();
        store.fail_next(point, "disk on fire").await;

        let err = engine
            .execute_trade(TradeRequest::buy(portfolio.id, "AAPL", dec!(3), dec!(100)))
            .await
            .unwrap_err();
        assert!(
            matches!(err, TradingError::PersistenceFailure(_)),
            "{:?} produced {}",
            point,
            err
        );

        let after = store.find_portfolio(portfolio.id).await.unwrap().unwrap();
        assert!(store.trades(portfolio.id).await.unwrap().is_empty());
        assert!(store.open_positions(portfolio.id).await.unwrap().is_empty());
        assert_eq!(after.balance, dec!(10000));

        // The portfolio is usable right after the rollback
        engine
            .execute_trade(TradeRequest::buy(portfolio.id, "AAPL", dec!(3), dec!(100)))
            .await
            .unwrap();
        assert_eq!(store.trades(portfolio.id).await.unwrap().len(), 1);
    }
}

/// Test: Interleaved buys and sells on one symbol never sell more than held.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sells_never_oversell() {
    let store = InMemoryLedgerStore::new();
    let engine = engine(&store);
    let portfolio = engine.open_portfolio("dave").await.unwrap();
    engine
        .execute_trade(TradeRequest::buy(portfolio.id, "MSFT", dec!(5), dec!(100)))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let pid = portfolio.id;
            tokio::spawn(async move {
                loop {
                    match engine
                        .execute_trade(TradeRequest::sell(pid, "MSFT", dec!(1), dec!(110)))
                        .await
                    {
                        Ok(_) => return true,
                        Err(TradingError::ConcurrencyConflict { .. }) => tokio::task::yield_now().await,
                        Err(TradingError::ValidationFailed(_)) => return false,
                        Err(e) => panic!("unexpected failure: {}", e),
                    }
                }
            })
        })
        .collect();

    let mut sold = 0;
    for task in tasks {
        if task.await.unwrap() {
            sold += 1;
        }
    }

    assert_eq!(sold, 5);
    assert!(store.open_positions(portfolio.id).await.unwrap().is_empty());
    let after = store.find_portfolio(portfolio.id).await.unwrap().unwrap();
    assert_eq!(after.balance, dec!(10000) - dec!(500) + dec!(550));
}
