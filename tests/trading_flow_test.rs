use rust_decimal_macros::dec;
use std::sync::Arc;
use tradecore::application::orchestrator::ExecutionResult;
use tradecore::application::system::Application;
use tradecore::config::Config;
use tokio::sync::Mutex;
use tradecore::domain::events::{EventPayload, EventType};
use tradecore::domain::market::prediction_market::PredictionMarket;
use tradecore::domain::ports::MarketFeed;
use tradecore::domain::trading::types::{AssetClass, SignalAction, TradingSignal};
use tradecore::infrastructure::mock::StaticMarketFeed;

fn in_memory() -> Config {
    Config {
        in_memory: true,
        ..Config::default()
    }
}

fn buy_aapl(confidence: f64) -> TradingSignal {
    TradingSignal::new(SignalAction::Buy, confidence, "AAPL", AssetClass::Stocks, "momentum")
}

/// Test: A signal flows from the orchestrator through the stocks desk into the ledger.
#[tokio::test]
async fn test_signal_settles_on_stocks_desk() {
    let handle = Application::build(in_memory()).await.unwrap().start().await.unwrap();
    let desk = handle.ledger_desks[&AssetClass::Stocks].clone();
    desk.set_quote("AAPL", dec!(100)).await;

    let result = handle.orchestrator.execute_signal(&buy_aapl(0.8)).await.unwrap();

    let ExecutionResult::Executed { notional, order, .. } = result else {
        panic!("expected execution, got {:?}", result);
    };
    // Half-Kelly at 0.8 on the default 1000 cap
    assert_eq!(notional, dec!(400));
    assert_eq!(order.quantity, dec!(4));
    assert_eq!(order.platform, "ledger-stocks");

    let portfolio = handle.engine.open_portfolio("desk-stocks").await.unwrap();
    let positions = handle.engine.store().open_positions(portfolio.id).await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].symbol, "AAPL");
    assert_eq!(positions[0].quantity, dec!(4));

    handle.shutdown().await;
}

/// Test: One desk fill produces exactly one `TradeExecuted`, named after the desk.
#[tokio::test]
async fn test_desk_fill_published_once() {
    let app = Application::build(in_memory()).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    app.event_bus
        .subscribe_fn(EventType::TradeExecuted, "fill-log", move |event| {
            let sink = sink.clone();
            async move {
                if let EventPayload::TradeExecuted(data) = event.payload() {
                    sink.lock().await.push((data.platform.clone(), data.quantity));
                }
                Ok::<(), anyhow::Error>(())
            }
        })
        .await;
    let handle = app.start().await.unwrap();
    handle.ledger_desks[&AssetClass::Stocks]
        .set_quote("AAPL", dec!(100))
        .await;

    let result = handle.orchestrator.execute_signal(&buy_aapl(0.9)).await.unwrap();
    assert!(result.is_executed());
    handle.shutdown().await;

    assert_eq!(*seen.lock().await, vec![("ledger-stocks".to_string(), dec!(4.5))]);
}

/// Test: Replaying a signal under the same key settles one trade only.
#[tokio::test]
async fn test_duplicate_signal_key_settles_once() {
    let handle = Application::build(in_memory()).await.unwrap().start().await.unwrap();
    handle.ledger_desks[&AssetClass::Stocks]
        .set_quote("AAPL", dec!(100))
        .await;

    let signal = buy_aapl(0.8);
    let first = handle
        .orchestrator
        .execute_signal_idempotent("sig-42", &signal)
        .await
        .unwrap();
    let second = handle
        .orchestrator
        .execute_signal_idempotent("sig-42", &signal)
        .await
        .unwrap();

    assert!(first.is_executed());
    assert_eq!(first, second);
    let portfolio = handle.engine.open_portfolio("desk-stocks").await.unwrap();
    assert_eq!(handle.engine.store().trades(portfolio.id).await.unwrap().len(), 1);

    handle.shutdown().await;
}

/// Test: A closed stocks market defers the signal without touching the ledger.
#[tokio::test]
async fn test_closed_market_defers_without_trading() {
    let handle = Application::build(in_memory()).await.unwrap().start().await.unwrap();
    let desk = handle.ledger_desks[&AssetClass::Stocks].clone();
    desk.set_quote("AAPL", dec!(100)).await;
    desk.set_market_open(false);

    let result = handle.orchestrator.execute_signal(&buy_aapl(0.9)).await.unwrap();

    assert!(result.is_deferred());
    let portfolio = handle.engine.open_portfolio("desk-stocks").await.unwrap();
    assert!(handle.engine.store().trades(portfolio.id).await.unwrap().is_empty());

    handle.shutdown().await;
}

/// Test: A scanned cross-venue opportunity is auto-executed and shows up in the snapshot.
#[tokio::test]
async fn test_scanned_arbitrage_lands_in_snapshot() {
    let feed_a: Arc<dyn MarketFeed> = Arc::new(StaticMarketFeed::new(
        "kalshi",
        vec![PredictionMarket::new("FED-DEC", "Fed cuts rates in December", dec!(0.42), dec!(0.58), "kalshi")],
    ));
    let feed_b: Arc<dyn MarketFeed> = Arc::new(StaticMarketFeed::new(
        "polymarket",
        vec![PredictionMarket::new("0xfed", "Fed cuts rates in December", dec!(0.45), dec!(0.53), "polymarket")],
    ));
    let mut config = in_memory();
    config.arbitrage.auto_execute = true;
    let app = Application::build_with_feeds(config, feed_a, feed_b).await.unwrap();

    let opportunities = app.scanner.scan_once().await.unwrap();
    assert_eq!(opportunities.len(), 1);
    assert_eq!(opportunities[0].cost, dec!(0.95));

    let snapshot = app.orchestrator.get_portfolio_snapshot().await;
    assert!(snapshot.errors.is_empty());
    let venue = &snapshot.venues[&AssetClass::PredictionMarkets];
    let symbols: Vec<_> = venue.positions.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["kalshi:FED-DEC:YES", "polymarket:0xfed:NO"]);
    assert!(venue.positions.iter().all(|p| p.quantity == venue.positions[0].quantity));
}
