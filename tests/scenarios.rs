//! End-to-end scenarios exercising the gateway subsystems wired the same
//! way the driver binary wires them, against a stubbed exchange rather
//! than the real Deribit endpoints.

use gateway_jsonrpc::RpcClient;
use gateway_orderbook::{OrderBook, OrderBookRegistry};
use gateway_orders::OrderManager;
use gateway_pricewatch::PriceWatch;
use gateway_risk::RiskEngine;
use gateway_session::SessionManager;
use gateway_types::{Order, OrderStatus, OrderType, RiskLimits, Side};
use serde_json::json;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

async fn authenticated_session(server: &mockito::ServerGuard) -> (Arc<RpcClient>, Arc<SessionManager>) {
    let rpc = Arc::new(RpcClient::new(format!("{}/api/v2/", server.url())));
    let session = Arc::new(SessionManager::new(rpc.clone(), "client", "secret"));
    session.authenticate().await.expect("stubbed auth should succeed");
    (rpc, session)
}

async fn auth_mock(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/api/v2/public/auth")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "access_token": "tok", "refresh_token": "ref", "expires_in": 600 }
            })
            .to_string(),
        )
        .create_async()
        .await
}

/// S1: with a two-per-second admission rate, the third back-to-back
/// order in a burst is rejected before it ever reaches the transport.
#[tokio::test]
async fn third_order_in_a_burst_is_rate_limited() {
    let mut server = mockito::Server::new_async().await;
    let _auth = auth_mock(&mut server).await;
    let buy_mock = server
        .mock("POST", "/api/v2/private/buy")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": { "order": { "order_id": "o1", "order_state": "open", "filled_amount": 0.0, "average_price": 0.0 } }
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let (rpc, session) = authenticated_session(&server).await;
    let books = Arc::new(OrderBookRegistry::new());
    let risk = Arc::new(RiskEngine::new(RiskLimits::default(), books));
    let manager = OrderManager::new(rpc, session, risk, 2);

    let order = || Order::new("BTC-PERPETUAL", Side::Buy, 0.1, 30000.0, OrderType::Limit);
    let first = manager.place(order()).await;
    let second = manager.place(order()).await;
    let third = manager.place(order()).await;

    assert_ne!(first.status, OrderStatus::Rejected);
    assert_ne!(second.status, OrderStatus::Rejected);
    assert_eq!(third.status, OrderStatus::Rejected);
    assert_eq!(third.rejection_reason.as_deref(), Some("Rate limit exceeded"));

    buy_mock.assert_async().await;
}

/// S2: an order larger than the configured size limit is rejected by
/// the risk engine before any network call is attempted.
#[tokio::test]
async fn oversized_order_is_rejected_without_reaching_the_network() {
    let mut server = mockito::Server::new_async().await;
    let _auth = auth_mock(&mut server).await;
    let buy_mock = server.mock("POST", "/api/v2/private/buy").expect(0).create_async().await;

    let (rpc, session) = authenticated_session(&server).await;
    let books = Arc::new(OrderBookRegistry::new());
    let risk = Arc::new(RiskEngine::new(RiskLimits { max_order_size: 1.0, ..Default::default() }, books));
    let manager = OrderManager::new(rpc, session, risk, 10);

    let order = Order::new("BTC-PERPETUAL", Side::Buy, 1.5, 30000.0, OrderType::Limit);
    let result = manager.place(order).await;

    assert_eq!(result.status, OrderStatus::Rejected);
    assert!(result.rejection_reason.unwrap().to_lowercase().contains("size"));
    buy_mock.assert_async().await;
}

/// S3: an order that would push the tracked position past the
/// configured limit is rejected, accounting for exposure already held.
#[tokio::test]
async fn order_that_would_exceed_position_limit_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _auth = auth_mock(&mut server).await;
    let buy_mock = server.mock("POST", "/api/v2/private/buy").expect(0).create_async().await;

    let (rpc, session) = authenticated_session(&server).await;
    let books = Arc::new(OrderBookRegistry::new());
    let risk = Arc::new(RiskEngine::new(RiskLimits { max_position_size: 5.0, ..Default::default() }, books));
    risk.update_position("BTC-PERPETUAL", 4.5, 30000.0);
    let manager = OrderManager::new(rpc, session, risk, 10);

    let order = Order::new("BTC-PERPETUAL", Side::Buy, 1.0, 30000.0, OrderType::Limit);
    let result = manager.place(order).await;

    assert_eq!(result.status, OrderStatus::Rejected);
    buy_mock.assert_async().await;
}

/// S4: best levels, mid, and spread update as bid/ask deltas are applied
/// and a zero-quantity delta removes a level.
#[test]
fn book_updates_converge_on_the_expected_top_of_book() {
    let book = OrderBook::new("BTC-PERPETUAL");
    book.update_bid(100.0, 1.0);
    book.update_bid(101.0, 2.0);
    book.update_ask(103.0, 1.0);
    book.update_bid(100.0, 0.0);

    assert_eq!(book.best_bid(), 101.0);
    assert_eq!(book.best_ask(), 103.0);
    assert_eq!(book.mid(), 102.0);
    assert_eq!(book.spread(), 2.0);
}

/// S5: a watched buy-limit order is released to execution within the
/// poll interval once the best ask drops to its target, carrying the
/// price that satisfied the trigger.
#[test]
fn price_watch_releases_once_the_ask_drops_to_target() {
    let books = Arc::new(OrderBookRegistry::new());
    let book = books.book("ETH-PERPETUAL");
    book.update_ask(2005.0, 1.0);

    let (tx, rx) = mpsc::channel();
    let watch = PriceWatch::spawn(books.clone(), Box::new(move |order| { let _ = tx.send(order); }));

    let order = Order::new("ETH-PERPETUAL", Side::Buy, 1.0, 2000.0, OrderType::Limit);
    watch.enroll(order);

    assert!(rx.recv_timeout(Duration::from_millis(150)).is_err(), "should not release while ask is above target");

    book.update_ask(1999.0, 1.0);
    let released = rx.recv_timeout(Duration::from_millis(500)).expect("order should release once ask drops to target");
    assert_eq!(released.price, 1999.0);

    watch.stop();
}
