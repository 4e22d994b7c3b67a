use httpmock::prelude::*;
use qb_broker::rest::RestEndpoints;
use qb_broker::{BrokerConfig, BrokerEvent, BrokerTrader, BrokerType, RestBroker};
use qb_schemas::{FixedClock, OrderStatus, OrderType, Side};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn broker_for(server: &MockServer) -> RestBroker {
    let config = BrokerConfig {
        broker_type: BrokerType::Zhongxin,
        account: "acct-1".to_string(),
        password: "pw".to_string(),
        base_url: server.base_url(),
        poll_interval: Duration::from_secs(30),
        timeout: Duration::from_secs(2),
        ..BrokerConfig::default()
    };
    let clock = Arc::new(FixedClock::at(
        chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        9,
        30,
        0,
    ));
    RestBroker::with_parts(config, RestEndpoints::zhongxin(), clock).unwrap()
}

#[tokio::test]
async fn scenario_rest_gateway_sync() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(GET).path("/zttrade/api/ping");
        then.status(200).json_body(json!({"status": "ok"}));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/zttrade/api/login")
            .json_body_partial(r#"{"account": "acct-1"}"#);
        then.status(200)
            .json_body(json!({"data": {"access_token": "tok-9"}}));
    });

    // Authenticated endpoints must carry the bearer token.
    let account_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/zttrade/api/account")
            .header("authorization", "Bearer tok-9");
        then.status(200).json_body(json!({
            "data": {"account_id": "acct-1", "cash": 250000.0, "market_value": 50000.0}
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/zttrade/api/positions");
        then.status(200).json_body(json!({
            "positions": [{"stock_code": "600000", "volume": 500, "cost_price": 7.5}]
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/zttrade/api/orders");
        then.status(200).json_body(json!({"orders": []}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/zttrade/api/trades");
        then.status(200).json_body(json!({"trades": [
            {"trade_id": "TR1", "order_id": "R1", "code": "600000",
             "side": 2, "price": 7.8, "volume": 500, "commission": 5.0,
             "time": "2024-01-02 09:31:00"}
        ]}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/zttrade/api/orders");
        then.status(200).json_body(json!({
            "order": {"order_id": "R1", "status": "accepted"}
        }));
    });
    let cancel_mock = server.mock(|when, then| {
        when.method(POST).path("/zttrade/api/orders/R1/cancel");
        then.status(200).json_body(json!({"ok": true}));
    });

    let broker = broker_for(&server);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    broker.set_event_sender(tx);

    broker.connect().await.unwrap();
    broker.login().await.unwrap();
    assert!(broker.is_logged_in());
    // Login primed the account cache through the authenticated endpoint.
    account_mock.assert();

    let account = broker.query_account().await.unwrap();
    assert!((account.cash - 250_000.0).abs() < 1e-9);
    assert!((account.total_value - 300_000.0).abs() < 1e-9);

    let positions = broker.query_positions().await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].code, "600000");
    assert_eq!(positions[0].quantity, 500);

    let trades = broker.query_trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].side, Side::Sell);
    assert_eq!(trades[0].quantity, 500);

    let result = broker
        .send_order("600000", Side::Sell, 7.9, 500, OrderType::Limit)
        .await;
    assert!(result.success, "{}", result.message);
    let order = result.order.unwrap();
    assert_eq!(order.order_id, "R1");
    assert_eq!(order.status, OrderStatus::Submitted);

    assert!(broker.cancel_order("R1").await);
    cancel_mock.assert();
    let cancelled = broker.query_orders(None).await;
    // Server returned an empty order list; the local cache still knows R1.
    assert!(cancelled.is_empty());

    // Events flowed for the whole session.
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            BrokerEvent::Connected => "connected",
            BrokerEvent::LoggedIn => "logged_in",
            BrokerEvent::Account(_) => "account",
            BrokerEvent::Position(_) => "position",
            BrokerEvent::Order(_) => "order",
            BrokerEvent::Trade(_) => "trade",
            _ => "other",
        });
    }
    for expected in ["connected", "logged_in", "account", "position", "order", "trade"] {
        assert!(kinds.contains(&expected), "missing event {expected}: {kinds:?}");
    }

    broker.logout().await;
    assert!(!broker.is_logged_in());
    broker.disconnect().await;
}
