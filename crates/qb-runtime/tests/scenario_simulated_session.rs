use chrono::NaiveDate;
use qb_config::AppConfig;
use qb_runtime::StrategyRunner;
use qb_schemas::{Bar, Order, OrderType, Snapshot};
use qb_strategy::{Strategy, StrategyCell, StrategyInfo, StrategyRegistry};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Buys 100 shares at the close of the second bar it sees.
struct BuySecondBar {
    bars_seen: usize,
}

impl Strategy for BuySecondBar {
    fn name(&self) -> &str {
        "buy_second_bar"
    }

    fn on_bar(&mut self, cell: &mut StrategyCell, bar: &Bar) {
        self.bars_seen += 1;
        if self.bars_seen == 2 && cell.position() == 0 {
            cell.buy(bar.close, 100, OrderType::Limit);
        }
    }
}

fn registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry
        .register(
            StrategyInfo::new("buy_second_bar", "test strategy"),
            Box::new(|| Box::new(BuySecondBar { bars_seen: 0 })),
        )
        .unwrap();
    registry
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.data_source = "simulated".to_string();
    config.sim_interval = 3600.0; // the test drives snapshots by hand
    config.broker_type = "simulated".to_string();
    config.min_trade_interval = 0;
    config.risk_journal_path = String::new();
    config
}

fn snapshot(code: &str, price: f64, second: u32) -> Snapshot {
    let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(9, 30, second)
        .unwrap();
    let mut snap = Snapshot::flat(code, price, ts);
    snap.prev_close = 10.0;
    snap.volume = 1_000;
    snap
}

fn assignments(code: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(code.to_string(), "buy_second_bar".to_string())])
}

#[tokio::test]
async fn scenario_simulated_session_executes_an_intent() {
    let runner = StrategyRunner::new(config(), registry());
    runner.start(&assignments("300750")).await.unwrap();
    assert!(runner.is_running());

    // Starting twice is refused.
    assert!(runner.start(&assignments("300750")).await.is_err());

    // Two quotes: the second one triggers the buy intent.
    let hub = runner.hub();
    hub.on_snapshot(snapshot("300750", 10.0, 0));
    hub.on_snapshot(snapshot("300750", 10.1, 1));

    // The intent crosses the risk gate, routes to the simulated broker and
    // fills on the matcher loop.
    let mut filled = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if runner.strategy_position("300750") == 100 {
            filled = true;
            break;
        }
    }
    assert!(filled, "strategy position never reflected the fill");

    let status = runner.risk_summary().unwrap();
    assert!(status.is_running);
    assert_eq!(status.risk.daily_trades, 1);
    assert!(status.risk.trading_allowed);
    assert!(status.risk_paused_reason.is_empty());

    runner.stop().await;
    assert!(!runner.is_running());
    let status = runner.risk_summary().unwrap();
    assert!(!status.is_running);

    // A fresh session can start after stop.
    runner.start(&assignments("300750")).await.unwrap();
    runner.stop().await;
}

#[tokio::test]
async fn scenario_semi_auto_holds_the_order() {
    let mut config = config();
    config.strategy_auto_execute = false;

    let runner = StrategyRunner::new(config, registry());
    let held: Arc<Mutex<Vec<Order>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&held);
    runner.set_signal_sink(Arc::new(move |order| {
        sink.lock().unwrap().push(order.clone());
    }));

    runner.start(&assignments("300750")).await.unwrap();

    let hub = runner.hub();
    hub.on_snapshot(snapshot("300750", 10.0, 0));
    hub.on_snapshot(snapshot("300750", 10.1, 1));

    // The signal surfaces instead of executing.
    let mut surfaced = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if !held.lock().unwrap().is_empty() {
            surfaced = true;
            break;
        }
    }
    assert!(surfaced, "semi-auto signal never surfaced");

    let order = held.lock().unwrap()[0].clone();
    assert_eq!(order.code, "300750");
    assert_eq!(order.status, qb_schemas::OrderStatus::Pending);

    // Nothing reached the broker.
    assert_eq!(runner.strategy_position("300750"), 0);
    assert!(runner.engine().orders(None).await.is_empty());

    runner.stop().await;
}

#[tokio::test]
async fn scenario_empty_assignments_refused() {
    let runner = StrategyRunner::new(config(), registry());
    assert!(runner.start(&BTreeMap::new()).await.is_err());
    assert!(!runner.is_running());
}
