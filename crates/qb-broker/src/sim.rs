use crate::trader::BrokerTrader;
use crate::types::{BrokerConfig, BrokerError, BrokerEvent, BrokerEventSender, BrokerType, OrderResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use qb_schemas::matcher::{try_fill, CostModel, FillQuote};
use qb_schemas::{
    normalize_lot, AccountInfo, Clock, Order, OrderStatus, OrderType, Position, Side, SystemClock,
    Trade,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

/// Matcher scan period.
const MATCH_INTERVAL: Duration = Duration::from_millis(100);

/// One settled-or-pending purchase, for T+1 accounting.
///
/// Invariant: for any code, the sum of `remaining_qty` over its lots equals
/// the position quantity.
#[derive(Clone, Debug, PartialEq)]
struct BuyLot {
    trade_date: NaiveDate,
    remaining_qty: i64,
}

struct SimState {
    cash: f64,
    positions: BTreeMap<String, Position>,
    orders: BTreeMap<String, Order>,
    trades: Vec<Trade>,
    lots: BTreeMap<String, Vec<BuyLot>>,
    market_prices: BTreeMap<String, f64>,
    order_counter: u64,
    trade_counter: u64,
}

struct SimBrokerInner {
    initial_capital: f64,
    costs: CostModel,
    clock: Arc<dyn Clock>,
    state: Mutex<SimState>,
    events: Mutex<Option<BrokerEventSender>>,
    connected: AtomicBool,
    logged_in: AtomicBool,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// In-process broker with an authoritative matcher.
///
/// Owns cash, positions, a per-code BuyLot ledger for T+1 settlement, and
/// an order book of SUBMITTED orders that a background loop matches against
/// the current market price (`set_market_price` or injected snapshots).
pub struct SimulatedBroker {
    inner: Arc<SimBrokerInner>,
}

impl SimulatedBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &BrokerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SimBrokerInner {
                initial_capital: config.initial_capital,
                costs: CostModel::new(config.commission_rate, config.slippage),
                clock,
                state: Mutex::new(SimState {
                    cash: config.initial_capital,
                    positions: BTreeMap::new(),
                    orders: BTreeMap::new(),
                    trades: Vec::new(),
                    lots: BTreeMap::new(),
                    market_prices: BTreeMap::new(),
                    order_counter: 0,
                    trade_counter: 0,
                }),
                events: Mutex::new(None),
                connected: AtomicBool::new(false),
                logged_in: AtomicBool::new(false),
                running: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Set the price the matcher evaluates `code` against.
    pub fn set_market_price(&self, code: impl Into<String>, price: f64) {
        self.inner
            .state
            .lock()
            .expect("sim broker lock poisoned")
            .market_prices
            .insert(code.into(), price);
    }

    /// Run one matcher pass synchronously. The background loop calls the
    /// same path; tests drive it directly for determinism.
    pub fn process_pending_orders(&self) {
        SimBrokerInner::process_pending(&self.inner);
    }
}

impl SimBrokerInner {
    fn emit(&self, event: BrokerEvent) {
        if let Some(tx) = self.events.lock().expect("sim events lock poisoned").as_ref() {
            let _ = tx.send(event);
        }
    }

    fn sellable(state: &SimState, code: &str, today: NaiveDate) -> i64 {
        state
            .lots
            .get(code)
            .map(|lots| {
                lots.iter()
                    .filter(|lot| lot.trade_date < today)
                    .map(|lot| lot.remaining_qty)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Consume `quantity` from settled lots, oldest first, pruning empties.
    fn consume_settled_lots(state: &mut SimState, code: &str, mut quantity: i64, today: NaiveDate) {
        let emptied = match state.lots.get_mut(code) {
            None => return,
            Some(lots) => {
                let mut idx = 0;
                while quantity > 0 && idx < lots.len() {
                    if lots[idx].trade_date >= today {
                        idx += 1;
                        continue;
                    }
                    let take = lots[idx].remaining_qty.min(quantity);
                    lots[idx].remaining_qty -= take;
                    quantity -= take;
                    if lots[idx].remaining_qty <= 0 {
                        lots.remove(idx);
                    } else {
                        idx += 1;
                    }
                }
                // Submission-time sellable checks make a shortfall
                // unreachable; prune anything emptied by a partial scan
                // regardless.
                lots.retain(|lot| lot.remaining_qty > 0);
                lots.is_empty()
            }
        };
        if emptied {
            state.lots.remove(code);
        }
    }

    fn process_pending(inner: &Arc<SimBrokerInner>) {
        let today = inner.clock.today();
        let now = inner.clock.now();
        let mut events: Vec<BrokerEvent> = Vec::new();

        {
            let mut state = inner.state.lock().expect("sim broker lock poisoned");
            let pending: Vec<Order> = state
                .orders
                .values()
                .filter(|o| o.status == OrderStatus::Submitted)
                .cloned()
                .collect();

            for order in pending {
                let market = *state
                    .market_prices
                    .get(&order.code)
                    .unwrap_or(&order.price);
                let quote = FillQuote::from_price(market);
                let Some(outcome) = try_fill(&order, &quote, &inner.costs) else {
                    continue;
                };

                state.trade_counter += 1;
                let trade = Trade {
                    trade_id: format!("T{:08}", state.trade_counter),
                    order_id: order.order_id.clone(),
                    code: order.code.clone(),
                    side: order.side,
                    price: outcome.price,
                    quantity: order.quantity,
                    commission: outcome.commission,
                    trade_time: now,
                };

                if let Some(stored) = state.orders.get_mut(&order.order_id) {
                    stored.status = OrderStatus::Filled;
                    stored.filled_quantity = order.quantity;
                    stored.filled_price = outcome.price;
                    stored.update_time = Some(now);
                    events.push(BrokerEvent::Order(stored.clone()));
                }

                match order.side {
                    Side::Buy => {
                        state.cash -= outcome.price * order.quantity as f64 + outcome.commission;
                        match state.positions.get_mut(&order.code) {
                            Some(pos) => {
                                let total_cost = pos.avg_cost * pos.quantity as f64
                                    + outcome.price * order.quantity as f64;
                                pos.quantity += order.quantity;
                                pos.avg_cost = total_cost / pos.quantity as f64;
                                pos.current_price = outcome.price;
                            }
                            None => {
                                state.positions.insert(
                                    order.code.clone(),
                                    Position::new(
                                        order.code.clone(),
                                        order.quantity,
                                        outcome.price,
                                    ),
                                );
                            }
                        }
                        state
                            .lots
                            .entry(order.code.clone())
                            .or_default()
                            .push(BuyLot {
                                trade_date: today,
                                remaining_qty: order.quantity,
                            });
                    }
                    Side::Sell => {
                        state.cash += outcome.price * order.quantity as f64 - outcome.commission;
                        let emptied = match state.positions.get_mut(&order.code) {
                            Some(pos) => {
                                pos.quantity -= order.quantity;
                                pos.quantity <= 0
                            }
                            None => false,
                        };
                        if emptied {
                            state.positions.remove(&order.code);
                        }
                        Self::consume_settled_lots(&mut state, &order.code, order.quantity, today);
                    }
                }

                state.trades.push(trade.clone());
                events.push(BrokerEvent::Trade(trade));
            }
        }

        for event in events {
            inner.emit(event);
        }
    }
}

#[async_trait]
impl BrokerTrader for SimulatedBroker {
    fn broker_type(&self) -> BrokerType {
        BrokerType::Simulated
    }

    fn set_event_sender(&self, sender: BrokerEventSender) {
        *self.inner.events.lock().expect("sim events lock poisoned") = Some(sender);
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.inner.logged_in.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.inner.connected.store(true, Ordering::SeqCst);
        info!("simulated broker connected");
        self.inner.emit(BrokerEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        self.logout().await;
        self.inner.connected.store(false, Ordering::SeqCst);
        info!("simulated broker disconnected");
        self.inner.emit(BrokerEvent::Disconnected);
    }

    async fn login(&self) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.inner.logged_in.store(true, Ordering::SeqCst);

        if !self.inner.running.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                while inner.running.load(Ordering::SeqCst) {
                    SimBrokerInner::process_pending(&inner);
                    tokio::select! {
                        _ = inner.notify.notified() => {}
                        _ = tokio::time::sleep(MATCH_INTERVAL) => {}
                    }
                }
            });
            *self.inner.worker.lock().expect("sim worker lock poisoned") = Some(handle);
        }

        info!("simulated broker logged in");
        self.inner.emit(BrokerEvent::LoggedIn);
        Ok(())
    }

    async fn logout(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let handle = self
            .inner
            .worker
            .lock()
            .expect("sim worker lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
        if self.inner.logged_in.swap(false, Ordering::SeqCst) {
            info!("simulated broker logged out");
            self.inner.emit(BrokerEvent::LoggedOut);
        }
    }

    async fn send_order(
        &self,
        code: &str,
        side: Side,
        price: f64,
        quantity: i64,
        order_type: OrderType,
    ) -> OrderResult {
        if !self.is_logged_in() {
            return OrderResult::fail("not logged in");
        }

        let quantity = normalize_lot(quantity);
        if quantity <= 0 {
            return OrderResult::fail("quantity must be a positive multiple of 100");
        }

        let now = self.inner.clock.now();
        let today = self.inner.clock.today();
        let order = {
            let mut state = self.inner.state.lock().expect("sim broker lock poisoned");

            match side {
                Side::Buy => {
                    let required =
                        price * quantity as f64 * (1.0 + self.inner.costs.commission_rate);
                    if required > state.cash {
                        return OrderResult::fail(format!(
                            "insufficient cash: need {required:.2}, available {:.2}",
                            state.cash
                        ));
                    }
                }
                Side::Sell => {
                    let held = state
                        .positions
                        .get(code)
                        .map(|p| p.quantity)
                        .unwrap_or(0);
                    if held < quantity {
                        return OrderResult::fail("insufficient position");
                    }
                    let sellable = SimBrokerInner::sellable(&state, code, today);
                    if sellable < quantity {
                        return OrderResult::fail(
                            "T+1 restriction: shares bought today become sellable the next trading day",
                        );
                    }
                }
            }

            state.order_counter += 1;
            let mut order = Order::new(
                format!("SIM{:08}", state.order_counter),
                code,
                side,
                price,
                quantity,
                order_type,
                now,
            );
            order.status = OrderStatus::Submitted;
            state.orders.insert(order.order_id.clone(), order.clone());
            order
        };

        info!(
            order_id = %order.order_id,
            code,
            %side,
            quantity,
            price,
            "order submitted"
        );
        self.inner.emit(BrokerEvent::Order(order.clone()));
        OrderResult::ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> bool {
        let cancelled = {
            let mut state = self.inner.state.lock().expect("sim broker lock poisoned");
            let now = self.inner.clock.now();
            match state.orders.get_mut(order_id) {
                Some(order) if order.status == OrderStatus::Submitted => {
                    order.status = OrderStatus::Cancelled;
                    order.update_time = Some(now);
                    Some(order.clone())
                }
                _ => None,
            }
        };

        match cancelled {
            Some(order) => {
                info!(order_id, "order cancelled");
                self.inner.emit(BrokerEvent::Order(order));
                true
            }
            None => false,
        }
    }

    async fn modify_order(
        &self,
        _order_id: &str,
        _price: Option<f64>,
        _quantity: Option<i64>,
    ) -> bool {
        // Cancel-and-resend; amendment is not supported here.
        false
    }

    async fn query_account(&self) -> Option<AccountInfo> {
        let account = {
            let state = self.inner.state.lock().expect("sim broker lock poisoned");
            let market_value: f64 = state.positions.values().map(Position::market_value).sum();
            let total_value = state.cash + market_value;
            let profit = total_value - self.inner.initial_capital;
            AccountInfo {
                account_id: "SIM001".to_string(),
                broker: BrokerType::Simulated.as_str().to_string(),
                cash: state.cash,
                frozen: 0.0,
                market_value,
                total_value,
                profit,
                profit_pct: if self.inner.initial_capital > 0.0 {
                    profit / self.inner.initial_capital * 100.0
                } else {
                    0.0
                },
            }
        };
        self.inner.emit(BrokerEvent::Account(account.clone()));
        Some(account)
    }

    async fn query_positions(&self) -> Vec<Position> {
        self.inner
            .state
            .lock()
            .expect("sim broker lock poisoned")
            .positions
            .values()
            .cloned()
            .collect()
    }

    async fn query_orders(&self, status: Option<OrderStatus>) -> Vec<Order> {
        let state = self.inner.state.lock().expect("sim broker lock poisoned");
        state
            .orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect()
    }

    async fn query_trades(&self) -> Vec<Trade> {
        self.inner
            .state
            .lock()
            .expect("sim broker lock poisoned")
            .trades
            .clone()
    }

    async fn sellable_quantity(&self, code: &str) -> i64 {
        let state = self.inner.state.lock().expect("sim broker lock poisoned");
        SimBrokerInner::sellable(&state, code, self.inner.clock.today())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qb_schemas::FixedClock;

    fn broker() -> (SimulatedBroker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            9,
            30,
            0,
        ));
        let config = BrokerConfig {
            initial_capital: 1_000_000.0,
            commission_rate: 0.0003,
            slippage: 0.0,
            ..BrokerConfig::default()
        };
        (SimulatedBroker::with_clock(&config, clock.clone()), clock)
    }

    async fn ready(broker: &SimulatedBroker) {
        broker.connect().await.unwrap();
        broker.login().await.unwrap();
    }

    #[tokio::test]
    async fn send_order_requires_login() {
        let (broker, _) = broker();
        let result = broker
            .send_order("000001", Side::Buy, 10.0, 1000, OrderType::Limit)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("logged in"));
    }

    #[tokio::test]
    async fn odd_lots_are_rejected() {
        let (broker, _) = broker();
        ready(&broker).await;
        let result = broker
            .send_order("000001", Side::Buy, 10.0, 50, OrderType::Limit)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("multiple of 100"));
    }

    #[tokio::test]
    async fn buy_requires_cash_including_commission() {
        let (broker, _) = broker();
        ready(&broker).await;
        // 100_000 * 10.0 = 1_000_000 exactly, but commission pushes it over.
        let result = broker
            .send_order("000001", Side::Buy, 10.0, 100_000, OrderType::Limit)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("insufficient cash"));
    }

    #[tokio::test]
    async fn buy_fill_updates_cash_position_and_lots() {
        let (broker, _) = broker();
        ready(&broker).await;
        broker.set_market_price("000001", 10.0);

        let result = broker
            .send_order("000001", Side::Buy, 10.0, 1000, OrderType::Limit)
            .await;
        assert!(result.success);
        broker.process_pending_orders();

        let positions = broker.query_positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 1000);

        let account = broker.query_account().await.unwrap();
        let commission = 10.0 * 1000.0 * 0.0003;
        assert!((account.cash - (1_000_000.0 - 10_000.0 - commission)).abs() < 1e-6);
        assert!((account.total_value - (account.cash + 10_000.0)).abs() < 1e-6);

        let orders = broker.query_orders(Some(OrderStatus::Filled)).await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].filled_quantity, 1000);
        assert!(orders[0].filled_price > 0.0);
    }

    #[tokio::test]
    async fn limit_buy_waits_for_market_to_touch() {
        let (broker, _) = broker();
        ready(&broker).await;
        broker.set_market_price("000001", 10.5);

        broker
            .send_order("000001", Side::Buy, 10.0, 1000, OrderType::Limit)
            .await;
        broker.process_pending_orders();
        assert!(broker.query_positions().await.is_empty());

        broker.set_market_price("000001", 10.0);
        broker.process_pending_orders();
        assert_eq!(broker.query_positions().await.len(), 1);
    }

    #[tokio::test]
    async fn sell_same_day_hits_t_plus_one() {
        let (broker, clock) = broker();
        ready(&broker).await;
        broker.set_market_price("000001", 10.0);
        broker
            .send_order("000001", Side::Buy, 10.0, 1000, OrderType::Limit)
            .await;
        broker.process_pending_orders();

        assert_eq!(broker.sellable_quantity("000001").await, 0);
        let result = broker
            .send_order("000001", Side::Sell, 10.0, 1000, OrderType::Limit)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("T+1"));

        // Next trading day the lot settles.
        clock.advance(chrono::Duration::days(1));
        assert_eq!(broker.sellable_quantity("000001").await, 1000);
        let result = broker
            .send_order("000001", Side::Sell, 10.0, 1000, OrderType::Limit)
            .await;
        assert!(result.success);
        broker.process_pending_orders();
        assert!(broker.query_positions().await.is_empty());
        assert_eq!(broker.sellable_quantity("000001").await, 0);
    }

    #[tokio::test]
    async fn lot_ledger_matches_position_quantity() {
        let (broker, clock) = broker();
        ready(&broker).await;
        broker.set_market_price("000001", 10.0);

        for _ in 0..2 {
            broker
                .send_order("000001", Side::Buy, 10.0, 500, OrderType::Limit)
                .await;
            broker.process_pending_orders();
        }
        clock.advance(chrono::Duration::days(1));
        broker
            .send_order("000001", Side::Buy, 10.0, 300, OrderType::Limit)
            .await;
        broker.process_pending_orders();

        // 1000 settled + 300 bought today.
        let positions = broker.query_positions().await;
        assert_eq!(positions[0].quantity, 1300);
        assert_eq!(broker.sellable_quantity("000001").await, 1000);

        // Selling 600 consumes the oldest settled lots first.
        broker
            .send_order("000001", Side::Sell, 10.0, 600, OrderType::Limit)
            .await;
        broker.process_pending_orders();
        let positions = broker.query_positions().await;
        assert_eq!(positions[0].quantity, 700);
        assert_eq!(broker.sellable_quantity("000001").await, 400);
    }

    #[tokio::test]
    async fn sell_beyond_position_is_rejected() {
        let (broker, _) = broker();
        ready(&broker).await;
        let result = broker
            .send_order("000001", Side::Sell, 10.0, 100, OrderType::Limit)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("position"));
    }

    #[tokio::test]
    async fn cancel_only_submitted_orders() {
        let (broker, _) = broker();
        ready(&broker).await;
        broker.set_market_price("000001", 11.0); // won't fill a 10.0 limit
        let result = broker
            .send_order("000001", Side::Buy, 10.0, 100, OrderType::Limit)
            .await;
        assert!(broker.cancel_order(&result.order_id).await);
        assert!(!broker.cancel_order(&result.order_id).await);
        assert!(!broker.cancel_order("missing").await);
    }

    #[tokio::test]
    async fn modify_is_unsupported() {
        let (broker, _) = broker();
        ready(&broker).await;
        assert!(!broker.modify_order("any", Some(10.0), None).await);
    }

    #[tokio::test]
    async fn sell_commission_includes_stamp_duty() {
        let (broker, clock) = broker();
        ready(&broker).await;
        broker.set_market_price("000001", 10.0);
        broker
            .send_order("000001", Side::Buy, 10.0, 1000, OrderType::Limit)
            .await;
        broker.process_pending_orders();
        clock.advance(chrono::Duration::days(1));
        broker
            .send_order("000001", Side::Sell, 10.0, 1000, OrderType::Limit)
            .await;
        broker.process_pending_orders();

        let trades = broker.query_trades().await;
        let sell = trades.iter().find(|t| t.side == Side::Sell).unwrap();
        let expected = 10.0 * 1000.0 * 0.0003 + 10.0 * 1000.0 * 0.001;
        assert!((sell.commission - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let (broker, _) = broker();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        broker.set_event_sender(tx);
        ready(&broker).await;
        broker.set_market_price("000001", 10.0);
        broker
            .send_order("000001", Side::Buy, 10.0, 100, OrderType::Limit)
            .await;
        broker.process_pending_orders();

        let mut saw_submitted = false;
        let mut saw_trade = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                BrokerEvent::Order(o) if o.status == OrderStatus::Submitted => {
                    saw_submitted = true
                }
                BrokerEvent::Trade(_) => saw_trade = true,
                _ => {}
            }
        }
        assert!(saw_submitted);
        assert!(saw_trade);
    }
}
