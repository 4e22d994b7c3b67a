use qb_schemas::{
    normalize_lot, Bar, Clock, Order, OrderStatus, OrderType, Position, Side, SystemClock, Trade,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;
use uuid::Uuid;

/// Cap on per-code bar history inside a cell; long sessions stay bounded.
pub const BAR_HISTORY_CAP: usize = 2000;

pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// The account a strategy acts through.
///
/// Owns cash, positions, the local order/trade ledgers and a bounded
/// per-code bar history, and exposes the capability surface strategies
/// call: `buy`, `sell`, `cancel`, `position`, `total_value`,
/// `close_series`, `bar_window`, `log`.
///
/// Order intents leave the cell on a one-way channel; nothing downstream
/// ever calls back into the cell while it is borrowed.
pub struct StrategyCell {
    cash: f64,
    initial_capital: f64,
    positions: BTreeMap<String, Position>,
    orders: Vec<Order>,
    trades: Vec<Trade>,
    bars: BTreeMap<String, VecDeque<Bar>>,
    current_code: String,
    intent_tx: Option<UnboundedSender<Order>>,
    trade_tx: Option<UnboundedSender<Trade>>,
    log_sink: Option<LogSink>,
    clock: Arc<dyn Clock>,
}

impl Default for StrategyCell {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl StrategyCell {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            cash: 0.0,
            initial_capital: 0.0,
            positions: BTreeMap::new(),
            orders: Vec::new(),
            trades: Vec::new(),
            bars: BTreeMap::new(),
            current_code: String::new(),
            intent_tx: None,
            trade_tx: None,
            log_sink: None,
            clock,
        }
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Establish initial cash and total value.
    pub fn set_capital(&mut self, capital: f64) {
        self.initial_capital = capital;
        self.cash = capital;
    }

    /// Sink for emitted order intents.
    pub fn set_intent_sink(&mut self, tx: UnboundedSender<Order>) {
        self.intent_tx = Some(tx);
    }

    /// Sink notified after each confirmed fill is applied.
    pub fn set_trade_sink(&mut self, tx: UnboundedSender<Trade>) {
        self.trade_tx = Some(tx);
    }

    pub fn set_log_sink(&mut self, sink: LogSink) {
        self.log_sink = Some(sink);
    }

    pub fn log(&self, message: &str) {
        match &self.log_sink {
            Some(sink) => sink(message),
            None => info!(target: "strategy", "{message}"),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Held quantity of the code currently being processed.
    pub fn position(&self) -> i64 {
        self.positions
            .get(&self.current_code)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }

    pub fn position_for(&self, code: &str) -> Option<&Position> {
        self.positions.get(code)
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    /// `cash + Σ market_value` over all held positions.
    pub fn total_value(&self) -> f64 {
        let market_value: f64 = self.positions.values().map(Position::market_value).sum();
        self.cash + market_value
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn order(&self, order_id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn current_code(&self) -> &str {
        &self.current_code
    }

    /// Last `count` closes of the current code, oldest first.
    pub fn close_series(&self, count: usize) -> Vec<f64> {
        match self.bars.get(&self.current_code) {
            Some(bars) => {
                let skip = bars.len().saturating_sub(count);
                bars.iter().skip(skip).map(|b| b.close).collect()
            }
            None => Vec::new(),
        }
    }

    /// Last `count` bars of the current code, oldest first.
    pub fn bar_window(&self, count: usize) -> Vec<Bar> {
        match self.bars.get(&self.current_code) {
            Some(bars) => {
                let skip = bars.len().saturating_sub(count);
                bars.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Order emission
    // ------------------------------------------------------------------

    /// Emit a BUY intent for the current code. Quantity is normalized to a
    /// 100-share lot; rejects are logged and return `None`.
    pub fn buy(&mut self, price: f64, quantity: i64, order_type: OrderType) -> Option<Order> {
        let quantity = normalize_lot(quantity);
        if quantity <= 0 {
            self.log("buy rejected: quantity below one board lot");
            return None;
        }

        let required = price * quantity as f64;
        if required > self.cash {
            self.log(&format!(
                "buy rejected: need {required:.2}, cash {:.2}",
                self.cash
            ));
            return None;
        }

        self.emit(Side::Buy, price, quantity, order_type)
    }

    /// Emit a SELL intent for the current code. Quantity is normalized;
    /// selling more than the held quantity is rejected.
    pub fn sell(&mut self, price: f64, quantity: i64, order_type: OrderType) -> Option<Order> {
        let quantity = normalize_lot(quantity);
        if quantity <= 0 {
            self.log("sell rejected: quantity below one board lot");
            return None;
        }

        if self.position() < quantity {
            self.log(&format!(
                "sell rejected: need {quantity}, holding {}",
                self.position()
            ));
            return None;
        }

        self.emit(Side::Sell, price, quantity, order_type)
    }

    fn emit(&mut self, side: Side, price: f64, quantity: i64, order_type: OrderType) -> Option<Order> {
        let mut order = Order::new(
            format!("O{}", Uuid::new_v4().simple()),
            self.current_code.clone(),
            side,
            price,
            quantity,
            order_type,
            self.clock.now(),
        );
        order.status = OrderStatus::Submitted;
        self.orders.push(order.clone());
        self.log(&format!(
            "{side} intent: {} {quantity} @ {price:.2}",
            order.code
        ));
        if let Some(tx) = &self.intent_tx {
            let _ = tx.send(order.clone());
        }
        Some(order)
    }

    /// Cancel a locally tracked SUBMITTED order.
    pub fn cancel(&mut self, order_id: &str) -> bool {
        let now = self.clock.now();
        for order in &mut self.orders {
            if order.order_id == order_id && order.status == OrderStatus::Submitted {
                order.status = OrderStatus::Cancelled;
                order.update_time = Some(now);
                self.log(&format!("cancelled order {order_id}"));
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Runtime-facing mutation
    // ------------------------------------------------------------------

    /// Record the broker-assigned id for a locally emitted order so later
    /// fills and status updates find it.
    pub fn rebind_order_id(&mut self, local_id: &str, broker_id: &str) -> bool {
        for order in &mut self.orders {
            if order.order_id == local_id {
                order.order_id = broker_id.to_string();
                return true;
            }
        }
        false
    }

    /// Force a status onto a local order (risk rejection, semi-auto hold).
    pub fn mark_order_status(&mut self, order_id: &str, status: OrderStatus) -> bool {
        let now = self.clock.now();
        for order in &mut self.orders {
            if order.order_id == order_id {
                order.status = status;
                order.update_time = Some(now);
                return true;
            }
        }
        false
    }

    /// Mirror a broker-side order update. Terminal local states are final.
    pub fn sync_order(&mut self, update: &Order) {
        let now = self.clock.now();
        for order in &mut self.orders {
            if order.order_id == update.order_id {
                if !order.status.is_terminal() {
                    order.status = update.status;
                }
                order.filled_quantity = update.filled_quantity;
                if update.filled_price > 0.0 {
                    order.filled_price = update.filled_price;
                }
                order.update_time = Some(now);
                return;
            }
        }
    }

    /// Push one bar for `code` into the bounded history, making `code` the
    /// current cursor and marking its position to the close.
    pub fn push_bar(&mut self, code: &str, bar: Bar) {
        self.current_code = code.to_string();
        if let Some(pos) = self.positions.get_mut(code) {
            pos.current_price = bar.close;
        }
        let history = self.bars.entry(code.to_string()).or_default();
        history.push_back(bar);
        while history.len() > BAR_HISTORY_CAP {
            history.pop_front();
        }
    }

    /// Apply a confirmed fill: order goes FILLED, cash and the position
    /// move, the trade is recorded. Returns whether the referenced order
    /// was tracked by this cell.
    pub fn apply_fill(&mut self, trade: &Trade) -> bool {
        let now = self.clock.now();
        let Some(order) = self
            .orders
            .iter_mut()
            .find(|o| o.order_id == trade.order_id)
        else {
            return false;
        };

        order.status = OrderStatus::Filled;
        order.filled_quantity = trade.quantity;
        order.filled_price = trade.price;
        order.update_time = Some(now);

        match trade.side {
            Side::Buy => {
                self.cash -= trade.price * trade.quantity as f64 + trade.commission;
                match self.positions.get_mut(&trade.code) {
                    Some(pos) => {
                        let total_cost =
                            pos.avg_cost * pos.quantity as f64 + trade.price * trade.quantity as f64;
                        pos.quantity += trade.quantity;
                        pos.avg_cost = total_cost / pos.quantity as f64;
                        pos.current_price = trade.price;
                    }
                    None => {
                        self.positions.insert(
                            trade.code.clone(),
                            Position::new(trade.code.clone(), trade.quantity, trade.price),
                        );
                    }
                }
            }
            Side::Sell => {
                self.cash += trade.price * trade.quantity as f64 - trade.commission;
                let emptied = match self.positions.get_mut(&trade.code) {
                    Some(pos) => {
                        pos.quantity -= trade.quantity;
                        pos.quantity <= 0
                    }
                    None => false,
                };
                if emptied {
                    self.positions.remove(&trade.code);
                }
            }
        }

        self.trades.push(trade.clone());
        if let Some(tx) = &self.trade_tx {
            let _ = tx.send(trade.clone());
        }
        true
    }
}
