use crate::trader::BrokerTrader;
use crate::types::{BrokerEventSender, OrderResult};
use qb_schemas::{AccountInfo, Order, OrderStatus, OrderType, Position, Side, Trade};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Thin supervisor over one [`BrokerTrader`].
///
/// Gates every trading call behind an explicit `start_trading` /
/// `stop_trading` switch; query calls pass through regardless.
pub struct TradingEngine {
    broker: Mutex<Option<Arc<dyn BrokerTrader>>>,
    is_trading: AtomicBool,
}

impl Default for TradingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TradingEngine {
    pub fn new() -> Self {
        Self {
            broker: Mutex::new(None),
            is_trading: AtomicBool::new(false),
        }
    }

    pub fn set_broker(&self, broker: Arc<dyn BrokerTrader>) {
        *self.broker.lock().expect("engine broker lock poisoned") = Some(broker);
    }

    pub fn broker(&self) -> Option<Arc<dyn BrokerTrader>> {
        self.broker.lock().expect("engine broker lock poisoned").clone()
    }

    /// Route broker events onto the given queue.
    pub fn set_event_sender(&self, sender: BrokerEventSender) {
        if let Some(broker) = self.broker() {
            broker.set_event_sender(sender);
        }
    }

    pub async fn connect(&self) -> bool {
        match self.broker() {
            Some(broker) => broker.connect().await.is_ok(),
            None => false,
        }
    }

    pub async fn login(&self) -> bool {
        match self.broker() {
            Some(broker) => broker.login().await.is_ok(),
            None => false,
        }
    }

    pub async fn disconnect(&self) {
        if let Some(broker) = self.broker() {
            broker.disconnect().await;
        }
    }

    pub fn start_trading(&self) {
        self.is_trading.store(true, Ordering::SeqCst);
        info!("trading started");
    }

    pub fn stop_trading(&self) {
        self.is_trading.store(false, Ordering::SeqCst);
        info!("trading stopped");
    }

    pub fn is_trading(&self) -> bool {
        self.is_trading.load(Ordering::SeqCst)
    }

    async fn route(
        &self,
        code: &str,
        side: Side,
        price: f64,
        quantity: i64,
        order_type: OrderType,
    ) -> OrderResult {
        if !self.is_trading() {
            return OrderResult::fail("trading is not started");
        }
        let Some(broker) = self.broker() else {
            return OrderResult::fail("no broker configured");
        };
        if !broker.is_logged_in() {
            return OrderResult::fail("not logged in");
        }
        broker.send_order(code, side, price, quantity, order_type).await
    }

    pub async fn buy(
        &self,
        code: &str,
        price: f64,
        quantity: i64,
        order_type: OrderType,
    ) -> OrderResult {
        self.route(code, Side::Buy, price, quantity, order_type).await
    }

    pub async fn sell(
        &self,
        code: &str,
        price: f64,
        quantity: i64,
        order_type: OrderType,
    ) -> OrderResult {
        self.route(code, Side::Sell, price, quantity, order_type).await
    }

    pub async fn cancel(&self, order_id: &str) -> bool {
        match self.broker() {
            Some(broker) => broker.cancel_order(order_id).await,
            None => false,
        }
    }

    pub async fn account(&self) -> Option<AccountInfo> {
        match self.broker() {
            Some(broker) => broker.query_account().await,
            None => None,
        }
    }

    pub async fn positions(&self) -> Vec<Position> {
        match self.broker() {
            Some(broker) => broker.query_positions().await,
            None => Vec::new(),
        }
    }

    pub async fn orders(&self, status: Option<OrderStatus>) -> Vec<Order> {
        match self.broker() {
            Some(broker) => broker.query_orders(status).await,
            None => Vec::new(),
        }
    }

    pub async fn trades(&self) -> Vec<Trade> {
        match self.broker() {
            Some(broker) => broker.query_trades().await,
            None => Vec::new(),
        }
    }

    pub async fn sellable_quantity(&self, code: &str) -> i64 {
        match self.broker() {
            Some(broker) => broker.sellable_quantity(code).await,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedBroker;
    use crate::types::BrokerConfig;

    async fn engine_with_sim() -> (TradingEngine, Arc<SimulatedBroker>) {
        let broker = Arc::new(SimulatedBroker::new(&BrokerConfig::default()));
        let engine = TradingEngine::new();
        engine.set_broker(Arc::clone(&broker) as Arc<dyn BrokerTrader>);
        assert!(engine.connect().await);
        assert!(engine.login().await);
        (engine, broker)
    }

    #[tokio::test]
    async fn refuses_orders_until_trading_starts() {
        let (engine, _broker) = engine_with_sim().await;
        let result = engine.buy("000001", 10.0, 100, OrderType::Limit).await;
        assert!(!result.success);
        assert!(result.message.contains("not started"));

        engine.start_trading();
        let result = engine.buy("000001", 10.0, 100, OrderType::Limit).await;
        assert!(result.success, "{}", result.message);

        engine.stop_trading();
        let result = engine.sell("000001", 10.0, 100, OrderType::Limit).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn queries_pass_through_without_trading_flag() {
        let (engine, _broker) = engine_with_sim().await;
        assert!(engine.account().await.is_some());
        assert!(engine.positions().await.is_empty());
        assert_eq!(engine.sellable_quantity("000001").await, 0);
    }

    #[tokio::test]
    async fn without_broker_everything_degrades() {
        let engine = TradingEngine::new();
        engine.start_trading();
        let result = engine.buy("000001", 10.0, 100, OrderType::Limit).await;
        assert!(!result.success);
        assert!(engine.account().await.is_none());
        assert!(!engine.cancel("x").await);
    }
}
