use crate::types::{BrokerError, BrokerEventSender, BrokerType, OrderResult};
use async_trait::async_trait;
use qb_schemas::{AccountInfo, Order, OrderStatus, OrderType, Position, Side, Trade};

/// Polymorphic order-routing contract.
///
/// Implementations publish order/trade/position/account updates and errors
/// as [`crate::BrokerEvent`]s on the sender installed by
/// `set_event_sender`; queries additionally return their results directly.
/// Query failures are logged and yield empty results rather than errors, so
/// a flaky gateway never tears down a session.
#[async_trait]
pub trait BrokerTrader: Send + Sync {
    fn broker_type(&self) -> BrokerType;

    /// Install the upward event queue. Events emitted before this call are
    /// dropped.
    fn set_event_sender(&self, sender: BrokerEventSender);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self);

    async fn login(&self) -> Result<(), BrokerError>;

    /// Best-effort: local state is torn down even if the server call fails.
    async fn logout(&self);

    async fn send_order(
        &self,
        code: &str,
        side: Side,
        price: f64,
        quantity: i64,
        order_type: OrderType,
    ) -> OrderResult;

    async fn cancel_order(&self, order_id: &str) -> bool;

    /// Amend price and/or quantity. Brokers without native support return
    /// `false`; callers cancel-and-resend.
    async fn modify_order(&self, order_id: &str, price: Option<f64>, quantity: Option<i64>)
        -> bool;

    async fn query_account(&self) -> Option<AccountInfo>;

    async fn query_positions(&self) -> Vec<Position>;

    async fn query_orders(&self, status: Option<OrderStatus>) -> Vec<Order>;

    async fn query_trades(&self) -> Vec<Trade>;

    /// Shares of `code` sellable today under T+1 settlement.
    async fn sellable_quantity(&self, code: &str) -> i64;
}

impl std::fmt::Debug for dyn BrokerTrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn BrokerTrader({:?})", self.broker_type())
    }
}
