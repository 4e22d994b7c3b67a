//! Shared data model for the trading workbench.
//!
//! Every other crate speaks these types: bars and quotes on the way in,
//! orders/trades/positions on the way out. The crate also hosts the two
//! pieces of logic that must agree everywhere they are used:
//!
//! - [`matcher`] — the deterministic fill rules shared by the backtest
//!   engine and the simulated broker.
//! - [`clock`] — the injectable time source, so brokers/feeds/risk can be
//!   pinned to a fixed instant in tests.

pub mod clock;
pub mod matcher;
mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use types::{
    normalize_lot, AccountInfo, Bar, KlinePeriod, Order, OrderStatus, OrderType, Position, Side,
    Snapshot, Tick, Trade,
};
