use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Lowercase wire form used by the REST gateways (`"buy"` / `"sell"`).
    pub fn wire(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order pricing style.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn wire(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

/// Order lifecycle. `Pending -> Submitted -> {Filled | Cancelled | Rejected}`.
/// A terminal status never transitions again.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn wire(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire())
    }
}

/// Kline aggregation periods carried by the fanout cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KlinePeriod {
    Min1,
    Min5,
    Min15,
    Min30,
    Min60,
    Day,
}

impl KlinePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            KlinePeriod::Min1 => "1m",
            KlinePeriod::Min5 => "5m",
            KlinePeriod::Min15 => "15m",
            KlinePeriod::Min30 => "30m",
            KlinePeriod::Min60 => "60m",
            KlinePeriod::Day => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(KlinePeriod::Min1),
            "5m" => Some(KlinePeriod::Min5),
            "15m" => Some(KlinePeriod::Min15),
            "30m" => Some(KlinePeriod::Min30),
            "60m" => Some(KlinePeriod::Min60),
            "1d" => Some(KlinePeriod::Day),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One OHLCV window. Immutable once emitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Traded currency amount for the window (0 when the source omits it).
    pub turnover: f64,
}

impl Bar {
    pub fn new(ts: NaiveDateTime, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
            turnover: 0.0,
        }
    }
}

/// A single trade print plus top-of-book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub volume: i64,
    pub turnover: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_volume: i64,
    pub ask_volume: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub prev_close: f64,
    pub ts: NaiveDateTime,
}

impl Tick {
    pub fn change(&self) -> f64 {
        if self.prev_close != 0.0 {
            self.price - self.prev_close
        } else {
            0.0
        }
    }

    pub fn change_percent(&self) -> f64 {
        if self.prev_close != 0.0 {
            (self.price - self.prev_close) / self.prev_close * 100.0
        } else {
            0.0
        }
    }
}

/// Latest quote plus session aggregates and optional five-level depth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub prev_close: f64,
    /// Session-cumulative volume.
    pub volume: i64,
    /// Session-cumulative traded amount.
    pub turnover: f64,
    pub bid_prices: Vec<f64>,
    pub bid_volumes: Vec<i64>,
    pub ask_prices: Vec<f64>,
    pub ask_volumes: Vec<i64>,
    pub ts: NaiveDateTime,
}

impl Snapshot {
    /// A depth-less snapshot; the common case for polled quotes.
    pub fn flat(code: impl Into<String>, price: f64, ts: NaiveDateTime) -> Self {
        Self {
            code: code.into(),
            name: String::new(),
            price,
            open: price,
            high: price,
            low: price,
            prev_close: 0.0,
            volume: 0,
            turnover: 0.0,
            bid_prices: Vec::new(),
            bid_volumes: Vec::new(),
            ask_prices: Vec::new(),
            ask_volumes: Vec::new(),
            ts,
        }
    }

    pub fn change(&self) -> f64 {
        if self.prev_close != 0.0 {
            self.price - self.prev_close
        } else {
            0.0
        }
    }

    pub fn change_percent(&self) -> f64 {
        if self.prev_close != 0.0 {
            (self.price - self.prev_close) / self.prev_close * 100.0
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Trading
// ---------------------------------------------------------------------------

/// An order as tracked by strategies and brokers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub code: String,
    pub side: Side,
    pub price: f64,
    /// Requested share count; a positive multiple of 100 after normalization.
    pub quantity: i64,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub filled_quantity: i64,
    /// Volume-weighted fill price; 0 until the first fill.
    pub filled_price: f64,
    pub create_time: NaiveDateTime,
    pub update_time: Option<NaiveDateTime>,
}

impl Order {
    pub fn new(
        order_id: impl Into<String>,
        code: impl Into<String>,
        side: Side,
        price: f64,
        quantity: i64,
        order_type: OrderType,
        create_time: NaiveDateTime,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            code: code.into(),
            side,
            price,
            quantity,
            order_type,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            filled_price: 0.0,
            create_time,
            update_time: None,
        }
    }
}

/// One execution against an order. Commission already includes the 0.1%
/// stamp duty on SELL fills.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: String,
    pub code: String,
    pub side: Side,
    pub price: f64,
    pub quantity: i64,
    pub commission: f64,
    pub trade_time: NaiveDateTime,
}

/// A held position. A position with quantity 0 is deleted, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub code: String,
    pub quantity: i64,
    pub avg_cost: f64,
    pub current_price: f64,
}

impl Position {
    pub fn new(code: impl Into<String>, quantity: i64, avg_cost: f64) -> Self {
        Self {
            code: code.into(),
            quantity,
            avg_cost,
            current_price: avg_cost,
        }
    }

    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.current_price
    }

    pub fn profit(&self) -> f64 {
        (self.current_price - self.avg_cost) * self.quantity as f64
    }

    /// Unrealized profit as a percentage of cost; 0 when cost is 0.
    pub fn profit_pct(&self) -> f64 {
        if self.avg_cost == 0.0 {
            0.0
        } else {
            (self.current_price - self.avg_cost) / self.avg_cost * 100.0
        }
    }
}

/// Broker account summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub broker: String,
    pub cash: f64,
    pub frozen: f64,
    pub market_value: f64,
    pub total_value: f64,
    pub profit: f64,
    pub profit_pct: f64,
}

/// Round a requested quantity down to the exchange board lot (100 shares).
pub fn normalize_lot(quantity: i64) -> i64 {
    (quantity / 100) * 100
}
