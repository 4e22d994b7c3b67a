//! Tolerant decoding of broker gateway payloads.
//!
//! Gateways disagree on field names, timestamp formats and enum spellings;
//! these helpers accept the common variants and fall back to safe defaults
//! instead of failing a whole query over one odd field.

use chrono::{NaiveDate, NaiveDateTime};
use qb_schemas::{AccountInfo, Order, OrderStatus, OrderType, Position, Side, Trade};
use serde_json::Value;

/// First present key, as a string (numbers are stringified).
pub fn str_of<'a>(data: &'a Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match data.get(*k) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// First present key, as a float (numeric strings accepted).
pub fn num_of(data: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match data.get(*k) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    })
}

pub fn int_of(data: &Value, keys: &[&str]) -> Option<i64> {
    num_of(data, keys).map(|v| v as i64)
}

/// `"buy"`/`"sell"`/`1`/`2`, defaulting to BUY for anything else.
pub fn parse_side(value: Option<&Value>) -> Side {
    let text = match value {
        Some(Value::String(s)) => s.to_ascii_lowercase(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Side::Buy,
    };
    match text.as_str() {
        "sell" | "2" => Side::Sell,
        _ => Side::Buy,
    }
}

/// Wide synonym set mapping onto the five canonical states.
pub fn parse_status(value: Option<&Value>) -> OrderStatus {
    let text = match value {
        Some(Value::String(s)) => s.to_ascii_lowercase(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return OrderStatus::Submitted,
    };
    match text.as_str() {
        "pending" => OrderStatus::Pending,
        "submitted" | "new" | "accepted" | "partial" => OrderStatus::Submitted,
        "filled" | "done" => OrderStatus::Filled,
        "cancelled" | "canceled" => OrderStatus::Cancelled,
        "reject" | "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Submitted,
    }
}

/// `"market"`/`1` vs `"limit"`/`0`, defaulting to LIMIT.
pub fn parse_order_type(value: Option<&Value>) -> OrderType {
    let text = match value {
        Some(Value::String(s)) => s.to_ascii_lowercase(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return OrderType::Limit,
    };
    match text.as_str() {
        "market" | "1" => OrderType::Market,
        _ => OrderType::Limit,
    }
}

/// Epoch seconds, epoch millis, `YYYY-MM-DD[ HH:MM:SS]` or ISO forms;
/// anything else yields `fallback`.
pub fn parse_datetime(value: Option<&Value>, fallback: NaiveDateTime) -> NaiveDateTime {
    match value {
        Some(Value::Number(n)) => {
            let mut secs = n.as_f64().unwrap_or(0.0);
            if secs > 1e12 {
                secs /= 1000.0;
            }
            chrono::DateTime::from_timestamp(secs as i64, 0)
                .map(|dt| dt.naive_local())
                .unwrap_or(fallback)
        }
        Some(Value::String(s)) => {
            for fmt in [
                "%Y-%m-%d %H:%M:%S",
                "%Y/%m/%d %H:%M:%S",
                "%Y-%m-%dT%H:%M:%S",
            ] {
                // Ignore sub-second suffixes by trimming to the format length.
                let prefix = s.get(..fmt.len().min(s.len())).unwrap_or(s.as_str());
                if let Ok(dt) = NaiveDateTime::parse_from_str(prefix, fmt) {
                    return dt;
                }
            }
            let prefix = s.get(..10.min(s.len())).unwrap_or(s.as_str());
            if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                    return dt;
                }
            }
            fallback
        }
        _ => fallback,
    }
}

/// A bare array, or the named list under `key_hint` or `items`.
pub fn ensure_list(data: &Value, key_hint: &str) -> Vec<Value> {
    match data {
        Value::Array(items) => items.clone(),
        Value::Object(map) => {
            for key in [key_hint, "items"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.clone();
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Fallbacks used when a gateway echoes back a partial order object.
#[derive(Clone, Debug, Default)]
pub struct OrderFallback {
    pub code: String,
    pub side: Option<Side>,
    pub price: f64,
    pub quantity: i64,
}

pub fn parse_order(data: &Value, fallback: &OrderFallback, now: NaiveDateTime) -> Order {
    let price = num_of(data, &["price"]).unwrap_or(fallback.price);
    Order {
        order_id: str_of(data, &["order_id", "id", "cl_ord_id"]).unwrap_or_default(),
        code: str_of(data, &["code", "stock_code"]).unwrap_or_else(|| fallback.code.clone()),
        side: match data.get("side") {
            Some(v) => parse_side(Some(v)),
            None => fallback.side.unwrap_or(Side::Buy),
        },
        price,
        quantity: int_of(data, &["quantity", "volume"]).unwrap_or(fallback.quantity),
        order_type: parse_order_type(data.get("order_type")),
        status: parse_status(data.get("status")),
        filled_quantity: int_of(data, &["filled_quantity", "dealt"]).unwrap_or(0),
        filled_price: num_of(data, &["filled_price", "avg_price"]).unwrap_or(price),
        create_time: parse_datetime(data.get("create_time").or_else(|| data.get("ctime")), now),
        update_time: Some(parse_datetime(
            data.get("update_time").or_else(|| data.get("mtime")),
            now,
        )),
    }
}

pub fn parse_trade(data: &Value, now: NaiveDateTime) -> Trade {
    Trade {
        trade_id: str_of(data, &["trade_id", "id"]).unwrap_or_default(),
        order_id: str_of(data, &["order_id", "cl_ord_id"]).unwrap_or_default(),
        code: str_of(data, &["code", "stock_code"]).unwrap_or_default(),
        side: parse_side(data.get("side")),
        price: num_of(data, &["price"]).unwrap_or(0.0),
        quantity: int_of(data, &["quantity", "volume"]).unwrap_or(0),
        commission: num_of(data, &["commission"]).unwrap_or(0.0),
        trade_time: parse_datetime(data.get("trade_time").or_else(|| data.get("time")), now),
    }
}

pub fn parse_position(data: &Value) -> Position {
    let avg_cost = num_of(data, &["avg_cost", "cost_price"]).unwrap_or(0.0);
    Position {
        code: str_of(data, &["code", "stock_code"]).unwrap_or_default(),
        quantity: int_of(data, &["quantity", "volume"]).unwrap_or(0),
        avg_cost,
        current_price: num_of(data, &["current_price", "price"]).unwrap_or(avg_cost),
    }
}

pub fn parse_account(data: &Value, fallback_id: &str, broker: &str) -> AccountInfo {
    let cash = num_of(data, &["cash"]).unwrap_or(0.0);
    let market_value = num_of(data, &["market_value"]).unwrap_or(0.0);
    AccountInfo {
        account_id: str_of(data, &["account_id"]).unwrap_or_else(|| fallback_id.to_string()),
        broker: broker.to_string(),
        cash,
        frozen: num_of(data, &["frozen"]).unwrap_or(0.0),
        market_value,
        total_value: num_of(data, &["total_value"]).unwrap_or(cash + market_value),
        profit: num_of(data, &["profit"]).unwrap_or(0.0),
        profit_pct: num_of(data, &["profit_pct"]).unwrap_or(0.0),
    }
}
