//! Deterministic fill rules shared by the backtest engine and the simulated
//! broker.
//!
//! Rules:
//! - LIMIT BUY fills when `quote.low <= order.price`;
//!   fill price = `min(order.price, quote.open) * (1 + slippage)`.
//! - LIMIT SELL fills when `quote.high >= order.price`;
//!   fill price = `max(order.price, quote.open) * (1 - slippage)`.
//! - MARKET orders fill at `quote.open` (the prevailing reference), no
//!   slippage adjustment.
//! - Commission = `fill * qty * commission_rate`; SELL adds the 0.1% stamp
//!   duty on top.
//! - No partial fills: an order fills in full or stays SUBMITTED.

use crate::types::{Order, OrderType, Side};

/// Stamp duty charged on the SELL side, as a rate of traded value.
pub const SELL_STAMP_DUTY_RATE: f64 = 0.001;

/// Reference prices an order is matched against.
///
/// In the backtest this is the day's bar; in the simulated broker the last
/// known market price stands in for all three fields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FillQuote {
    pub open: f64,
    pub high: f64,
    pub low: f64,
}

impl FillQuote {
    pub fn from_bar(bar: &crate::types::Bar) -> Self {
        Self {
            open: bar.open,
            high: bar.high,
            low: bar.low,
        }
    }

    /// A single market price standing in for open/high/low.
    pub fn from_price(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
        }
    }
}

/// Cost model applied at fill time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostModel {
    pub commission_rate: f64,
    pub slippage: f64,
}

impl CostModel {
    pub fn new(commission_rate: f64, slippage: f64) -> Self {
        Self {
            commission_rate,
            slippage,
        }
    }

    /// Commission for a fill, stamp duty included on SELL.
    pub fn commission(&self, side: Side, fill_price: f64, quantity: i64) -> f64 {
        let notional = fill_price * quantity as f64;
        let mut commission = notional * self.commission_rate;
        if side == Side::Sell {
            commission += notional * SELL_STAMP_DUTY_RATE;
        }
        commission
    }
}

/// A full fill produced by the matcher.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FillOutcome {
    pub price: f64,
    pub commission: f64,
}

/// Apply the fill rules to one SUBMITTED order against one quote.
///
/// Returns `None` when the order does not fill on this quote. Orders that
/// are not in SUBMITTED state never fill.
pub fn try_fill(order: &Order, quote: &FillQuote, costs: &CostModel) -> Option<FillOutcome> {
    if order.status != crate::types::OrderStatus::Submitted {
        return None;
    }

    let price = match order.order_type {
        OrderType::Market => quote.open,
        OrderType::Limit => match order.side {
            Side::Buy => {
                if quote.low > order.price {
                    return None;
                }
                order.price.min(quote.open) * (1.0 + costs.slippage)
            }
            Side::Sell => {
                if quote.high < order.price {
                    return None;
                }
                order.price.max(quote.open) * (1.0 - costs.slippage)
            }
        },
    };

    Some(FillOutcome {
        price,
        commission: costs.commission(order.side, price, order.quantity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, OrderStatus};
    use chrono::NaiveDate;

    fn order(side: Side, price: f64, order_type: OrderType) -> Order {
        let ts = NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let mut o = Order::new("O1", "000001", side, price, 1000, order_type, ts);
        o.status = OrderStatus::Submitted;
        o
    }

    fn quote(open: f64, high: f64, low: f64) -> FillQuote {
        FillQuote { open, high, low }
    }

    #[test]
    fn limit_buy_fills_when_low_touches_price() {
        let costs = CostModel::new(0.0, 0.0);
        let o = order(Side::Buy, 10.0, OrderType::Limit);

        // Boundary: bar.low == price fills.
        let fill = try_fill(&o, &quote(10.2, 10.4, 10.0), &costs).unwrap();
        assert!((fill.price - 10.0).abs() < 1e-9);

        // Low strictly above price does not fill.
        assert!(try_fill(&o, &quote(10.2, 10.4, 10.01), &costs).is_none());
    }

    #[test]
    fn limit_sell_fills_when_high_touches_price() {
        let costs = CostModel::new(0.0, 0.0);
        let o = order(Side::Sell, 10.0, OrderType::Limit);

        let fill = try_fill(&o, &quote(9.8, 10.0, 9.7), &costs).unwrap();
        assert!((fill.price - 10.0).abs() < 1e-9);

        assert!(try_fill(&o, &quote(9.8, 9.99, 9.7), &costs).is_none());
    }

    #[test]
    fn buy_fill_price_uses_min_of_limit_and_open_plus_slippage() {
        let costs = CostModel::new(0.0, 0.001);
        let o = order(Side::Buy, 10.0, OrderType::Limit);

        // Opens below the limit: fill at open plus slippage.
        let fill = try_fill(&o, &quote(9.5, 10.5, 9.4), &costs).unwrap();
        assert!((fill.price - 9.5 * 1.001).abs() < 1e-9);

        // Opens above the limit: fill at the limit plus slippage.
        let fill = try_fill(&o, &quote(10.3, 10.5, 9.9), &costs).unwrap();
        assert!((fill.price - 10.0 * 1.001).abs() < 1e-9);
    }

    #[test]
    fn sell_fill_price_uses_max_of_limit_and_open_minus_slippage() {
        let costs = CostModel::new(0.0, 0.001);
        let o = order(Side::Sell, 10.0, OrderType::Limit);

        let fill = try_fill(&o, &quote(10.5, 10.8, 10.1), &costs).unwrap();
        assert!((fill.price - 10.5 * 0.999).abs() < 1e-9);
    }

    #[test]
    fn market_order_fills_at_reference_open() {
        let costs = CostModel::new(0.0003, 0.001);
        let o = order(Side::Buy, 0.0, OrderType::Market);
        let fill = try_fill(&o, &quote(10.2, 10.4, 10.0), &costs).unwrap();
        assert!((fill.price - 10.2).abs() < 1e-9);
    }

    #[test]
    fn sell_commission_includes_stamp_duty() {
        let costs = CostModel::new(0.0003, 0.0);
        let buy = costs.commission(Side::Buy, 10.0, 1000);
        let sell = costs.commission(Side::Sell, 10.0, 1000);
        assert!((buy - 3.0).abs() < 1e-9);
        assert!((sell - 3.0 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn non_submitted_orders_never_fill() {
        let costs = CostModel::new(0.0, 0.0);
        let mut o = order(Side::Buy, 10.0, OrderType::Limit);
        o.status = OrderStatus::Filled;
        assert!(try_fill(&o, &quote(9.0, 11.0, 8.0), &costs).is_none());
    }

    #[test]
    fn fill_quote_from_bar() {
        let ts = NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let bar = Bar::new(ts, 10.1, 10.5, 9.9, 10.3, 1_000.0);
        let q = FillQuote::from_bar(&bar);
        assert_eq!(q, quote(10.1, 10.5, 9.9));
    }
}
