use crate::builtin::lot_sizing;
use crate::{Strategy, StrategyCell};
use qb_schemas::{Bar, OrderType};
use std::collections::BTreeMap;

/// Dual moving-average trend follower.
///
/// Holds while the fast average is above the slow average: enters when flat
/// with the fast side on top, exits the full position once it drops back
/// below.
pub struct DualMaStrategy {
    pub fast_period: usize,
    pub slow_period: usize,
    pub sizing: f64,
}

impl Default for DualMaStrategy {
    fn default() -> Self {
        Self {
            fast_period: 5,
            slow_period: 20,
            sizing: 0.9,
        }
    }
}

impl Strategy for DualMaStrategy {
    fn name(&self) -> &str {
        "dual_ma"
    }

    fn on_bar(&mut self, cell: &mut StrategyCell, bar: &Bar) {
        let closes = cell.close_series(self.slow_period + 1);
        if closes.len() < self.slow_period {
            return;
        }

        let mean_of_tail = |n: usize| -> f64 {
            let tail = &closes[closes.len() - n..];
            tail.iter().sum::<f64>() / n as f64
        };
        let fast_ma = mean_of_tail(self.fast_period);
        let slow_ma = mean_of_tail(self.slow_period);

        if fast_ma > slow_ma && cell.position() == 0 {
            let quantity = lot_sizing(cell.cash(), bar.close, self.sizing);
            if quantity >= 100 {
                cell.buy(bar.close, quantity, OrderType::Limit);
                cell.log(&format!(
                    "dual-ma entry: price={:.2} qty={quantity} fast={fast_ma:.2} slow={slow_ma:.2}",
                    bar.close
                ));
            }
        } else if fast_ma < slow_ma && cell.position() > 0 {
            let quantity = cell.position();
            cell.sell(bar.close, quantity, OrderType::Limit);
            cell.log(&format!(
                "dual-ma exit: price={:.2} qty={quantity}",
                bar.close
            ));
        }
    }

    fn set_param(&mut self, key: &str, value: f64) -> bool {
        match key {
            "fast_period" => self.fast_period = value as usize,
            "slow_period" => self.slow_period = value as usize,
            "sizing" => self.sizing = value,
            _ => return false,
        }
        true
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("fast_period".to_string(), self.fast_period as f64),
            ("slow_period".to_string(), self.slow_period as f64),
            ("sizing".to_string(), self.sizing),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, close: f64) -> Bar {
        let ts = NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .checked_add_days(chrono::Days::new(day as u64))
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Bar::new(ts, close, close, close, close, 1_000.0)
    }

    #[test]
    fn enters_once_on_a_ramp_and_never_exits() {
        let mut cell = StrategyCell::default();
        cell.set_capital(1_000_000.0);
        let mut strategy = DualMaStrategy::default();

        let mut intents = 0;
        for day in 0..61 {
            let close = 10.0 + day as f64 * 0.083;
            let b = bar(day, close);
            cell.push_bar("000001", b.clone());
            let before = cell.orders().len();
            strategy.on_bar(&mut cell, &b);
            intents += cell.orders().len() - before;

            // Confirm any fresh intent immediately so the held position
            // gates the next evaluation, as fills do in a session.
            if let Some(order) = cell.orders().last().cloned() {
                if order.status == qb_schemas::OrderStatus::Submitted {
                    cell.apply_fill(&qb_schemas::Trade {
                        trade_id: format!("T{day}"),
                        order_id: order.order_id.clone(),
                        code: order.code.clone(),
                        side: order.side,
                        price: order.price,
                        quantity: order.quantity,
                        commission: 0.0,
                        trade_time: order.create_time,
                    });
                }
            }
        }

        // One entry, no exit: the fast average never drops below the slow
        // one on a monotonic ramp.
        assert_eq!(intents, 1);
        let order = &cell.orders()[0];
        assert_eq!(order.side, qb_schemas::Side::Buy);
        assert_eq!(order.quantity % 100, 0);
        assert!(cell.position() > 0);
    }

    #[test]
    fn waits_for_the_slow_window() {
        let mut cell = StrategyCell::default();
        cell.set_capital(1_000_000.0);
        let mut strategy = DualMaStrategy::default();

        for day in 0..19 {
            let b = bar(day, 10.0 + day as f64);
            cell.push_bar("000001", b.clone());
            strategy.on_bar(&mut cell, &b);
        }
        assert!(cell.orders().is_empty());
    }

    #[test]
    fn params_round_trip() {
        let mut strategy = DualMaStrategy::default();
        assert!(strategy.set_param("fast_period", 3.0));
        assert!(strategy.set_param("slow_period", 10.0));
        assert!(!strategy.set_param("unknown", 1.0));
        assert_eq!(strategy.params()["fast_period"], 3.0);
        assert_eq!(strategy.params()["slow_period"], 10.0);
    }
}
