use crate::builtin::lot_sizing;
use crate::{Strategy, StrategyCell};
use qb_indicators::rsi;
use qb_schemas::{Bar, OrderType};
use std::collections::BTreeMap;

/// RSI threshold strategy: a climb back out of the oversold zone enters, a
/// drop back out of the overbought zone exits.
pub struct RsiStrategy {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
    pub sizing: f64,
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
            sizing: 0.9,
        }
    }
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn on_bar(&mut self, cell: &mut StrategyCell, bar: &Bar) {
        let closes = cell.close_series(self.period + 5);
        if closes.len() < self.period + 2 {
            return;
        }

        let out = rsi(&closes, self.period);
        let last = closes.len() - 1;
        let (current, prev) = (out[last], out[last - 1]);
        if current.is_nan() || prev.is_nan() {
            return;
        }

        if prev < self.oversold && current >= self.oversold && cell.position() == 0 {
            let quantity = lot_sizing(cell.cash(), bar.close, self.sizing);
            if quantity >= 100 {
                cell.buy(bar.close, quantity, OrderType::Limit);
                cell.log(&format!("rsi oversold rebound entry: rsi={current:.2}"));
            }
        } else if prev > self.overbought && current <= self.overbought && cell.position() > 0 {
            let quantity = cell.position();
            cell.sell(bar.close, quantity, OrderType::Limit);
            cell.log(&format!("rsi overbought fade exit: rsi={current:.2}"));
        }
    }

    fn set_param(&mut self, key: &str, value: f64) -> bool {
        match key {
            "period" => self.period = value as usize,
            "oversold" => self.oversold = value,
            "overbought" => self.overbought = value,
            "sizing" => self.sizing = value,
            _ => return false,
        }
        true
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("period".to_string(), self.period as f64),
            ("oversold".to_string(), self.oversold),
            ("overbought".to_string(), self.overbought),
            ("sizing".to_string(), self.sizing),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, close: f64) -> Bar {
        let ts = NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .checked_add_days(chrono::Days::new(day as u64))
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Bar::new(ts, close, close, close, close, 1_000.0)
    }

    #[test]
    fn buys_the_rebound_out_of_oversold() {
        let mut cell = StrategyCell::default();
        cell.set_capital(1_000_000.0);
        let mut strategy = RsiStrategy::default();

        // Steady decline pins RSI at 0, then a sharp rebound lifts it back
        // through the oversold threshold.
        let mut day = 0;
        for _ in 0..20 {
            let b = bar(day, 20.0 - day as f64 * 0.2);
            cell.push_bar("000001", b.clone());
            strategy.on_bar(&mut cell, &b);
            day += 1;
        }
        assert!(cell.orders().is_empty());

        let b = bar(day, 25.0);
        cell.push_bar("000001", b.clone());
        strategy.on_bar(&mut cell, &b);
        assert_eq!(cell.orders().len(), 1);
        assert_eq!(cell.orders()[0].side, qb_schemas::Side::Buy);
    }
}
