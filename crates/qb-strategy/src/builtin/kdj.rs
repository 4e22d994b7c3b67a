use crate::builtin::lot_sizing;
use crate::{Strategy, StrategyCell};
use qb_indicators::kdj;
use qb_schemas::{Bar, OrderType};
use std::collections::BTreeMap;

/// KDJ strategy: K/D golden cross in the oversold zone enters, death cross
/// in the overbought zone exits.
pub struct KdjStrategy {
    pub n: usize,
    pub m1: usize,
    pub m2: usize,
    pub oversold: f64,
    pub overbought: f64,
    pub sizing: f64,
}

impl Default for KdjStrategy {
    fn default() -> Self {
        Self {
            n: 9,
            m1: 3,
            m2: 3,
            oversold: 20.0,
            overbought: 80.0,
            sizing: 0.9,
        }
    }
}

impl Strategy for KdjStrategy {
    fn name(&self) -> &str {
        "kdj"
    }

    fn on_bar(&mut self, cell: &mut StrategyCell, bar: &Bar) {
        let bars = cell.bar_window(self.n + 10);
        if bars.len() < self.n + 2 {
            return;
        }

        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let out = kdj(&highs, &lows, &closes, self.n, self.m1, self.m2);

        let last = closes.len() - 1;
        let (k, d, j) = (out.k[last], out.d[last], out.j[last]);
        let (prev_k, prev_d) = (out.k[last - 1], out.d[last - 1]);
        if j.is_nan() {
            return;
        }

        if j < self.oversold && prev_k <= prev_d && k > d && cell.position() == 0 {
            let quantity = lot_sizing(cell.cash(), bar.close, self.sizing);
            if quantity >= 100 {
                cell.buy(bar.close, quantity, OrderType::Limit);
                cell.log(&format!("kdj oversold entry: k={k:.2} d={d:.2} j={j:.2}"));
            }
        } else if j > self.overbought && prev_k >= prev_d && k < d && cell.position() > 0 {
            let quantity = cell.position();
            cell.sell(bar.close, quantity, OrderType::Limit);
            cell.log(&format!("kdj overbought exit: k={k:.2} d={d:.2} j={j:.2}"));
        }
    }

    fn set_param(&mut self, key: &str, value: f64) -> bool {
        match key {
            "n" => self.n = value as usize,
            "m1" => self.m1 = value as usize,
            "m2" => self.m2 = value as usize,
            "oversold" => self.oversold = value,
            "overbought" => self.overbought = value,
            "sizing" => self.sizing = value,
            _ => return false,
        }
        true
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("n".to_string(), self.n as f64),
            ("m1".to_string(), self.m1 as f64),
            ("m2".to_string(), self.m2 as f64),
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

    #[test]
    fn short_history_stays_quiet() {
        let mut cell = StrategyCell::default();
        cell.set_capital(1_000_000.0);
        let mut strategy = KdjStrategy::default();

        for day in 0..10 {
            let ts = NaiveDate::from_ymd_opt(2023, 1, 1)
                .unwrap()
                .checked_add_days(chrono::Days::new(day))
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            let close = 10.0 - day as f64 * 0.1;
            let b = Bar::new(ts, close + 0.1, close + 0.2, close - 0.2, close, 1_000.0);
            cell.push_bar("000001", b.clone());
            strategy.on_bar(&mut cell, &b);
        }
        assert!(cell.orders().is_empty());
    }
}
