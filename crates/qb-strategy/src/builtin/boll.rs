use crate::builtin::lot_sizing;
use crate::{Strategy, StrategyCell};
use qb_indicators::boll;
use qb_schemas::{Bar, OrderType};
use std::collections::BTreeMap;

/// Bollinger band mean reversion: buy a touch of the lower band, sell a
/// touch of the upper band.
pub struct BollStrategy {
    pub period: usize,
    pub std_dev: f64,
    pub sizing: f64,
}

impl Default for BollStrategy {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev: 2.0,
            sizing: 0.9,
        }
    }
}

impl Strategy for BollStrategy {
    fn name(&self) -> &str {
        "boll"
    }

    fn on_bar(&mut self, cell: &mut StrategyCell, bar: &Bar) {
        let closes = cell.close_series(self.period + 5);
        if closes.len() < self.period {
            return;
        }

        let bands = boll(&closes, self.period, self.std_dev);
        let last = closes.len() - 1;
        let (upper, lower) = (bands.upper[last], bands.lower[last]);
        if upper.is_nan() || lower.is_nan() {
            return;
        }

        if bar.close <= lower && cell.position() == 0 {
            let quantity = lot_sizing(cell.cash(), bar.close, self.sizing);
            if quantity >= 100 {
                cell.buy(bar.close, quantity, OrderType::Limit);
                cell.log(&format!(
                    "boll lower-band entry: price={:.2} lower={lower:.2}",
                    bar.close
                ));
            }
        } else if bar.close >= upper && cell.position() > 0 {
            let quantity = cell.position();
            cell.sell(bar.close, quantity, OrderType::Limit);
            cell.log(&format!(
                "boll upper-band exit: price={:.2} upper={upper:.2}",
                bar.close
            ));
        }
    }

    fn set_param(&mut self, key: &str, value: f64) -> bool {
        match key {
            "period" => self.period = value as usize,
            "std_dev" => self.std_dev = value,
            "sizing" => self.sizing = value,
            _ => return false,
        }
        true
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("period".to_string(), self.period as f64),
            ("std_dev".to_string(), self.std_dev),
            ("sizing".to_string(), self.sizing),
        ])
    }
}
