use crate::builtin::lot_sizing;
use crate::{Strategy, StrategyCell};
use qb_indicators::macd;
use qb_schemas::{Bar, OrderType};
use std::collections::BTreeMap;

/// MACD cross strategy: DIF crossing above DEA enters, crossing below
/// exits.
pub struct MacdStrategy {
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
    pub sizing: f64,
}

impl Default for MacdStrategy {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
            sizing: 0.9,
        }
    }
}

impl Strategy for MacdStrategy {
    fn name(&self) -> &str {
        "macd"
    }

    fn on_bar(&mut self, cell: &mut StrategyCell, bar: &Bar) {
        let closes = cell.close_series(self.slow_period + self.signal_period + 10);
        if closes.len() < self.slow_period + self.signal_period {
            return;
        }

        let out = macd(
            &closes,
            self.fast_period,
            self.slow_period,
            self.signal_period,
        );
        let last = closes.len() - 1;
        let (dif, dea) = (out.dif[last], out.dea[last]);
        let (prev_dif, prev_dea) = (out.dif[last - 1], out.dea[last - 1]);
        if dif.is_nan() || dea.is_nan() || prev_dif.is_nan() || prev_dea.is_nan() {
            return;
        }

        if prev_dif <= prev_dea && dif > dea && cell.position() == 0 {
            let quantity = lot_sizing(cell.cash(), bar.close, self.sizing);
            if quantity >= 100 {
                cell.buy(bar.close, quantity, OrderType::Limit);
                cell.log(&format!("macd golden cross: dif={dif:.4} dea={dea:.4}"));
            }
        } else if prev_dif >= prev_dea && dif < dea && cell.position() > 0 {
            let quantity = cell.position();
            cell.sell(bar.close, quantity, OrderType::Limit);
            cell.log(&format!("macd death cross: dif={dif:.4} dea={dea:.4}"));
        }
    }

    fn set_param(&mut self, key: &str, value: f64) -> bool {
        match key {
            "fast_period" => self.fast_period = value as usize,
            "slow_period" => self.slow_period = value as usize,
            "signal_period" => self.signal_period = value as usize,
            "sizing" => self.sizing = value,
            _ => return false,
        }
        true
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("fast_period".to_string(), self.fast_period as f64),
            ("slow_period".to_string(), self.slow_period as f64),
            ("signal_period".to_string(), self.signal_period as f64),
            ("sizing".to_string(), self.sizing),
        ])
    }
}
