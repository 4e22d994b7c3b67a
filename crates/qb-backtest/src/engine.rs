use crate::types::{BacktestError, BacktestResult};
use chrono::NaiveDateTime;
use qb_schemas::matcher::{try_fill, CostModel, FillQuote};
use qb_schemas::{Bar, Order, OrderStatus, Side, Trade};
use qb_strategy::{Strategy, StrategyCell, StrategySlot};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Deterministic daily replay over a fixed set of codes.
///
/// Per union date, per code with a bar on that date: pending orders are
/// matched against the bar first, then the bar is delivered to the
/// strategy; equity is sampled once per date after all codes. Fills use the
/// shared matcher, so commissions, slippage and SELL stamp duty behave
/// exactly as in the simulated broker.
pub struct BacktestEngine {
    strategy: Option<Box<dyn Strategy>>,
    data: BTreeMap<String, BTreeMap<NaiveDateTime, Bar>>,
    initial_capital: f64,
    commission_rate: f64,
    slippage: f64,
    trade_counter: u64,
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BacktestEngine {
    pub fn new() -> Self {
        Self {
            strategy: None,
            data: BTreeMap::new(),
            initial_capital: 1_000_000.0,
            commission_rate: 0.0003,
            slippage: 0.001,
            trade_counter: 0,
        }
    }

    pub fn set_strategy(&mut self, strategy: Box<dyn Strategy>) {
        self.strategy = Some(strategy);
    }

    pub fn set_capital(&mut self, capital: f64) {
        self.initial_capital = capital;
    }

    pub fn set_commission(&mut self, rate: f64) {
        self.commission_rate = rate;
    }

    pub fn set_slippage(&mut self, slippage: f64) {
        self.slippage = slippage;
    }

    /// Load one code's bar series. Bars are indexed by timestamp; a
    /// duplicate timestamp keeps the last bar, matching a sorted,
    /// deduplicated input.
    pub fn add_data(&mut self, code: impl Into<String>, bars: Vec<Bar>) -> Result<(), BacktestError> {
        let code = code.into();
        if bars.is_empty() {
            return Err(BacktestError::EmptySeries { code });
        }
        let series: BTreeMap<NaiveDateTime, Bar> =
            bars.into_iter().map(|bar| (bar.ts, bar)).collect();
        self.data.insert(code, series);
        Ok(())
    }

    /// Run the replay and produce the aggregated report.
    pub fn run(&mut self) -> Result<BacktestResult, BacktestError> {
        let strategy = self.strategy.take().ok_or(BacktestError::NoStrategy)?;
        if self.data.is_empty() {
            return Err(BacktestError::NoData);
        }

        let mut cell = StrategyCell::default();
        cell.set_capital(self.initial_capital);
        let mut slot = StrategySlot::new(strategy, cell);
        slot.start();

        let all_dates: BTreeSet<NaiveDateTime> = self
            .data
            .values()
            .flat_map(|series| series.keys().copied())
            .collect();

        let mut equity_curve = vec![self.initial_capital];
        let costs = CostModel::new(self.commission_rate, self.slippage);

        for date in &all_dates {
            for (code, series) in &self.data {
                let Some(bar) = series.get(date) else { continue };

                // Match first, then deliver: an order placed on this bar
                // can only fill from the next bar onward.
                Self::match_pending(&mut self.trade_counter, &mut slot, code, bar, &costs);
                slot.deliver_bar(code, bar);
            }
            equity_curve.push(slot.cell.total_value());
        }

        slot.stop();

        let dates: Vec<NaiveDateTime> = all_dates.into_iter().collect();
        let trades = slot.cell.trades().to_vec();
        debug!(trades = trades.len(), dates = dates.len(), "backtest replay complete");
        Ok(compute_result(
            self.initial_capital,
            equity_curve,
            dates,
            trades,
        ))
    }

    fn match_pending(
        trade_counter: &mut u64,
        slot: &mut StrategySlot,
        code: &str,
        bar: &Bar,
        costs: &CostModel,
    ) {
        let pending: Vec<Order> = slot
            .cell
            .orders()
            .iter()
            .filter(|o| o.code == code && o.status == OrderStatus::Submitted)
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }

        let quote = FillQuote::from_bar(bar);
        for order in pending {
            if let Some(outcome) = try_fill(&order, &quote, costs) {
                *trade_counter += 1;
                let trade = Trade {
                    trade_id: format!("T{:08}", trade_counter),
                    order_id: order.order_id.clone(),
                    code: code.to_string(),
                    side: order.side,
                    price: outcome.price,
                    quantity: order.quantity,
                    commission: outcome.commission,
                    trade_time: bar.ts,
                };
                slot.deliver_fill(&trade);
            }
        }
    }
}

/// Fold the equity curve and trade list into the report.
fn compute_result(
    initial_capital: f64,
    equity_curve: Vec<f64>,
    dates: Vec<NaiveDateTime>,
    trades: Vec<Trade>,
) -> BacktestResult {
    let mut result = BacktestResult {
        initial_capital: equity_curve.first().copied().unwrap_or(initial_capital),
        final_capital: equity_curve.last().copied().unwrap_or(initial_capital),
        ..BacktestResult::default()
    };

    if let (Some(first), Some(last)) = (dates.first(), dates.last()) {
        result.start_date = first.format("%Y-%m-%d").to_string();
        result.end_date = last.format("%Y-%m-%d").to_string();
    }

    if result.initial_capital > 0.0 {
        result.total_return = (result.final_capital / result.initial_capital - 1.0) * 100.0;
    }

    // Annualized by calendar span, floored by the session count so a dense
    // series cannot inflate the exponent.
    if dates.len() > 1 && result.initial_capital > 0.0 && result.final_capital > 0.0 {
        let span_days = (dates[dates.len() - 1].date() - dates[0].date()).num_days();
        let delta_days = span_days.max(dates.len() as i64);
        if delta_days > 0 {
            let growth = result.final_capital / result.initial_capital;
            result.annual_return = (growth.powf(365.0 / delta_days as f64) - 1.0) * 100.0;
        }
    }

    if equity_curve.len() > 1 {
        let mut returns = Vec::with_capacity(equity_curve.len() - 1);
        for pair in equity_curve.windows(2) {
            let prev = pair[0];
            returns.push(if prev != 0.0 {
                (pair[1] - prev) / prev
            } else {
                0.0
            });
        }

        if returns.len() > 1 {
            let mean = returns.iter().sum::<f64>() / returns.len() as f64;
            let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>()
                / (returns.len() - 1) as f64;
            result.volatility = var.sqrt() * (252.0_f64).sqrt() * 100.0;
        }

        let mut running_max = f64::MIN;
        let mut max_drawdown = 0.0_f64;
        for &equity in &equity_curve {
            running_max = running_max.max(equity);
            let denom = if running_max == 0.0 { 1.0 } else { running_max };
            max_drawdown = max_drawdown.max((running_max - equity) / denom);
        }
        result.max_drawdown = max_drawdown * 100.0;
        result.daily_returns = returns;
    }

    if result.volatility > 0.0 {
        result.sharpe_ratio = (result.annual_return - 3.0) / result.volatility;
    }
    if result.max_drawdown > 0.0 {
        result.calmar_ratio = result.annual_return / result.max_drawdown;
    }

    // Round-trip profits: FIFO queue of BUY trades per code; each SELL
    // consumes the oldest BUY.
    let mut open_buys: BTreeMap<String, VecDeque<&Trade>> = BTreeMap::new();
    let mut round_trip_profits = Vec::new();
    for trade in &trades {
        match trade.side {
            Side::Buy => open_buys.entry(trade.code.clone()).or_default().push_back(trade),
            Side::Sell => {
                if let Some(buy) = open_buys.get_mut(&trade.code).and_then(VecDeque::pop_front) {
                    let profit = (trade.price - buy.price) * trade.quantity as f64
                        - trade.commission
                        - buy.commission;
                    round_trip_profits.push(profit);
                }
            }
        }
    }

    if !round_trip_profits.is_empty() {
        let wins: Vec<f64> = round_trip_profits.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = round_trip_profits.iter().copied().filter(|p| *p < 0.0).collect();

        result.win_trades = wins.len();
        result.loss_trades = losses.len();
        result.win_rate = wins.len() as f64 / round_trip_profits.len() as f64 * 100.0;
        if !wins.is_empty() {
            result.avg_profit = wins.iter().sum::<f64>() / wins.len() as f64;
            result.max_profit = wins.iter().copied().fold(f64::MIN, f64::max);
        }
        if !losses.is_empty() {
            result.avg_loss = losses.iter().sum::<f64>() / losses.len() as f64;
            result.max_loss = losses.iter().copied().fold(f64::MAX, f64::min);
        }
        if result.avg_loss != 0.0 {
            result.profit_loss_ratio = (result.avg_profit / result.avg_loss).abs();
        }
    }

    result.total_trades = trades.len();
    result.trades = trades;
    result.dates = dates;
    result.equity_curve = equity_curve;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use qb_schemas::OrderType;

    fn day(i: u64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .checked_add_days(chrono::Days::new(i))
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn flat_bars(n: u64, price: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar::new(day(i), price, price, price, price, 10_000.0))
            .collect()
    }

    /// Buys 100 shares at the first bar's close, sells them at the third.
    struct OneRoundTrip {
        bars_seen: usize,
    }

    impl Strategy for OneRoundTrip {
        fn name(&self) -> &str {
            "one_round_trip"
        }

        fn on_bar(&mut self, cell: &mut StrategyCell, bar: &Bar) {
            self.bars_seen += 1;
            if self.bars_seen == 1 {
                cell.buy(bar.close, 100, OrderType::Limit);
            } else if self.bars_seen == 3 && cell.position() > 0 {
                let qty = cell.position();
                cell.sell(bar.close, qty, OrderType::Limit);
            }
        }
    }

    #[test]
    fn run_requires_strategy_and_data() {
        let mut engine = BacktestEngine::new();
        assert_eq!(engine.run().unwrap_err(), BacktestError::NoStrategy);

        let mut engine = BacktestEngine::new();
        engine.set_strategy(Box::new(OneRoundTrip { bars_seen: 0 }));
        assert_eq!(engine.run().unwrap_err(), BacktestError::NoData);
    }

    #[test]
    fn add_data_rejects_empty_series() {
        let mut engine = BacktestEngine::new();
        let err = engine.add_data("000001", vec![]).unwrap_err();
        assert!(matches!(err, BacktestError::EmptySeries { .. }));
    }

    #[test]
    fn equity_curve_has_one_sample_per_date_plus_seed() {
        let mut engine = BacktestEngine::new();
        engine.set_strategy(Box::new(OneRoundTrip { bars_seen: 0 }));
        engine.add_data("000001", flat_bars(10, 10.0)).unwrap();
        let result = engine.run().unwrap();
        assert_eq!(result.equity_curve.len(), 11);
        assert!((result.equity_curve[0] - 1_000_000.0).abs() < 1e-6);
        assert_eq!(result.dates.len(), 10);
        assert_eq!(result.start_date, "2023-01-01");
        assert_eq!(result.end_date, "2023-01-10");
    }

    #[test]
    fn orders_fill_on_the_next_bar_not_the_same_one() {
        let mut engine = BacktestEngine::new();
        engine.set_commission(0.0);
        engine.set_slippage(0.0);
        engine.set_strategy(Box::new(OneRoundTrip { bars_seen: 0 }));
        engine.add_data("000001", flat_bars(4, 10.0)).unwrap();
        let result = engine.run().unwrap();

        // Buy placed on bar 1 fills against bar 2; sell placed on bar 3
        // fills against bar 4.
        assert_eq!(result.total_trades, 2);
        assert_eq!(result.trades[0].trade_time, day(1));
        assert_eq!(result.trades[1].trade_time, day(3));
    }

    #[test]
    fn round_trip_profit_nets_both_commissions() {
        let mut engine = BacktestEngine::new();
        engine.set_commission(0.001);
        engine.set_slippage(0.0);
        engine.set_strategy(Box::new(OneRoundTrip { bars_seen: 0 }));
        // Flat price: the round trip loses exactly the commissions + duty.
        engine.add_data("000001", flat_bars(5, 10.0)).unwrap();
        let result = engine.run().unwrap();

        assert_eq!(result.win_trades, 0);
        assert_eq!(result.loss_trades, 1);
        // buy fee 1.0, sell fee 1.0 + stamp duty 1.0
        assert!((result.avg_loss + 3.0).abs() < 1e-6);
        assert!((result.win_rate - 0.0).abs() < 1e-9);
    }

    #[test]
    fn sell_stamp_duty_is_charged() {
        let mut engine = BacktestEngine::new();
        engine.set_commission(0.0);
        engine.set_slippage(0.0);
        engine.set_strategy(Box::new(OneRoundTrip { bars_seen: 0 }));
        engine.add_data("000001", flat_bars(5, 10.0)).unwrap();
        let result = engine.run().unwrap();

        let sell = result
            .trades
            .iter()
            .find(|t| t.side == Side::Sell)
            .unwrap();
        // 0.1% of 100 * 10.0
        assert!((sell.commission - 1.0).abs() < 1e-9);
        let buy = result.trades.iter().find(|t| t.side == Side::Buy).unwrap();
        assert!((buy.commission - 0.0).abs() < 1e-9);
    }

    #[test]
    fn multi_code_replay_uses_the_union_of_dates() {
        struct Passive;
        impl Strategy for Passive {
            fn name(&self) -> &str {
                "passive"
            }
            fn on_bar(&mut self, _cell: &mut StrategyCell, _bar: &Bar) {}
        }

        let mut engine = BacktestEngine::new();
        engine.set_strategy(Box::new(Passive));
        engine.add_data("000001", flat_bars(5, 10.0)).unwrap();
        // Second code trades on later dates only.
        let later: Vec<Bar> = (3..8)
            .map(|i| Bar::new(day(i), 8.0, 8.0, 8.0, 8.0, 1_000.0))
            .collect();
        engine.add_data("000002", later).unwrap();

        let result = engine.run().unwrap();
        assert_eq!(result.dates.len(), 8);
        assert_eq!(result.equity_curve.len(), 9);
    }

    #[test]
    fn flat_equity_has_zero_drawdown_and_volatility() {
        struct Passive;
        impl Strategy for Passive {
            fn name(&self) -> &str {
                "passive"
            }
            fn on_bar(&mut self, _cell: &mut StrategyCell, _bar: &Bar) {}
        }

        let mut engine = BacktestEngine::new();
        engine.set_strategy(Box::new(Passive));
        engine.add_data("000001", flat_bars(10, 10.0)).unwrap();
        let result = engine.run().unwrap();

        assert!((result.max_drawdown - 0.0).abs() < 1e-9);
        assert!((result.volatility - 0.0).abs() < 1e-9);
        assert!((result.sharpe_ratio - 0.0).abs() < 1e-9);
        assert!((result.calmar_ratio - 0.0).abs() < 1e-9);
        assert!((result.total_return - 0.0).abs() < 1e-9);
    }
}
