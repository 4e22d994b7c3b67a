use crate::journal::Journal;
use crate::types::{RiskAlert, RiskConfig, RiskLevel, RiskSummary};
use qb_schemas::{Clock, Order, Position, Side, SystemClock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub type AlertHook = Arc<dyn Fn(&RiskAlert) + Send + Sync>;
pub type StopTradingHook = Arc<dyn Fn(&str) + Send + Sync>;

struct GateState {
    peak_value: f64,
    daily_trades: u32,
    daily_loss: f64,
    last_trade_time: Option<chrono::NaiveDateTime>,
    trading_allowed: bool,
    alerts: Vec<RiskAlert>,
    journal_warned: bool,
}

impl GateState {
    fn new() -> Self {
        Self {
            peak_value: 0.0,
            daily_trades: 0,
            daily_loss: 0.0,
            last_trade_time: None,
            trading_allowed: true,
            alerts: Vec::new(),
            journal_warned: false,
        }
    }
}

/// Pre- and post-trade policy enforcer.
///
/// `check_order` answers `(allowed, reason)` and never panics; breaches of
/// the drawdown or daily-loss caps emit a CRITICAL alert, latch
/// `trading_allowed = false` and invoke the stop-trading hook. Position
/// monitoring is advisory only.
///
/// The gate's own mutex guards every counter; hooks run after the lock is
/// released, and callers must not hold their own locks while calling in.
pub struct RiskGate {
    config: RiskConfig,
    clock: Arc<dyn Clock>,
    journal: Option<Journal>,
    state: Mutex<GateState>,
    on_alert: Mutex<Option<AlertHook>>,
    on_stop_trading: Mutex<Option<StopTradingHook>>,
}

impl RiskGate {
    pub fn new(config: RiskConfig, journal_path: Option<PathBuf>) -> Self {
        Self::with_clock(config, journal_path, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RiskConfig,
        journal_path: Option<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            clock,
            journal: journal_path.map(Journal::new),
            state: Mutex::new(GateState::new()),
            on_alert: Mutex::new(None),
            on_stop_trading: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn set_alert_hook(&self, hook: AlertHook) {
        *self.on_alert.lock().expect("risk hook lock poisoned") = Some(hook);
    }

    pub fn set_stop_trading_hook(&self, hook: StopTradingHook) {
        *self.on_stop_trading.lock().expect("risk hook lock poisoned") = Some(hook);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().expect("risk state lock poisoned")
    }

    // ------------------------------------------------------------------
    // Pre-trade
    // ------------------------------------------------------------------

    /// Evaluate an order against the gate. Returns `(allowed, reason)`;
    /// the reason is empty when allowed.
    pub fn check_order(
        &self,
        order: &Order,
        positions: &BTreeMap<String, Position>,
        cash: f64,
        total_value: f64,
        current_price: f64,
    ) -> (bool, String) {
        let mut pending_alert: Option<RiskAlert> = None;

        let verdict = {
            let state = self.lock_state();

            if !state.trading_allowed {
                Some("trading paused by risk control".to_string())
            } else if state.daily_trades >= self.config.max_daily_trades {
                pending_alert = Some(self.alert_at(
                    RiskLevel::High,
                    &order.code,
                    "daily trade count limit reached".to_string(),
                ));
                Some("daily trade count limit reached".to_string())
            } else if let Some(last) = state.last_trade_time {
                let elapsed = (self.clock.now() - last).num_seconds();
                if elapsed >= 0 && (elapsed as u64) < self.config.min_trade_interval_secs {
                    let remaining = self.config.min_trade_interval_secs - elapsed as u64;
                    Some(format!("trade interval too short, wait {remaining}s"))
                } else {
                    None
                }
            } else {
                None
            }
        };
        if let Some(reason) = verdict {
            self.publish(pending_alert);
            return (false, reason);
        }

        // Price deviation: exactly at the limit passes, strictly greater is
        // rejected.
        if current_price > 0.0 {
            let deviation = (order.price - current_price).abs() / current_price * 100.0;
            if deviation > self.config.max_price_deviation {
                let message = format!("order price deviates {deviation:.2}% from market");
                self.publish(Some(self.alert_at(
                    RiskLevel::Medium,
                    &order.code,
                    message.clone(),
                )));
                return (false, message);
            }
        }

        if order.side == Side::Buy {
            let order_value = order.price * order.quantity as f64;
            if order_value > cash {
                return (false, "insufficient cash".to_string());
            }

            if total_value > 0.0 {
                let existing_value = positions
                    .get(&order.code)
                    .map(Position::market_value)
                    .unwrap_or(0.0);
                let new_position_pct = (existing_value + order_value) / total_value * 100.0;
                if new_position_pct > self.config.max_position_pct {
                    let message = format!(
                        "single position would exceed {}%",
                        self.config.max_position_pct
                    );
                    self.publish(Some(self.alert_at(
                        RiskLevel::Medium,
                        &order.code,
                        message.clone(),
                    )));
                    return (false, message);
                }

                let total_position_value: f64 =
                    positions.values().map(Position::market_value).sum();
                let new_total_pct = (total_position_value + order_value) / total_value * 100.0;
                if new_total_pct > self.config.max_total_position_pct {
                    let message = format!(
                        "total position would exceed {}%",
                        self.config.max_total_position_pct
                    );
                    self.publish(Some(self.alert_at(
                        RiskLevel::Medium,
                        &order.code,
                        message.clone(),
                    )));
                    return (false, message);
                }
            }
        }

        (true, String::new())
    }

    // ------------------------------------------------------------------
    // Post-trade accounting
    // ------------------------------------------------------------------

    /// Count a completed trade against the daily throttles.
    pub fn on_trade_completed(&self) {
        let mut state = self.lock_state();
        state.daily_trades += 1;
        state.last_trade_time = Some(self.clock.now());
    }

    /// Raise the session peak; never lowers it.
    pub fn update_peak_value(&self, total_value: f64) {
        let mut state = self.lock_state();
        if total_value > state.peak_value {
            state.peak_value = total_value;
        }
    }

    pub fn peak_value(&self) -> f64 {
        self.lock_state().peak_value
    }

    /// Check drawdown against the session peak. Returns whether the cap was
    /// breached; a breach latches `trading_allowed = false`.
    pub fn check_drawdown(&self, total_value: f64) -> bool {
        let breach = {
            let state = self.lock_state();
            if state.peak_value <= 0.0 {
                return false;
            }
            let drawdown = (state.peak_value - total_value) / state.peak_value * 100.0;
            if drawdown >= self.config.max_drawdown_pct {
                Some(drawdown)
            } else {
                None
            }
        };

        match breach {
            Some(drawdown) => {
                let message = format!("max drawdown limit hit: {drawdown:.2}%");
                self.cut_out(message);
                true
            }
            None => false,
        }
    }

    /// Accumulate a realized loss; positive `loss` means money lost.
    /// Returns whether the daily-loss cap was breached.
    pub fn check_daily_loss(&self, loss: f64) -> bool {
        let breach = {
            let mut state = self.lock_state();
            state.daily_loss += loss;
            if state.daily_loss >= self.config.max_daily_loss {
                Some(state.daily_loss)
            } else {
                None
            }
        };

        match breach {
            Some(total_loss) => {
                let message = format!("daily loss limit hit: {total_loss:.2}");
                self.cut_out(message);
                true
            }
            None => false,
        }
    }

    fn cut_out(&self, message: String) {
        self.lock_state().trading_allowed = false;
        self.publish(Some(self.alert_at(RiskLevel::Critical, "", message.clone())));
        let hook = self
            .on_stop_trading
            .lock()
            .expect("risk hook lock poisoned")
            .clone();
        if let Some(hook) = hook {
            hook(&message);
        }
    }

    // ------------------------------------------------------------------
    // Advisory position monitoring
    // ------------------------------------------------------------------

    /// Emit stop-loss / take-profit advisories for one position. The gate
    /// never closes positions itself.
    pub fn check_position(&self, position: &Position) -> Vec<RiskAlert> {
        if position.quantity <= 0 {
            return Vec::new();
        }

        let profit_pct = position.profit_pct();
        let alert = if profit_pct <= -self.config.stop_loss_pct {
            Some(self.alert_at(
                RiskLevel::High,
                &position.code,
                format!("stop loss triggered: down {:.2}%", profit_pct.abs()),
            ))
        } else if profit_pct >= self.config.take_profit_pct {
            Some(self.alert_at(
                RiskLevel::Medium,
                &position.code,
                format!("take profit triggered: up {profit_pct:.2}%"),
            ))
        } else {
            None
        };

        match alert {
            Some(alert) => {
                self.publish(Some(alert.clone()));
                vec![alert]
            }
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle & queries
    // ------------------------------------------------------------------

    /// Zero the daily counters and re-enable trading.
    pub fn reset_daily(&self) {
        let mut state = self.lock_state();
        state.daily_trades = 0;
        state.daily_loss = 0.0;
        state.trading_allowed = true;
    }

    /// Wipe the in-memory alert buffer; the journal is untouched.
    pub fn clear_alerts(&self) {
        self.lock_state().alerts.clear();
    }

    pub fn trading_allowed(&self) -> bool {
        self.lock_state().trading_allowed
    }

    pub fn set_trading_allowed(&self, allowed: bool) {
        self.lock_state().trading_allowed = allowed;
    }

    pub fn alerts(&self, level: Option<RiskLevel>) -> Vec<RiskAlert> {
        let state = self.lock_state();
        match level {
            None => state.alerts.clone(),
            Some(level) => state
                .alerts
                .iter()
                .filter(|a| a.level == level)
                .cloned()
                .collect(),
        }
    }

    pub fn summary(
        &self,
        positions: &BTreeMap<String, Position>,
        total_value: f64,
    ) -> RiskSummary {
        let state = self.lock_state();

        let drawdown_pct = if state.peak_value > 0.0 {
            (state.peak_value - total_value) / state.peak_value * 100.0
        } else {
            0.0
        };

        let total_position: f64 = positions.values().map(Position::market_value).sum();
        let position_pct = if total_value > 0.0 {
            total_position / total_value * 100.0
        } else {
            0.0
        };

        let mut stop_loss_count = 0;
        let mut take_profit_count = 0;
        for pos in positions.values() {
            let pct = pos.profit_pct();
            if pct <= -self.config.stop_loss_pct {
                stop_loss_count += 1;
            } else if pct >= self.config.take_profit_pct {
                take_profit_count += 1;
            }
        }

        RiskSummary {
            drawdown_pct,
            max_drawdown_pct: self.config.max_drawdown_pct,
            position_pct,
            max_total_position_pct: self.config.max_total_position_pct,
            daily_trades: state.daily_trades,
            max_daily_trades: self.config.max_daily_trades,
            daily_loss: state.daily_loss,
            max_daily_loss: self.config.max_daily_loss,
            stop_loss_count,
            take_profit_count,
            trading_allowed: state.trading_allowed,
            alert_count: state.alerts.len(),
        }
    }

    // ------------------------------------------------------------------
    // Alert plumbing
    // ------------------------------------------------------------------

    fn alert_at(&self, level: RiskLevel, code: &str, message: String) -> RiskAlert {
        RiskAlert {
            level,
            code: code.to_string(),
            message,
            timestamp: self.clock.now(),
        }
    }

    /// Record, journal and broadcast an alert. No state lock may be held by
    /// the caller.
    fn publish(&self, alert: Option<RiskAlert>) {
        let Some(alert) = alert else { return };

        {
            let mut state = self.lock_state();
            state.alerts.push(alert.clone());
            if let Some(journal) = &self.journal {
                if let Err(e) = journal.append(&alert) {
                    if !state.journal_warned {
                        state.journal_warned = true;
                        warn!(path = %journal.path().display(), error = %e,
                              "risk journal unwritable, keeping alerts in memory only");
                    }
                }
            }
        }

        let hook = self.on_alert.lock().expect("risk hook lock poisoned").clone();
        if let Some(hook) = hook {
            hook(&alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use qb_schemas::{FixedClock, OrderType};

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::at(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            9,
            30,
            0,
        ))
    }

    fn gate_with(config: RiskConfig) -> (RiskGate, Arc<FixedClock>) {
        let clock = clock();
        let gate = RiskGate::with_clock(config, None, clock.clone());
        (gate, clock)
    }

    fn order(side: Side, price: f64, quantity: i64) -> Order {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 29, 0)
            .unwrap();
        let mut o = Order::new("O1", "000001", side, price, quantity, OrderType::Limit, ts);
        o.status = qb_schemas::OrderStatus::Submitted;
        o
    }

    #[test]
    fn allows_clean_buy() {
        let (gate, _) = gate_with(RiskConfig::default());
        let (allowed, reason) = gate.check_order(
            &order(Side::Buy, 10.0, 1000),
            &BTreeMap::new(),
            100_000.0,
            100_000.0,
            10.0,
        );
        assert!(allowed, "{reason}");
        assert!(reason.is_empty());
    }

    #[test]
    fn rejects_when_trading_paused() {
        let (gate, _) = gate_with(RiskConfig::default());
        gate.set_trading_allowed(false);
        let (allowed, reason) = gate.check_order(
            &order(Side::Buy, 10.0, 1000),
            &BTreeMap::new(),
            100_000.0,
            100_000.0,
            10.0,
        );
        assert!(!allowed);
        assert!(reason.contains("paused"));
    }

    #[test]
    fn rejects_after_daily_trade_limit() {
        let config = RiskConfig {
            max_daily_trades: 1,
            min_trade_interval_secs: 0,
            ..RiskConfig::default()
        };
        let (gate, _) = gate_with(config);
        gate.on_trade_completed();
        let (allowed, reason) = gate.check_order(
            &order(Side::Buy, 10.0, 100),
            &BTreeMap::new(),
            100_000.0,
            100_000.0,
            10.0,
        );
        assert!(!allowed);
        assert!(reason.contains("daily trade count"));
        assert_eq!(gate.alerts(Some(RiskLevel::High)).len(), 1);
    }

    #[test]
    fn enforces_min_trade_interval() {
        let (gate, clock) = gate_with(RiskConfig::default());
        gate.on_trade_completed();

        let (allowed, reason) = gate.check_order(
            &order(Side::Buy, 10.0, 100),
            &BTreeMap::new(),
            100_000.0,
            100_000.0,
            10.0,
        );
        assert!(!allowed);
        assert!(reason.contains("interval"));

        clock.advance(Duration::seconds(61));
        let (allowed, _) = gate.check_order(
            &order(Side::Buy, 10.0, 100),
            &BTreeMap::new(),
            100_000.0,
            100_000.0,
            10.0,
        );
        assert!(allowed);
    }

    #[test]
    fn price_deviation_at_limit_is_allowed_strictly_greater_rejected() {
        // 0.25/8 and the 3.125% limit are exact in binary, so "exactly at
        // the limit" really is equality.
        let config = RiskConfig {
            max_price_deviation: 3.125,
            ..RiskConfig::default()
        };
        let (gate, _) = gate_with(config);

        // Exactly 3.125% off market (8.25 vs 8.00): allowed.
        let (allowed, _) = gate.check_order(
            &order(Side::Buy, 8.25, 100),
            &BTreeMap::new(),
            100_000.0,
            100_000.0,
            8.0,
        );
        assert!(allowed);

        // Strictly over the limit: rejected.
        let (allowed, reason) = gate.check_order(
            &order(Side::Buy, 8.5, 100),
            &BTreeMap::new(),
            100_000.0,
            100_000.0,
            8.0,
        );
        assert!(!allowed);
        assert!(reason.contains("deviates"));
    }

    #[test]
    fn buy_rejected_without_cash() {
        let (gate, _) = gate_with(RiskConfig::default());
        let (allowed, reason) = gate.check_order(
            &order(Side::Buy, 10.0, 10_000),
            &BTreeMap::new(),
            50_000.0,
            50_000.0,
            10.0,
        );
        assert!(!allowed);
        assert!(reason.contains("cash"));
    }

    #[test]
    fn per_code_cap_counts_existing_exposure() {
        let (gate, _) = gate_with(RiskConfig::default());
        let mut positions = BTreeMap::new();
        let mut pos = Position::new("000001", 2000, 10.0);
        pos.current_price = 10.0;
        positions.insert("000001".to_string(), pos);

        // Existing 20k + new 15k = 35% of 100k > 30% cap.
        let (allowed, reason) = gate.check_order(
            &order(Side::Buy, 10.0, 1500),
            &positions,
            80_000.0,
            100_000.0,
            10.0,
        );
        assert!(!allowed);
        assert!(reason.contains("single position"));
    }

    #[test]
    fn total_cap_counts_all_positions() {
        let (gate, _) = gate_with(RiskConfig::default());
        let mut positions = BTreeMap::new();
        for (code, qty) in [("000002", 2500_i64), ("600000", 2500), ("600036", 2500)] {
            let mut pos = Position::new(code, qty, 10.0);
            pos.current_price = 10.0;
            positions.insert(code.to_string(), pos);
        }

        // Existing 75% + new 10% of total > 80% cap, single-code cap ok.
        let (allowed, reason) = gate.check_order(
            &order(Side::Buy, 10.0, 1000),
            &positions,
            25_000.0,
            100_000.0,
            10.0,
        );
        assert!(!allowed);
        assert!(reason.contains("total position"));
    }

    #[test]
    fn sells_skip_position_caps() {
        let (gate, _) = gate_with(RiskConfig::default());
        let (allowed, _) = gate.check_order(
            &order(Side::Sell, 10.0, 100_000),
            &BTreeMap::new(),
            0.0,
            100.0,
            10.0,
        );
        assert!(allowed);
    }

    #[test]
    fn peak_value_is_monotonic() {
        let (gate, _) = gate_with(RiskConfig::default());
        gate.update_peak_value(100_000.0);
        gate.update_peak_value(90_000.0);
        assert!((gate.peak_value() - 100_000.0).abs() < 1e-9);
        gate.update_peak_value(110_000.0);
        assert!((gate.peak_value() - 110_000.0).abs() < 1e-9);
    }

    #[test]
    fn daily_loss_cap_latches_trading_off() {
        let config = RiskConfig {
            max_daily_loss: 10_000.0,
            ..RiskConfig::default()
        };
        let (gate, _) = gate_with(config);
        assert!(!gate.check_daily_loss(4_000.0));
        assert!(gate.trading_allowed());
        assert!(gate.check_daily_loss(6_000.0));
        assert!(!gate.trading_allowed());
        assert_eq!(gate.alerts(Some(RiskLevel::Critical)).len(), 1);
    }

    #[test]
    fn position_advisories() {
        let (gate, _) = gate_with(RiskConfig::default());

        let mut losing = Position::new("000001", 1000, 10.0);
        losing.current_price = 9.4; // -6%
        let alerts = gate.check_position(&losing);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, RiskLevel::High);

        let mut winning = Position::new("000002", 1000, 10.0);
        winning.current_price = 11.1; // +11%
        let alerts = gate.check_position(&winning);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, RiskLevel::Medium);

        let mut calm = Position::new("600000", 1000, 10.0);
        calm.current_price = 10.2;
        assert!(gate.check_position(&calm).is_empty());
    }

    #[test]
    fn reset_daily_reenables_trading_and_keeps_alerts() {
        let config = RiskConfig {
            max_daily_loss: 1_000.0,
            ..RiskConfig::default()
        };
        let (gate, _) = gate_with(config);
        gate.check_daily_loss(2_000.0);
        assert!(!gate.trading_allowed());
        let alert_count = gate.alerts(None).len();

        gate.reset_daily();
        assert!(gate.trading_allowed());
        assert_eq!(gate.alerts(None).len(), alert_count);

        gate.clear_alerts();
        assert!(gate.alerts(None).is_empty());
    }

    #[test]
    fn summary_reports_counters() {
        let (gate, _) = gate_with(RiskConfig::default());
        gate.update_peak_value(100_000.0);
        gate.on_trade_completed();

        let mut positions = BTreeMap::new();
        let mut pos = Position::new("000001", 1000, 10.0);
        pos.current_price = 9.0; // -10%, counts as stop-loss breach
        positions.insert("000001".to_string(), pos);

        let summary = gate.summary(&positions, 90_000.0);
        assert!((summary.drawdown_pct - 10.0).abs() < 1e-9);
        assert!((summary.position_pct - 10.0).abs() < 1e-9);
        assert_eq!(summary.daily_trades, 1);
        assert_eq!(summary.stop_loss_count, 1);
        assert!(summary.trading_allowed);
    }
}
