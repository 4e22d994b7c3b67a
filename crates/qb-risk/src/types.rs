use chrono::NaiveDateTime;

/// Alert severity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// One risk event. `code` is empty for account-level alerts.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskAlert {
    pub level: RiskLevel,
    pub code: String,
    pub message: String,
    pub timestamp: NaiveDateTime,
}

/// Hard limits the gate enforces. Percent fields are percentages
/// (`30.0` = 30%).
#[derive(Clone, Debug, PartialEq)]
pub struct RiskConfig {
    /// Cap on a single code's share of total value.
    pub max_position_pct: f64,
    /// Cap on the sum of all positions' share of total value.
    pub max_total_position_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
    /// Session hard stop.
    pub max_drawdown_pct: f64,
    pub max_daily_trades: u32,
    pub max_daily_loss: f64,
    pub min_trade_interval_secs: u64,
    pub max_price_deviation: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_pct: 30.0,
            max_total_position_pct: 80.0,
            stop_loss_pct: 5.0,
            take_profit_pct: 10.0,
            trailing_stop_pct: 0.0,
            max_drawdown_pct: 20.0,
            max_daily_trades: 50,
            max_daily_loss: 50_000.0,
            min_trade_interval_secs: 60,
            max_price_deviation: 3.0,
        }
    }
}

/// Point-in-time view of the gate for dashboards and the runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskSummary {
    pub drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    pub position_pct: f64,
    pub max_total_position_pct: f64,
    pub daily_trades: u32,
    pub max_daily_trades: u32,
    pub daily_loss: f64,
    pub max_daily_loss: f64,
    pub stop_loss_count: usize,
    pub take_profit_count: usize,
    pub trading_allowed: bool,
    pub alert_count: usize,
}
