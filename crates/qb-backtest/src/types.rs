use chrono::NaiveDateTime;
use qb_schemas::Trade;
use std::fmt;

/// Backtest failure modes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BacktestError {
    /// `run` was called before `set_strategy`.
    NoStrategy,
    /// `run` was called with no bar series loaded.
    NoData,
    /// `add_data` was handed an empty series.
    EmptySeries { code: String },
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestError::NoStrategy => write!(f, "no strategy registered"),
            BacktestError::NoData => write!(f, "no bar data loaded"),
            BacktestError::EmptySeries { code } => {
                write!(f, "empty bar series for code '{code}'")
            }
        }
    }
}

impl std::error::Error for BacktestError {}

/// Aggregated backtest output. Percent-valued fields (`total_return`,
/// `annual_return`, `max_drawdown`, `volatility`, `win_rate`) are
/// percentages; ratios are unitless.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BacktestResult {
    pub start_date: String,
    pub end_date: String,
    pub initial_capital: f64,
    pub final_capital: f64,

    pub total_return: f64,
    pub annual_return: f64,

    pub max_drawdown: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub calmar_ratio: f64,

    pub total_trades: usize,
    pub win_trades: usize,
    pub loss_trades: usize,
    pub win_rate: f64,
    pub profit_loss_ratio: f64,
    pub avg_profit: f64,
    pub avg_loss: f64,
    pub max_profit: f64,
    pub max_loss: f64,

    /// Initial capital followed by one sample per union date.
    pub equity_curve: Vec<f64>,
    /// Simple returns between consecutive equity samples.
    pub daily_returns: Vec<f64>,
    /// The union date axis the curve is aligned to.
    pub dates: Vec<NaiveDateTime>,
    pub trades: Vec<Trade>,
}
