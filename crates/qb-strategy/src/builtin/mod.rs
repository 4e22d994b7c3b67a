//! Built-in strategy library.
//!
//! Small, parameterized single-code strategies used by the backtest engine
//! and as live defaults. Each enters with 90% cash sizing rounded down to a
//! board lot and exits its full position.

mod boll;
mod dual_ma;
mod kdj;
mod macd;
mod rsi;

pub use boll::BollStrategy;
pub use dual_ma::DualMaStrategy;
pub use kdj::KdjStrategy;
pub use macd::MacdStrategy;
pub use rsi::RsiStrategy;

/// Shares affordable with `fraction` of `cash` at `price`, in whole lots.
pub(crate) fn lot_sizing(cash: f64, price: f64, fraction: f64) -> i64 {
    if price <= 0.0 {
        return 0;
    }
    ((cash * fraction / price / 100.0) as i64) * 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_rounds_down_to_lots() {
        assert_eq!(lot_sizing(1_000_000.0, 10.0, 0.9), 90_000);
        assert_eq!(lot_sizing(1_500.0, 10.0, 0.9), 100);
        assert_eq!(lot_sizing(900.0, 10.0, 0.9), 0);
        assert_eq!(lot_sizing(1_000.0, 0.0, 0.9), 0);
    }
}
