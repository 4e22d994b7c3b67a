//! Technical indicator library.
//!
//! Pure, stateless functions over numeric slices. Every function returns a
//! freshly allocated sequence aligned to its input; positions where the
//! lookback window is not yet satisfied hold `f64::NAN` ("undefined").
//! Inputs shorter than the window yield an all-NaN output of the same
//! length; nothing here panics on short input.
//!
//! Cross detectors ([`cross_over`] / [`cross_under`]) return `Vec<bool>` and
//! are only `true` where both the previous and current paired values are
//! defined and the crossing strictly occurred in the last step.

mod indicators;

pub use indicators::{
    atr, boll, cci, cross_over, cross_under, dmi, ema, kdj, ma, macd, obv, rsi, rsi_ema, vwap,
    wma, BollResult, DmiResult, KdjResult, MacdResult,
};
