//! Risk gate: pre-trade policy checks, post-trade accumulators,
//! drawdown/daily-loss cut-outs and the append-only alert journal.

mod gate;
mod journal;
mod types;

pub use gate::{AlertHook, RiskGate, StopTradingHook};
pub use journal::Journal;
pub use types::{RiskAlert, RiskConfig, RiskLevel, RiskSummary};
