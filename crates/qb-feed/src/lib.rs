//! Market-data fanout.
//!
//! [`MarketHub`] sits between source adapters and strategies: sources push
//! ticks/klines/snapshots in through the downward `on_*` surface, the hub
//! caches latest values and fans each event out to global and per-code
//! subscribers with at-most-one delivery per update.
//!
//! Three sources ship with the crate: [`SimulatedFeed`] (random walk over a
//! built-in quote table), [`CsvReplayFeed`] (paced file playback) and
//! [`HttpPollingFeed`] (fixed-period poll over a [`QuoteProvider`]).

mod hub;
mod polling;
mod replay;
mod sim;
mod source;

pub use hub::{
    CallbackId, KlineCallback, KlineEvent, MarketHub, SnapshotCallback, TickCallback,
    KLINE_CACHE_CAP,
};
pub use polling::{HttpPollingFeed, JsonQuoteProvider, QuoteProvider};
pub use replay::CsvReplayFeed;
pub use sim::SimulatedFeed;
pub use source::{FeedError, FeedSource, WORKER_STOP_TIMEOUT};
