//! Strategy abstraction.
//!
//! A [`Strategy`] is user logic reacting to bars; a [`StrategyCell`] is the
//! account it acts through (cash, positions, bounded bar history, and the
//! `buy`/`sell`/`cancel` capability surface). [`StrategySlot`] binds the
//! two so the backtest engine and the live runtime deliver events the same
//! way. Strategies are statically linked and discovered through
//! [`StrategyRegistry`]; the built-in library lives in [`builtin`].

pub mod builtin;
mod cell;
mod registry;

use qb_schemas::{Bar, Order, Trade};
use std::collections::BTreeMap;

pub use cell::{LogSink, StrategyCell, BAR_HISTORY_CAP};
pub use registry::{default_registry, RegistryError, StrategyFactory, StrategyInfo, StrategyRegistry};

/// User-written trading logic. `on_bar` is required; the remaining hooks
/// default to no-ops. Parameters are exposed as a flat `name -> f64` map
/// mutated before the session starts.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn on_bar(&mut self, cell: &mut StrategyCell, bar: &Bar);

    fn on_trade(&mut self, _cell: &mut StrategyCell, _trade: &Trade) {}

    fn on_order(&mut self, _cell: &mut StrategyCell, _order: &Order) {}

    fn on_start(&mut self, _cell: &mut StrategyCell) {}

    fn on_stop(&mut self, _cell: &mut StrategyCell) {}

    /// Set a named parameter. Returns whether the name was recognized.
    fn set_param(&mut self, _key: &str, _value: f64) -> bool {
        false
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

impl std::fmt::Debug for dyn Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn Strategy({:?})", self.name())
    }
}

/// One strategy bound to its account cell.
pub struct StrategySlot {
    pub cell: StrategyCell,
    strategy: Box<dyn Strategy>,
}

impl StrategySlot {
    pub fn new(strategy: Box<dyn Strategy>, cell: StrategyCell) -> Self {
        Self { cell, strategy }
    }

    pub fn strategy_name(&self) -> String {
        self.strategy.name().to_string()
    }

    pub fn start(&mut self) {
        self.strategy.on_start(&mut self.cell);
    }

    pub fn stop(&mut self) {
        self.strategy.on_stop(&mut self.cell);
    }

    /// Push one bar into the cell's history, then run the user callback.
    pub fn deliver_bar(&mut self, code: &str, bar: &Bar) {
        self.cell.push_bar(code, bar.clone());
        self.strategy.on_bar(&mut self.cell, bar);
    }

    /// Apply a fill to the cell, then run the user trade callback.
    pub fn deliver_fill(&mut self, trade: &Trade) {
        if self.cell.apply_fill(trade) {
            self.strategy.on_trade(&mut self.cell, trade);
        }
    }

    /// Mirror a broker-side status change, then run the user order callback.
    pub fn deliver_order_update(&mut self, order: &Order) {
        self.cell.sync_order(order);
        self.strategy.on_order(&mut self.cell, order);
    }

    pub fn set_param(&mut self, key: &str, value: f64) -> bool {
        self.strategy.set_param(key, value)
    }
}
