//! Broker abstraction: the [`BrokerTrader`] contract, an in-process
//! simulated matcher with T+1 settlement, the REST gateway adapter base
//! with its five endpoint specializations, and the [`TradingEngine`]
//! supervisor the runtime trades through.

mod engine;
mod factory;
pub mod rest;
mod sim;
mod trader;
mod types;

pub use engine::TradingEngine;
pub use factory::make_broker;
pub use rest::{RestBroker, RestEndpoints};
pub use sim::SimulatedBroker;
pub use trader::BrokerTrader;
pub use types::{
    BrokerConfig, BrokerError, BrokerEvent, BrokerEventSender, BrokerType, OrderResult, SignMethod,
};
