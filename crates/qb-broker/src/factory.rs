use crate::rest::RestBroker;
use crate::sim::SimulatedBroker;
use crate::trader::BrokerTrader;
use crate::types::{BrokerConfig, BrokerError, BrokerType};
use std::sync::Arc;

/// Build the adapter matching `config.broker_type`.
///
/// REST brokers require account, password and (directly or via the
/// specialization default) a base URL; the simulator takes its capital and
/// cost parameters from the config.
pub fn make_broker(config: &BrokerConfig) -> Result<Arc<dyn BrokerTrader>, BrokerError> {
    match config.broker_type {
        BrokerType::Simulated => Ok(Arc::new(SimulatedBroker::new(config))),
        rest_type => {
            if config.account.is_empty() || config.password.is_empty() {
                return Err(BrokerError::Config(
                    "broker account and password are required".into(),
                ));
            }
            let config = config.clone();
            let broker = match rest_type {
                BrokerType::Huatai => RestBroker::huatai(config)?,
                BrokerType::Zhongxin => RestBroker::zhongxin(config)?,
                BrokerType::Guotaijunan => RestBroker::guotaijunan(config)?,
                BrokerType::Haitong => RestBroker::haitong(config)?,
                BrokerType::Guangfa => RestBroker::guangfa(config)?,
                BrokerType::Simulated => unreachable!("handled above"),
            };
            Ok(Arc::new(broker))
        }
    }
}
