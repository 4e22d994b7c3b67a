use qb_schemas::{AccountInfo, Order, Position, Trade};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Supported broker gateways.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BrokerType {
    Simulated,
    Huatai,
    Zhongxin,
    Guotaijunan,
    Haitong,
    Guangfa,
}

impl BrokerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerType::Simulated => "simulated",
            BrokerType::Huatai => "huatai",
            BrokerType::Zhongxin => "zhongxin",
            BrokerType::Guotaijunan => "guotaijunan",
            BrokerType::Haitong => "haitong",
            BrokerType::Guangfa => "guangfa",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simulated" => Some(BrokerType::Simulated),
            "huatai" => Some(BrokerType::Huatai),
            "zhongxin" => Some(BrokerType::Zhongxin),
            "guotaijunan" => Some(BrokerType::Guotaijunan),
            "haitong" => Some(BrokerType::Haitong),
            "guangfa" => Some(BrokerType::Guangfa),
            _ => None,
        }
    }
}

impl fmt::Display for BrokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HMAC algorithm for signed requests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SignMethod {
    #[default]
    HmacSha256,
    HmacSha512,
}

impl SignMethod {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("hmac_sha512") {
            SignMethod::HmacSha512
        } else {
            SignMethod::HmacSha256
        }
    }
}

/// Connection settings shared by all broker adapters.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub broker_type: BrokerType,
    pub account: String,
    pub password: String,
    pub server: String,
    pub port: u16,
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub sign_method: SignMethod,
    pub verify_ssl: bool,
    pub client_cert: Option<PathBuf>,
    pub poll_interval: Duration,
    pub timeout: Duration,
    // Simulator settings
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_type: BrokerType::Simulated,
            account: String::new(),
            password: String::new(),
            server: String::new(),
            port: 0,
            base_url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            sign_method: SignMethod::HmacSha256,
            verify_ssl: true,
            client_cert: None,
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(5),
            initial_capital: 1_000_000.0,
            commission_rate: 0.0003,
            slippage: 0.001,
        }
    }
}

/// Outcome of a `send_order` call.
#[derive(Clone, Debug, Default)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: String,
    pub message: String,
    pub order: Option<Order>,
}

impl OrderResult {
    pub fn ok(order: Order) -> Self {
        Self {
            success: true,
            order_id: order.order_id.clone(),
            message: String::new(),
            order: Some(order),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: String::new(),
            message: message.into(),
            order: None,
        }
    }
}

/// Upward notifications published by brokers onto the runtime's queue.
#[derive(Clone, Debug)]
pub enum BrokerEvent {
    Connected,
    Disconnected,
    LoggedIn,
    LoggedOut,
    Order(Order),
    Trade(Trade),
    Position(Position),
    Account(AccountInfo),
    Error(String),
}

pub type BrokerEventSender = UnboundedSender<BrokerEvent>;

/// Broker adapter failures.
#[derive(Debug)]
pub enum BrokerError {
    /// Operation requires an established connection.
    NotConnected,
    /// Operation requires a completed login.
    NotLoggedIn,
    /// Missing or invalid configuration (base URL, credentials, cert path).
    Config(String),
    /// Non-2xx response, timeout or connection failure.
    Transport(String),
    /// The response body did not have the expected structure.
    Parse(String),
    /// The requested broker type has no implementation.
    Unsupported(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::NotConnected => write!(f, "broker is not connected"),
            BrokerError::NotLoggedIn => write!(f, "broker is not logged in"),
            BrokerError::Config(msg) => write!(f, "broker config error: {msg}"),
            BrokerError::Transport(msg) => write!(f, "broker transport error: {msg}"),
            BrokerError::Parse(msg) => write!(f, "broker parse error: {msg}"),
            BrokerError::Unsupported(msg) => write!(f, "unsupported broker: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_type_round_trip() {
        for t in [
            BrokerType::Simulated,
            BrokerType::Huatai,
            BrokerType::Zhongxin,
            BrokerType::Guotaijunan,
            BrokerType::Haitong,
            BrokerType::Guangfa,
        ] {
            assert_eq!(BrokerType::parse(t.as_str()), Some(t));
        }
        assert_eq!(BrokerType::parse("futu"), None);
    }

    #[test]
    fn sign_method_parse_defaults_to_sha256() {
        assert_eq!(SignMethod::parse("hmac_sha512"), SignMethod::HmacSha512);
        assert_eq!(SignMethod::parse("HMAC_SHA512"), SignMethod::HmacSha512);
        assert_eq!(SignMethod::parse("anything"), SignMethod::HmacSha256);
    }
}
