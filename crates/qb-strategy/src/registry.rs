use crate::builtin::{BollStrategy, DualMaStrategy, KdjStrategy, MacdStrategy, RsiStrategy};
use crate::Strategy;
use std::collections::BTreeMap;
use std::fmt;

/// Thread-safe factory producing a fresh strategy instance.
pub type StrategyFactory = Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Catalogue metadata for a registered strategy.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyInfo {
    /// Unique registry key.
    pub name: String,
    pub description: String,
    /// Parameter names with their defaults.
    pub params: BTreeMap<String, f64>,
}

impl StrategyInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, f64>) -> Self {
        self.params = params;
        self
    }
}

/// Registry operation errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName { name: String },
    UnknownStrategy { name: String },
    EmptyName,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateName { name } => {
                write!(f, "strategy '{name}' is already registered")
            }
            RegistryError::UnknownStrategy { name } => {
                write!(f, "no strategy named '{name}' is registered")
            }
            RegistryError::EmptyName => write!(f, "strategy name must not be empty"),
        }
    }
}

impl std::error::Error for RegistryError {}

struct RegistryEntry {
    info: StrategyInfo,
    factory: StrategyFactory,
}

/// Insertion-ordered catalogue of available strategies.
///
/// The runtime enumerates entries, picks one by name and instantiates a
/// fresh boxed strategy per code. Names are case-sensitive and unique.
pub struct StrategyRegistry {
    entries: Vec<RegistryEntry>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        info: StrategyInfo,
        factory: StrategyFactory,
    ) -> Result<(), RegistryError> {
        if info.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.entries.iter().any(|e| e.info.name == info.name) {
            return Err(RegistryError::DuplicateName { name: info.name });
        }
        self.entries.push(RegistryEntry { info, factory });
        Ok(())
    }

    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Strategy>, RegistryError> {
        self.entries
            .iter()
            .find(|e| e.info.name == name)
            .map(|e| (e.factory)())
            .ok_or_else(|| RegistryError::UnknownStrategy {
                name: name.to_string(),
            })
    }

    pub fn info(&self, name: &str) -> Option<&StrategyInfo> {
        self.entries
            .iter()
            .find(|e| e.info.name == name)
            .map(|e| &e.info)
    }

    /// Metadata for every entry, in registration order.
    pub fn list(&self) -> Vec<StrategyInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }
}

/// Registry pre-loaded with the built-in strategy library.
pub fn default_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();

    let entries: Vec<(StrategyInfo, StrategyFactory)> = vec![
        (
            StrategyInfo::new("dual_ma", "Fast/slow moving-average trend following")
                .with_params(DualMaStrategy::default().params()),
            Box::new(|| Box::new(DualMaStrategy::default()) as Box<dyn Strategy>),
        ),
        (
            StrategyInfo::new("boll", "Bollinger band mean reversion")
                .with_params(BollStrategy::default().params()),
            Box::new(|| Box::new(BollStrategy::default()) as Box<dyn Strategy>),
        ),
        (
            StrategyInfo::new("macd", "MACD DIF/DEA cross")
                .with_params(MacdStrategy::default().params()),
            Box::new(|| Box::new(MacdStrategy::default()) as Box<dyn Strategy>),
        ),
        (
            StrategyInfo::new("kdj", "KDJ oversold/overbought cross")
                .with_params(KdjStrategy::default().params()),
            Box::new(|| Box::new(KdjStrategy::default()) as Box<dyn Strategy>),
        ),
        (
            StrategyInfo::new("rsi", "RSI threshold reversion")
                .with_params(RsiStrategy::default().params()),
            Box::new(|| Box::new(RsiStrategy::default()) as Box<dyn Strategy>),
        ),
    ];

    for (info, factory) in entries {
        registry
            .register(info, factory)
            .expect("built-in names are unique");
    }
    registry
}
