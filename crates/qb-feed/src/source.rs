use crate::hub::MarketHub;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How long `stop`/`disconnect` waits for a source worker to wind down
/// before giving up on it.
pub const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Failures surfaced by data sources.
#[derive(Debug)]
pub enum FeedError {
    /// The backing file or endpoint is missing or unreadable.
    Io(String),
    /// A row or payload could not be decoded.
    Parse(String),
    /// Upstream transport failure.
    Transport(String),
    /// Operation requires `connect` first.
    NotConnected,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Io(msg) => write!(f, "feed io error: {msg}"),
            FeedError::Parse(msg) => write!(f, "feed parse error: {msg}"),
            FeedError::Transport(msg) => write!(f, "feed transport error: {msg}"),
            FeedError::NotConnected => write!(f, "feed is not connected"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Contract every market-data source implements.
///
/// A source pushes data *into* the attached [`MarketHub`] (`bind_hub` is
/// called by `MarketHub::attach_source`); the hub owns subscriptions and
/// fanout. Workers spawned by `start` observe a cooperative stop signal and
/// exit within [`WORKER_STOP_TIMEOUT`] of `stop`.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Wire the hub this source publishes into.
    fn bind_hub(&self, hub: Arc<MarketHub>);

    async fn connect(&self) -> Result<(), FeedError>;

    async fn disconnect(&self);

    fn subscribe(&self, codes: &[String]);

    fn unsubscribe(&self, codes: &[String]);

    /// Begin pushing data. Idempotent while already running.
    async fn start(&self);

    /// Cooperatively stop the worker.
    async fn stop(&self);

    fn is_running(&self) -> bool;
}
