use crate::hub::MarketHub;
use crate::source::{FeedError, FeedSource, WORKER_STOP_TIMEOUT};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use qb_schemas::{Clock, Snapshot, SystemClock};
use qb_util::{ThrottledClient, TtlCache};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Upstream quote boundary for the polling feed.
///
/// Implementations resolve a batch of codes to current snapshots; the feed
/// owns pacing, subscription state and error tolerance.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_quotes(&self, codes: &[String]) -> Result<Vec<Snapshot>, FeedError>;
}

/// Generic JSON quote endpoint client.
///
/// Expects `GET {base_url}?codes=a,b,c` to return either a bare array of
/// quote objects or `{"data": [...]}`. Field names are tolerant: `code`/
/// `symbol`, `price`/`last`/`close`, `pre_close`/`prev_close`, `amount`/
/// `turnover`. Responses are cached briefly so overlapping polls do not
/// hammer the upstream; all calls go through the shared throttled client.
pub struct JsonQuoteProvider {
    base_url: String,
    client: Arc<ThrottledClient>,
    cache: TtlCache<String>,
    clock: Arc<dyn Clock>,
}

impl JsonQuoteProvider {
    pub fn new(base_url: impl Into<String>, client: Arc<ThrottledClient>) -> Self {
        Self::with_clock(base_url, client, Arc::new(SystemClock))
    }

    pub fn with_clock(
        base_url: impl Into<String>,
        client: Arc<ThrottledClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            cache: TtlCache::new(Duration::from_secs(2)),
            clock,
        }
    }

    fn parse_body(&self, body: &str) -> Result<Vec<Snapshot>, FeedError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| FeedError::Parse(format!("quote payload: {e}")))?;
        let items = match &value {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => match map.get("data") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => return Err(FeedError::Parse("expected a quote array".into())),
            },
            _ => return Err(FeedError::Parse("expected a quote array".into())),
        };

        let now = self.clock.now();
        Ok(items
            .iter()
            .filter_map(|item| parse_quote(item, now))
            .collect())
    }
}

fn str_field<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| item.get(*k).and_then(Value::as_str))
}

fn num_field(item: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        item.get(*k).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        })
    })
}

fn parse_quote(item: &Value, now: NaiveDateTime) -> Option<Snapshot> {
    let code = str_field(item, &["code", "symbol"])?.to_string();
    let price = num_field(item, &["price", "last", "close"]).unwrap_or(0.0);
    let ts = num_field(item, &["timestamp", "ts"])
        .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
        .map(|dt| dt.naive_local())
        .unwrap_or(now);

    Some(Snapshot {
        code,
        name: str_field(item, &["name"]).unwrap_or("").to_string(),
        price,
        open: num_field(item, &["open"]).unwrap_or(price),
        high: num_field(item, &["high"]).unwrap_or(price),
        low: num_field(item, &["low"]).unwrap_or(price),
        prev_close: num_field(item, &["pre_close", "prev_close"]).unwrap_or(0.0),
        volume: num_field(item, &["volume"]).unwrap_or(0.0) as i64,
        turnover: num_field(item, &["amount", "turnover"]).unwrap_or(0.0),
        bid_prices: Vec::new(),
        bid_volumes: Vec::new(),
        ask_prices: Vec::new(),
        ask_volumes: Vec::new(),
        ts,
    })
}

#[async_trait]
impl QuoteProvider for JsonQuoteProvider {
    fn name(&self) -> &'static str {
        "json-endpoint"
    }

    async fn fetch_quotes(&self, codes: &[String]) -> Result<Vec<Snapshot>, FeedError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}?codes={}", self.base_url, codes.join(","));
        let body = match self.cache.get(&url) {
            Some(body) => body,
            None => {
                let body = self
                    .client
                    .get_text(&url)
                    .await
                    .map_err(|e| FeedError::Transport(e.to_string()))?;
                self.cache.set(url.clone(), body.clone());
                body
            }
        };
        self.parse_body(&body)
    }
}

struct PollingInner {
    provider: Arc<dyn QuoteProvider>,
    interval: Duration,
    subscribed: Mutex<BTreeSet<String>>,
    hub: Mutex<Option<Arc<MarketHub>>>,
    connected: AtomicBool,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Fixed-period poller over a [`QuoteProvider`].
///
/// Transient provider errors are logged and the loop continues on the next
/// tick; open subscriptions are never dropped by an outage.
pub struct HttpPollingFeed {
    inner: Arc<PollingInner>,
}

impl HttpPollingFeed {
    pub fn new(provider: Arc<dyn QuoteProvider>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(PollingInner {
                provider,
                interval: interval.max(Duration::from_secs(1)),
                subscribed: Mutex::new(BTreeSet::new()),
                hub: Mutex::new(None),
                connected: AtomicBool::new(false),
                running: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// One poll round; the background worker calls the same path.
    pub async fn poll_once(&self) {
        PollingInner::poll_once(&self.inner).await;
    }
}

impl PollingInner {
    async fn poll_once(inner: &Arc<PollingInner>) {
        let hub = match inner.hub.lock().expect("poll hub lock poisoned").clone() {
            Some(hub) => hub,
            None => return,
        };
        let codes: Vec<String> = inner
            .subscribed
            .lock()
            .expect("poll subs lock poisoned")
            .iter()
            .cloned()
            .collect();
        if codes.is_empty() {
            return;
        }
        match inner.provider.fetch_quotes(&codes).await {
            Ok(snapshots) => {
                for snapshot in snapshots {
                    hub.on_snapshot(snapshot);
                }
            }
            Err(e) => {
                warn!(provider = inner.provider.name(), error = %e, "quote poll failed");
            }
        }
    }
}

#[async_trait]
impl FeedSource for HttpPollingFeed {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn bind_hub(&self, hub: Arc<MarketHub>) {
        *self.inner.hub.lock().expect("poll hub lock poisoned") = Some(hub);
    }

    async fn connect(&self) -> Result<(), FeedError> {
        self.inner.connected.store(true, Ordering::SeqCst);
        info!(provider = self.inner.provider.name(), "polling feed connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.stop().await;
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    fn subscribe(&self, codes: &[String]) {
        let mut subs = self.inner.subscribed.lock().expect("poll subs lock poisoned");
        for code in codes {
            subs.insert(code.clone());
        }
    }

    fn unsubscribe(&self, codes: &[String]) {
        let mut subs = self.inner.subscribed.lock().expect("poll subs lock poisoned");
        for code in codes {
            subs.remove(code);
        }
    }

    async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while inner.running.load(Ordering::SeqCst) {
                PollingInner::poll_once(&inner).await;
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep(inner.interval) => {}
                }
            }
        });
        *self.inner.worker.lock().expect("poll worker lock poisoned") = Some(handle);
        info!("polling feed started");
    }

    async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let handle = self
            .inner
            .worker
            .lock()
            .expect("poll worker lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(WORKER_STOP_TIMEOUT, handle).await;
        }
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}
