use crate::hub::MarketHub;
use crate::source::{FeedError, FeedSource, WORKER_STOP_TIMEOUT};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use qb_schemas::Snapshot;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

/// Longest single pause between replayed rows, whatever the recorded gap.
const MAX_ROW_SLEEP: Duration = Duration::from_secs(5);

struct ReplayInner {
    path: PathBuf,
    loop_playback: bool,
    speed: f64,
    rows: Mutex<Vec<(Snapshot, f64)>>,
    subscribed: Mutex<BTreeSet<String>>,
    hub: Mutex<Option<Arc<MarketHub>>>,
    connected: AtomicBool,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Replays a quote CSV, preserving inter-row spacing scaled by `speed`.
///
/// Column contract (case-insensitive header, order-independent): `code` and
/// `datetime` (or `date`) are required; `close`/`price`, `open`, `high`,
/// `low`, `pre_close`, `volume`, `amount` and `name` are honored when
/// present. Rows without a code are skipped.
pub struct CsvReplayFeed {
    inner: Arc<ReplayInner>,
}

impl CsvReplayFeed {
    pub fn new(path: impl Into<PathBuf>, loop_playback: bool, speed: f64) -> Self {
        Self {
            inner: Arc::new(ReplayInner {
                path: path.into(),
                loop_playback,
                speed: speed.max(0.1),
                rows: Mutex::new(Vec::new()),
                subscribed: Mutex::new(BTreeSet::new()),
                hub: Mutex::new(None),
                connected: AtomicBool::new(false),
                running: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Synchronously replay the loaded rows once, in order, without pacing.
    /// Loads the file first if `connect` has not run yet.
    pub fn replay_once(&self) -> Result<(), FeedError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            self.load()?;
        }
        let hub = self
            .inner
            .hub
            .lock()
            .expect("replay hub lock poisoned")
            .clone()
            .ok_or(FeedError::NotConnected)?;

        let rows = self.inner.rows.lock().expect("replay rows lock poisoned").clone();
        let subscribed = self
            .inner
            .subscribed
            .lock()
            .expect("replay subs lock poisoned")
            .clone();
        for (snapshot, _) in rows {
            if !subscribed.is_empty() && !subscribed.contains(&snapshot.code) {
                continue;
            }
            hub.on_snapshot(snapshot);
        }
        Ok(())
    }

    fn load(&self) -> Result<(), FeedError> {
        let text = std::fs::read_to_string(&self.inner.path).map_err(|e| {
            FeedError::Io(format!("open '{}': {e}", self.inner.path.display()))
        })?;
        let rows = parse_rows(&text)?;
        info!(
            path = %self.inner.path.display(),
            rows = rows.len(),
            "csv feed loaded"
        );
        *self.inner.rows.lock().expect("replay rows lock poisoned") = rows;
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Parse CSV text into `(snapshot, seconds-since-previous-row)` pairs.
fn parse_rows(text: &str) -> Result<Vec<(Snapshot, f64)>, FeedError> {
    let mut lines = text.lines();
    let header = match lines.next() {
        Some(line) => line,
        None => return Ok(Vec::new()),
    };

    let columns: HashMap<String, usize> = header
        .split(',')
        .enumerate()
        .map(|(i, name)| (name.trim().to_ascii_lowercase(), i))
        .collect();
    if !columns.contains_key("code") {
        return Err(FeedError::Parse("missing required column 'code'".into()));
    }

    let mut rows = Vec::new();
    let mut prev_dt: Option<NaiveDateTime> = None;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let get = |name: &str| -> Option<&str> {
            columns
                .get(name)
                .and_then(|&i| fields.get(i))
                .copied()
                .filter(|s| !s.is_empty())
        };
        let num = |name: &str| -> Option<f64> { get(name).and_then(|s| s.parse::<f64>().ok()) };

        let code = match get("code") {
            Some(code) => code.to_string(),
            None => continue,
        };

        let dt = get("datetime").or_else(|| get("date")).and_then(parse_dt);
        let price = num("close").or_else(|| num("price")).unwrap_or(0.0);
        let volume = num("volume").unwrap_or(0.0) as i64;

        let snapshot = Snapshot {
            code,
            name: get("name").unwrap_or("").to_string(),
            price,
            open: num("open").unwrap_or(price),
            high: num("high").unwrap_or(price),
            low: num("low").unwrap_or(price),
            prev_close: num("pre_close")
                .or_else(|| num("previous_close"))
                .unwrap_or(price),
            volume,
            turnover: num("amount").unwrap_or(price * volume as f64),
            bid_prices: Vec::new(),
            bid_volumes: Vec::new(),
            ask_prices: Vec::new(),
            ask_volumes: Vec::new(),
            ts: dt.unwrap_or_default(),
        };

        let interval = match (prev_dt, dt) {
            (Some(prev), Some(cur)) => (cur - prev).num_milliseconds().max(0) as f64 / 1000.0,
            _ => 0.0,
        };
        rows.push((snapshot, interval));
        prev_dt = dt;
    }
    Ok(rows)
}

fn parse_dt(value: &str) -> Option<NaiveDateTime> {
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(value, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

impl ReplayInner {
    async fn emit_rows(inner: &Arc<ReplayInner>) {
        let hub = match inner.hub.lock().expect("replay hub lock poisoned").clone() {
            Some(hub) => hub,
            None => return,
        };
        let rows = inner.rows.lock().expect("replay rows lock poisoned").clone();

        let mut prev_interval = 0.0;
        for (snapshot, interval) in rows {
            if !inner.running.load(Ordering::SeqCst) {
                break;
            }
            {
                let subscribed = inner.subscribed.lock().expect("replay subs lock poisoned");
                if !subscribed.is_empty() && !subscribed.contains(&snapshot.code) {
                    continue;
                }
            }
            let gap = if interval > 0.0 {
                interval / inner.speed
            } else {
                prev_interval / inner.speed
            };
            if gap > 0.0 {
                let sleep = Duration::from_secs_f64(gap).min(MAX_ROW_SLEEP);
                tokio::select! {
                    _ = inner.notify.notified() => break,
                    _ = tokio::time::sleep(sleep) => {}
                }
            }
            hub.on_snapshot(snapshot);
            prev_interval = interval;
        }
    }
}

#[async_trait]
impl FeedSource for CsvReplayFeed {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn bind_hub(&self, hub: Arc<MarketHub>) {
        *self.inner.hub.lock().expect("replay hub lock poisoned") = Some(hub);
    }

    async fn connect(&self) -> Result<(), FeedError> {
        self.load()
    }

    async fn disconnect(&self) {
        self.stop().await;
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.rows.lock().expect("replay rows lock poisoned").clear();
    }

    fn subscribe(&self, codes: &[String]) {
        let mut subs = self.inner.subscribed.lock().expect("replay subs lock poisoned");
        for code in codes {
            subs.insert(code.clone());
        }
    }

    fn unsubscribe(&self, codes: &[String]) {
        let mut subs = self.inner.subscribed.lock().expect("replay subs lock poisoned");
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
            loop {
                ReplayInner::emit_rows(&inner).await;
                if !inner.loop_playback || !inner.running.load(Ordering::SeqCst) {
                    break;
                }
            }
            inner.running.store(false, Ordering::SeqCst);
        });
        *self.inner.worker.lock().expect("replay worker lock poisoned") = Some(handle);
    }

    async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let handle = self
            .inner
            .worker
            .lock()
            .expect("replay worker lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(WORKER_STOP_TIMEOUT, handle).await;
        }
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}
