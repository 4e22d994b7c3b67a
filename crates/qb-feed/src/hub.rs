use crate::source::{FeedError, FeedSource};
use qb_schemas::{Bar, KlinePeriod, Snapshot, Tick};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Cap on cached klines per (code, period); oldest entries are evicted.
pub const KLINE_CACHE_CAP: usize = 1000;

/// A kline update as pushed by source adapters.
#[derive(Clone, Debug, PartialEq)]
pub struct KlineEvent {
    pub code: String,
    pub period: KlinePeriod,
    pub bar: Bar,
}

pub type TickCallback = Arc<dyn Fn(&Tick) + Send + Sync>;
pub type KlineCallback = Arc<dyn Fn(&KlineEvent) + Send + Sync>;
pub type SnapshotCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Token returned by `add_*_callback`; pass it to
/// [`MarketHub::remove_callback`] to unregister.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Default)]
struct CallbackSet {
    tick: Vec<(CallbackId, TickCallback)>,
    kline: Vec<(CallbackId, KlineCallback)>,
    snapshot: Vec<(CallbackId, SnapshotCallback)>,
}

impl CallbackSet {
    fn remove(&mut self, id: CallbackId) -> bool {
        let before = self.tick.len() + self.kline.len() + self.snapshot.len();
        self.tick.retain(|(cid, _)| *cid != id);
        self.kline.retain(|(cid, _)| *cid != id);
        self.snapshot.retain(|(cid, _)| *cid != id);
        before != self.tick.len() + self.kline.len() + self.snapshot.len()
    }

    fn is_empty(&self) -> bool {
        self.tick.is_empty() && self.kline.is_empty() && self.snapshot.is_empty()
    }
}

#[derive(Default)]
struct HubState {
    subscribed: BTreeSet<String>,
    per_code: BTreeMap<String, CallbackSet>,
    global: CallbackSet,
    latest_ticks: BTreeMap<String, Tick>,
    latest_snapshots: BTreeMap<String, Snapshot>,
    klines: BTreeMap<String, BTreeMap<KlinePeriod, VecDeque<Bar>>>,
}

/// Subscription hub between source adapters and strategies.
///
/// Upward surface (strategies/runtime): subscribe/unsubscribe, callback
/// registration, latest-value queries, source lifecycle delegation.
/// Downward surface (source adapters): `on_tick` / `on_kline` /
/// `on_snapshot`.
///
/// One mutex guards subscriptions and caches; callback lists are cloned out
/// and the lock released before any subscriber code runs, so a subscriber
/// may re-enter the hub freely. A panicking subscriber is caught and logged
/// and never prevents the remaining subscribers from seeing the event.
pub struct MarketHub {
    state: Mutex<HubState>,
    source: Mutex<Option<Arc<dyn FeedSource>>>,
    next_callback_id: AtomicU64,
    connected: AtomicBool,
    running: AtomicBool,
}

impl Default for MarketHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            source: Mutex::new(None),
            next_callback_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().expect("hub state lock poisoned")
    }

    fn current_source(&self) -> Option<Arc<dyn FeedSource>> {
        self.source.lock().expect("hub source lock poisoned").clone()
    }

    fn new_callback_id(&self) -> CallbackId {
        CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed))
    }

    // ------------------------------------------------------------------
    // Source lifecycle
    // ------------------------------------------------------------------

    /// Attach (or replace) the backing source and hand it this hub.
    pub fn attach_source(self: &Arc<Self>, source: Arc<dyn FeedSource>) {
        source.bind_hub(Arc::clone(self));
        *self.source.lock().expect("hub source lock poisoned") = Some(source);
    }

    pub async fn connect(&self) -> Result<(), FeedError> {
        let source = self.current_source().ok_or(FeedError::NotConnected)?;
        source.connect().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(source = source.name(), "market data connected");

        // Replay standing subscriptions onto the fresh source.
        let codes: Vec<String> = self.lock_state().subscribed.iter().cloned().collect();
        if !codes.is_empty() {
            source.subscribe(&codes);
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(source) = self.current_source() {
            source.disconnect().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("market data disconnected");
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(source) = self.current_source() {
            source.start().await;
        }
        info!("market data service started");
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(source) = self.current_source() {
            source.stop().await;
        }
        info!("market data service stopped");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Idempotent subscribe; forwarded to the source when connected.
    pub fn subscribe(&self, codes: &[String]) {
        {
            let mut state = self.lock_state();
            for code in codes {
                state.subscribed.insert(code.clone());
                state.per_code.entry(code.clone()).or_default();
            }
        }
        if self.is_connected() {
            if let Some(source) = self.current_source() {
                source.subscribe(codes);
            }
        }
        info!(?codes, "subscribed");
    }

    /// Idempotent unsubscribe; drops the per-code callback set too.
    pub fn unsubscribe(&self, codes: &[String]) {
        {
            let mut state = self.lock_state();
            for code in codes {
                state.subscribed.remove(code);
                state.per_code.remove(code);
            }
        }
        if self.is_connected() {
            if let Some(source) = self.current_source() {
                source.unsubscribe(codes);
            }
        }
        info!(?codes, "unsubscribed");
    }

    pub fn subscribed_codes(&self) -> Vec<String> {
        self.lock_state().subscribed.iter().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Callback registry
    // ------------------------------------------------------------------

    /// Register a tick callback; `code = None` registers a global sink.
    pub fn add_tick_callback(&self, callback: TickCallback, code: Option<&str>) -> CallbackId {
        let id = self.new_callback_id();
        let mut state = self.lock_state();
        match code {
            Some(code) => state
                .per_code
                .entry(code.to_string())
                .or_default()
                .tick
                .push((id, callback)),
            None => state.global.tick.push((id, callback)),
        }
        id
    }

    pub fn add_kline_callback(&self, callback: KlineCallback, code: Option<&str>) -> CallbackId {
        let id = self.new_callback_id();
        let mut state = self.lock_state();
        match code {
            Some(code) => state
                .per_code
                .entry(code.to_string())
                .or_default()
                .kline
                .push((id, callback)),
            None => state.global.kline.push((id, callback)),
        }
        id
    }

    pub fn add_snapshot_callback(
        &self,
        callback: SnapshotCallback,
        code: Option<&str>,
    ) -> CallbackId {
        let id = self.new_callback_id();
        let mut state = self.lock_state();
        match code {
            Some(code) => state
                .per_code
                .entry(code.to_string())
                .or_default()
                .snapshot
                .push((id, callback)),
            None => state.global.snapshot.push((id, callback)),
        }
        id
    }

    /// Remove a callback by its token, wherever it was registered.
    /// Returns whether anything was removed.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut state = self.lock_state();
        let mut removed = state.global.remove(id);
        let mut emptied: Vec<String> = Vec::new();
        for (code, set) in state.per_code.iter_mut() {
            if set.remove(id) {
                removed = true;
            }
            if set.is_empty() {
                emptied.push(code.clone());
            }
        }
        // Keep entries for subscribed codes; garbage-collect the rest.
        for code in emptied {
            if !state.subscribed.contains(&code) {
                state.per_code.remove(&code);
            }
        }
        removed
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn latest_tick(&self, code: &str) -> Option<Tick> {
        self.lock_state().latest_ticks.get(code).cloned()
    }

    pub fn latest_snapshot(&self, code: &str) -> Option<Snapshot> {
        self.lock_state().latest_snapshots.get(code).cloned()
    }

    /// Up to `count` most recent cached klines, oldest first.
    pub fn bars(&self, code: &str, period: KlinePeriod, count: usize) -> Vec<Bar> {
        let state = self.lock_state();
        match state.klines.get(code).and_then(|m| m.get(&period)) {
            Some(bars) => {
                let skip = bars.len().saturating_sub(count);
                bars.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Downward surface (called by source adapters)
    // ------------------------------------------------------------------

    pub fn on_tick(&self, tick: Tick) {
        let (global, per_code) = {
            let mut state = self.lock_state();
            state.latest_ticks.insert(tick.code.clone(), tick.clone());
            (
                state.global.tick.clone(),
                state
                    .per_code
                    .get(&tick.code)
                    .map(|set| set.tick.clone())
                    .unwrap_or_default(),
            )
        };
        for (_, cb) in global.iter().chain(per_code.iter()) {
            invoke("tick", || cb(&tick));
        }
    }

    pub fn on_kline(&self, event: KlineEvent) {
        let (global, per_code) = {
            let mut state = self.lock_state();
            let bars = state
                .klines
                .entry(event.code.clone())
                .or_default()
                .entry(event.period)
                .or_default();
            // Same-timestamp update replaces the forming bar in place.
            match bars.back_mut() {
                Some(last) if last.ts == event.bar.ts => *last = event.bar.clone(),
                _ => {
                    bars.push_back(event.bar.clone());
                    while bars.len() > KLINE_CACHE_CAP {
                        bars.pop_front();
                    }
                }
            }
            (
                state.global.kline.clone(),
                state
                    .per_code
                    .get(&event.code)
                    .map(|set| set.kline.clone())
                    .unwrap_or_default(),
            )
        };
        for (_, cb) in global.iter().chain(per_code.iter()) {
            invoke("kline", || cb(&event));
        }
    }

    pub fn on_snapshot(&self, snapshot: Snapshot) {
        let (global, per_code) = {
            let mut state = self.lock_state();
            state
                .latest_snapshots
                .insert(snapshot.code.clone(), snapshot.clone());
            (
                state.global.snapshot.clone(),
                state
                    .per_code
                    .get(&snapshot.code)
                    .map(|set| set.snapshot.clone())
                    .unwrap_or_default(),
            )
        };
        for (_, cb) in global.iter().chain(per_code.iter()) {
            invoke("snapshot", || cb(&snapshot));
        }
    }
}

/// Run one subscriber, containing any panic so the rest still fire.
fn invoke(kind: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(kind, "market data callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicUsize;

    fn ts(s: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 30, s)
            .unwrap()
    }

    fn snapshot(code: &str, price: f64) -> Snapshot {
        Snapshot::flat(code, price, ts(0))
    }

    #[test]
    fn subscribe_unsubscribe_round_trip_restores_state() {
        let hub = MarketHub::new();
        let codes = vec!["000001".to_string(), "600000".to_string()];
        hub.subscribe(&codes);
        assert_eq!(hub.subscribed_codes(), codes);
        hub.subscribe(&codes); // idempotent
        assert_eq!(hub.subscribed_codes().len(), 2);
        hub.unsubscribe(&codes);
        assert!(hub.subscribed_codes().is_empty());
        assert!(hub.lock_state().per_code.is_empty());
    }

    #[test]
    fn snapshot_updates_cache_and_fires_callbacks() {
        let hub = MarketHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        hub.add_snapshot_callback(
            Arc::new(move |_s| {
                seen2.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );

        hub.on_snapshot(snapshot("000001", 10.0));
        hub.on_snapshot(snapshot("000001", 10.5));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        let latest = hub.latest_snapshot("000001").unwrap();
        assert!((latest.price - 10.5).abs() < 1e-9);
    }

    #[test]
    fn per_code_callback_only_sees_its_code() {
        let hub = MarketHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        hub.add_snapshot_callback(
            Arc::new(move |s| {
                assert_eq!(s.code, "000001");
                count2.fetch_add(1, Ordering::SeqCst);
            }),
            Some("000001"),
        );

        hub.on_snapshot(snapshot("000001", 10.0));
        hub.on_snapshot(snapshot("000002", 8.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_callback_by_token() {
        let hub = MarketHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let id = hub.add_tick_callback(
            Arc::new(move |_t| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );

        assert!(hub.remove_callback(id));
        assert!(!hub.remove_callback(id));

        hub.on_tick(Tick {
            code: "000001".into(),
            name: String::new(),
            price: 10.0,
            volume: 100,
            turnover: 1000.0,
            bid_price: 9.99,
            ask_price: 10.01,
            bid_volume: 100,
            ask_volume: 100,
            open: 10.0,
            high: 10.0,
            low: 10.0,
            prev_close: 10.0,
            ts: ts(0),
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let hub = MarketHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        hub.add_snapshot_callback(Arc::new(|_s| panic!("bad subscriber")), None);
        let count2 = Arc::clone(&count);
        hub.add_snapshot_callback(
            Arc::new(move |_s| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );

        hub.on_snapshot(snapshot("000001", 10.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kline_cache_updates_in_place_and_evicts() {
        let hub = MarketHub::new();
        let bar = |s: u32, close: f64| Bar::new(ts(s), close, close, close, close, 100.0);

        // Same timestamp: replaced in place.
        hub.on_kline(KlineEvent {
            code: "000001".into(),
            period: KlinePeriod::Min1,
            bar: bar(0, 10.0),
        });
        hub.on_kline(KlineEvent {
            code: "000001".into(),
            period: KlinePeriod::Min1,
            bar: bar(0, 10.2),
        });
        let cached = hub.bars("000001", KlinePeriod::Min1, 10);
        assert_eq!(cached.len(), 1);
        assert!((cached[0].close - 10.2).abs() < 1e-9);

        // Cap: oldest evicted.
        for i in 1..(KLINE_CACHE_CAP as u32 + 5) {
            hub.on_kline(KlineEvent {
                code: "000001".into(),
                period: KlinePeriod::Min1,
                bar: Bar::new(
                    ts(0) + chrono::Duration::seconds(i as i64 * 60),
                    10.0,
                    10.0,
                    10.0,
                    10.0,
                    1.0,
                ),
            });
        }
        let all = hub.bars("000001", KlinePeriod::Min1, KLINE_CACHE_CAP + 100);
        assert_eq!(all.len(), KLINE_CACHE_CAP);

        // Count clamps the tail.
        let tail = hub.bars("000001", KlinePeriod::Min1, 3);
        assert_eq!(tail.len(), 3);
    }
}
