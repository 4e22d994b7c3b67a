use crate::hub::MarketHub;
use crate::source::{FeedError, FeedSource, WORKER_STOP_TIMEOUT};
use async_trait::async_trait;
use qb_schemas::{Clock, Snapshot, SystemClock, Tick};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

/// Built-in quote table for demo sessions.
const STOCK_TABLE: &[(&str, &str, f64, f64)] = &[
    ("000001", "平安银行", 10.50, 10.45),
    ("000002", "万科A", 8.20, 8.15),
    ("600000", "浦发银行", 7.80, 7.75),
    ("600036", "招商银行", 32.50, 32.30),
    ("601318", "中国平安", 45.60, 45.20),
];

/// Daily price band relative to prior close.
const LIMIT_PCT: f64 = 0.10;

struct SimState {
    prices: BTreeMap<String, f64>,
    volumes: BTreeMap<String, i64>,
    subscribed: BTreeSet<String>,
    rng: StdRng,
}

struct SimInner {
    interval: Duration,
    volatility: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<SimState>,
    hub: Mutex<Option<Arc<MarketHub>>>,
    connected: AtomicBool,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Random-walk quote generator for demos and tests.
///
/// Mutates per-code prices inside ±10% of prior close at a configurable
/// volatility and publishes a `Tick` plus a `Snapshot` per subscribed code
/// each interval.
pub struct SimulatedFeed {
    inner: Arc<SimInner>,
}

impl SimulatedFeed {
    pub fn new(interval: Duration, volatility: f64, seed: Option<u64>) -> Self {
        Self::with_clock(interval, volatility, seed, Arc::new(SystemClock))
    }

    pub fn with_clock(
        interval: Duration,
        volatility: f64,
        seed: Option<u64>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let prices = STOCK_TABLE
            .iter()
            .map(|(code, _, price, _)| (code.to_string(), *price))
            .collect();
        let volumes = STOCK_TABLE
            .iter()
            .map(|(code, _, _, _)| (code.to_string(), 0))
            .collect();
        Self {
            inner: Arc::new(SimInner {
                interval,
                volatility: volatility.max(0.0005),
                clock,
                state: Mutex::new(SimState {
                    prices,
                    volumes,
                    subscribed: BTreeSet::new(),
                    rng,
                }),
                hub: Mutex::new(None),
                connected: AtomicBool::new(false),
                running: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Generate and publish one round of quotes. Exposed for tests; the
    /// background worker calls the same path.
    pub fn emit_round(&self) {
        SimInner::emit_round(&self.inner);
    }
}

impl SimInner {
    fn emit_round(inner: &Arc<SimInner>) {
        let hub = match inner.hub.lock().expect("sim hub lock poisoned").clone() {
            Some(hub) => hub,
            None => return,
        };

        let now = inner.clock.now();
        let mut ticks: Vec<Tick> = Vec::new();
        let mut snapshots: Vec<Snapshot> = Vec::new();

        {
            let mut state = inner.state.lock().expect("sim state lock poisoned");
            let codes: Vec<String> = state.subscribed.iter().cloned().collect();
            for code in codes {
                let Some(&(_, name, seed_price, prev_close)) =
                    STOCK_TABLE.iter().find(|(c, ..)| *c == code)
                else {
                    continue;
                };

                let change_pct = (state.rng.gen::<f64>() - 0.5) * 2.0 * inner.volatility;
                let current = *state.prices.get(&code).unwrap_or(&seed_price);
                let mut price = round2(current * (1.0 + change_pct));

                let max_price = round2(prev_close * (1.0 + LIMIT_PCT));
                let min_price = round2(prev_close * (1.0 - LIMIT_PCT));
                price = price.clamp(min_price, max_price);
                state.prices.insert(code.clone(), price);

                let volume = state.rng.gen_range(100..=10_000) * 100;
                let session_volume = {
                    let entry = state.volumes.entry(code.clone()).or_insert(0);
                    *entry += volume;
                    *entry
                };

                let bid_volume = state.rng.gen_range(10..=100) * 100;
                let ask_volume = state.rng.gen_range(10..=100) * 100;

                ticks.push(Tick {
                    code: code.clone(),
                    name: name.to_string(),
                    price,
                    volume,
                    turnover: price * volume as f64,
                    bid_price: round2(price - 0.01),
                    ask_price: round2(price + 0.01),
                    bid_volume,
                    ask_volume,
                    open: seed_price,
                    high: price.max(seed_price),
                    low: price.min(seed_price),
                    prev_close,
                    ts: now,
                });

                let mut bid_prices = Vec::with_capacity(5);
                let mut ask_prices = Vec::with_capacity(5);
                let mut bid_volumes = Vec::with_capacity(5);
                let mut ask_volumes = Vec::with_capacity(5);
                for level in 1..=5 {
                    bid_prices.push(round2(price - 0.01 * level as f64));
                    ask_prices.push(round2(price + 0.01 * level as f64));
                    bid_volumes.push(state.rng.gen_range(10..=100) * 100);
                    ask_volumes.push(state.rng.gen_range(10..=100) * 100);
                }

                snapshots.push(Snapshot {
                    code: code.clone(),
                    name: name.to_string(),
                    price,
                    open: seed_price,
                    high: price.max(seed_price),
                    low: price.min(seed_price),
                    prev_close,
                    volume: session_volume,
                    turnover: session_volume as f64 * price,
                    bid_prices,
                    bid_volumes,
                    ask_prices,
                    ask_volumes,
                    ts: now,
                });
            }
        }

        // Publish outside the state lock.
        for tick in ticks {
            hub.on_tick(tick);
        }
        for snapshot in snapshots {
            hub.on_snapshot(snapshot);
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[async_trait]
impl FeedSource for SimulatedFeed {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn bind_hub(&self, hub: Arc<MarketHub>) {
        *self.inner.hub.lock().expect("sim hub lock poisoned") = Some(hub);
    }

    async fn connect(&self) -> Result<(), FeedError> {
        self.inner.connected.store(true, Ordering::SeqCst);
        info!("simulated feed connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.stop().await;
        self.inner.connected.store(false, Ordering::SeqCst);
        info!("simulated feed disconnected");
    }

    fn subscribe(&self, codes: &[String]) {
        let mut state = self.inner.state.lock().expect("sim state lock poisoned");
        for code in codes {
            state.subscribed.insert(code.clone());
        }
    }

    fn unsubscribe(&self, codes: &[String]) {
        let mut state = self.inner.state.lock().expect("sim state lock poisoned");
        for code in codes {
            state.subscribed.remove(code);
        }
    }

    async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let running = Arc::clone(&self.inner.running);
        let notify = Arc::clone(&self.inner.notify);
        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                SimInner::emit_round(&inner);
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(inner.interval) => {}
                }
            }
        });
        *self.inner.worker.lock().expect("sim worker lock poisoned") = Some(handle);
        info!("simulated feed started");
    }

    async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let handle = self
            .inner
            .worker
            .lock()
            .expect("sim worker lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(WORKER_STOP_TIMEOUT, handle).await;
        }
        info!("simulated feed stopped");
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}
