use anyhow::{bail, Context, Result};
use qb_broker::{make_broker, BrokerConfig, BrokerEvent, BrokerType, SignMethod, TradingEngine};
use qb_config::AppConfig;
use qb_feed::{
    CallbackId, CsvReplayFeed, FeedSource, HttpPollingFeed, MarketHub, QuoteProvider, SimulatedFeed,
};
use qb_risk::{RiskConfig, RiskGate, RiskSummary};
use qb_schemas::{AccountInfo, Bar, Clock, Order, OrderStatus, Position, Side, Snapshot, SystemClock};
use qb_strategy::{StrategyCell, StrategyRegistry, StrategySlot};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Period of the account/risk refresh ticker used when the broker has no
/// push channel.
const REFRESH_TICK: Duration = Duration::from_secs(2);

pub type RunnerLogSink = Arc<dyn Fn(&str) + Send + Sync>;
pub type SignalSink = Arc<dyn Fn(&Order) + Send + Sync>;

/// Session status for dashboards.
#[derive(Clone, Debug, PartialEq)]
pub struct RunnerStatus {
    pub risk: RiskSummary,
    pub is_running: bool,
    pub risk_paused_reason: String,
}

enum RunnerCommand {
    /// The risk gate ordered a session stop.
    RiskStop(String),
}

#[derive(Default)]
struct SessionState {
    slots: HashMap<String, StrategySlot>,
    /// broker order id -> owning code.
    order_owner: HashMap<String, String>,
    latest_prices: HashMap<String, f64>,
    /// Broker-side positions, marked to the latest prices.
    positions: HashMap<String, Position>,
    last_account: Option<AccountInfo>,
    codes: Vec<String>,
    risk_pause_reason: Option<String>,
}

struct Shared {
    config: Mutex<AppConfig>,
    registry: StrategyRegistry,
    hub: Arc<MarketHub>,
    engine: Arc<TradingEngine>,
    clock: Arc<dyn Clock>,
    session: Mutex<SessionState>,
    risk: Mutex<Option<Arc<RiskGate>>>,
    running: AtomicBool,
    log_sink: Mutex<Option<RunnerLogSink>>,
    signal_sink: Mutex<Option<SignalSink>>,
    quote_provider: Mutex<Option<Arc<dyn QuoteProvider>>>,
    feed: Mutex<Option<Arc<dyn FeedSource>>>,
    snapshot_cb: Mutex<Option<CallbackId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    commands: Mutex<Option<UnboundedSender<RunnerCommand>>>,
}

impl Shared {
    fn log(&self, message: &str) {
        info!(target: "runner", "{message}");
        if let Some(sink) = self.log_sink.lock().expect("runner log lock poisoned").as_ref() {
            sink(message);
        }
    }

    fn gate(&self) -> Option<Arc<RiskGate>> {
        self.risk.lock().expect("runner risk lock poisoned").clone()
    }

    fn config(&self) -> AppConfig {
        self.config.lock().expect("runner config lock poisoned").clone()
    }

    /// Snapshot delivery: cache the price, mark the position, run the
    /// advisory position check, then hand the bar to the owning strategy.
    fn on_snapshot(&self, snapshot: &Snapshot) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let price = if snapshot.price > 0.0 {
            snapshot.price
        } else {
            snapshot.open
        };

        let checked_position = {
            let mut session = self.session.lock().expect("runner session lock poisoned");
            session.latest_prices.insert(snapshot.code.clone(), price);
            match session.positions.get_mut(&snapshot.code) {
                Some(position) => {
                    if price > 0.0 {
                        position.current_price = price;
                    }
                    Some(position.clone())
                }
                None => None,
            }
        };
        if let (Some(position), Some(gate)) = (checked_position, self.gate()) {
            gate.check_position(&position);
        }

        let bar = snapshot_to_bar(snapshot);
        let mut session = self.session.lock().expect("runner session lock poisoned");
        if let Some(slot) = session.slots.get_mut(&snapshot.code) {
            slot.deliver_bar(&snapshot.code, &bar);
        }
    }

    /// Fold a fresh account view into the session and drive the drawdown
    /// check off it.
    fn update_account_state(&self, account: AccountInfo) {
        let total_value = {
            let mut session = self.session.lock().expect("runner session lock poisoned");
            let mut total_value = account.total_value;
            if total_value <= 0.0 {
                let market: f64 = session.positions.values().map(Position::market_value).sum();
                total_value = account.cash + market;
            }
            session.last_account = Some(account);
            total_value
        };
        if let Some(gate) = self.gate() {
            gate.update_peak_value(total_value);
            gate.check_drawdown(total_value);
        }
    }
}

/// Live-session orchestrator: binds one strategy instance per code to the
/// market-data hub, routes order intents through the risk gate into the
/// trading engine, and mirrors broker events back into the strategies.
pub struct StrategyRunner {
    shared: Arc<Shared>,
}

impl StrategyRunner {
    pub fn new(config: AppConfig, registry: StrategyRegistry) -> Arc<Self> {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AppConfig,
        registry: StrategyRegistry,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                config: Mutex::new(config),
                registry,
                hub: Arc::new(MarketHub::new()),
                engine: Arc::new(TradingEngine::new()),
                clock,
                session: Mutex::new(SessionState::default()),
                risk: Mutex::new(None),
                running: AtomicBool::new(false),
                log_sink: Mutex::new(None),
                signal_sink: Mutex::new(None),
                quote_provider: Mutex::new(None),
                feed: Mutex::new(None),
                snapshot_cb: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                commands: Mutex::new(None),
            }),
        })
    }

    pub fn hub(&self) -> Arc<MarketHub> {
        Arc::clone(&self.shared.hub)
    }

    pub fn engine(&self) -> Arc<TradingEngine> {
        Arc::clone(&self.shared.engine)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn set_log_sink(&self, sink: RunnerLogSink) {
        *self.shared.log_sink.lock().expect("runner log lock poisoned") = Some(sink);
    }

    /// Semi-auto mode: held orders are surfaced here instead of executing.
    pub fn set_signal_sink(&self, sink: SignalSink) {
        *self
            .shared
            .signal_sink
            .lock()
            .expect("runner signal lock poisoned") = Some(sink);
    }

    /// Upstream quote boundary for the remote-polling data sources.
    pub fn set_quote_provider(&self, provider: Arc<dyn QuoteProvider>) {
        *self
            .shared
            .quote_provider
            .lock()
            .expect("runner provider lock poisoned") = Some(provider);
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    /// Start a session binding each code to a named strategy.
    pub async fn start(self: &Arc<Self>, assignments: &BTreeMap<String, String>) -> Result<()> {
        if self.is_running() {
            bail!("strategy session already running; stop it first");
        }
        if assignments.is_empty() {
            bail!("at least one code assignment is required");
        }

        let shared = &self.shared;
        let config = shared.config();

        // Fresh risk gate per session.
        let journal_path = if config.risk_journal_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&config.risk_journal_path))
        };
        let gate = Arc::new(RiskGate::with_clock(
            risk_config_from(&config),
            journal_path,
            Arc::clone(&shared.clock),
        ));
        let (cmd_tx, cmd_rx) = unbounded_channel::<RunnerCommand>();
        {
            let log_shared = Arc::clone(shared);
            gate.set_alert_hook(Arc::new(move |alert| {
                let mut message = format!("risk alert [{}] {}", alert.level.as_str(), alert.message);
                if !alert.code.is_empty() {
                    message.push_str(&format!(" ({})", alert.code));
                }
                log_shared.log(&message);
            }));
            let stop_tx = cmd_tx.clone();
            gate.set_stop_trading_hook(Arc::new(move |reason| {
                let _ = stop_tx.send(RunnerCommand::RiskStop(reason.to_string()));
            }));
        }
        *shared.risk.lock().expect("runner risk lock poisoned") = Some(Arc::clone(&gate));
        *shared.commands.lock().expect("runner cmd lock poisoned") = Some(cmd_tx);

        // One strategy instance per code, wired to the intent queue.
        let (intent_tx, intent_rx) = unbounded_channel::<Order>();
        {
            let mut session = shared.session.lock().expect("runner session lock poisoned");
            *session = SessionState::default();
            for (code, name) in assignments {
                let strategy = shared
                    .registry
                    .instantiate(name)
                    .with_context(|| format!("load strategy '{name}' for {code}"))?;
                let mut cell = StrategyCell::new(Arc::clone(&shared.clock));
                cell.set_capital(config.initial_capital);
                cell.set_intent_sink(intent_tx.clone());
                let log_shared = Arc::clone(shared);
                let log_code = code.clone();
                cell.set_log_sink(Arc::new(move |message| {
                    log_shared.log(&format!("[{log_code}] {message}"));
                }));
                let mut slot = StrategySlot::new(strategy, cell);
                slot.start();
                session.slots.insert(code.clone(), slot);
            }
            session.codes = assignments.keys().cloned().collect();
        }
        shared.log(&format!(
            "starting session: {}",
            assignments
                .iter()
                .map(|(code, name)| format!("{code}:{name}"))
                .collect::<Vec<_>>()
                .join(", ")
        ));

        // Broker: build, wire events, connect + login + arm trading.
        let broker = make_broker(&broker_config_from(&config)?)
            .map_err(|e| anyhow::anyhow!("create broker: {e}"))?;
        shared.engine.set_broker(broker);
        let (event_tx, event_rx) = unbounded_channel::<BrokerEvent>();
        shared.engine.set_event_sender(event_tx);
        if !shared.engine.connect().await {
            bail!("broker connect failed");
        }
        if !shared.engine.login().await {
            shared.engine.disconnect().await;
            bail!("broker login failed");
        }
        shared.engine.start_trading();

        // Initial account/position snapshot.
        let positions = shared.engine.positions().await;
        {
            let mut session = shared.session.lock().expect("runner session lock poisoned");
            session.positions = positions
                .into_iter()
                .map(|p| (p.code.clone(), p))
                .collect();
        }
        if let Some(account) = shared.engine.account().await {
            shared.update_account_state(account);
        }

        // Data source, selected by configuration.
        let feed = self.build_feed(&config)?;
        shared.hub.attach_source(Arc::clone(&feed));
        *shared.feed.lock().expect("runner feed lock poisoned") = Some(feed);

        let codes: Vec<String> = assignments.keys().cloned().collect();
        shared.hub.subscribe(&codes);
        shared
            .hub
            .connect()
            .await
            .map_err(|e| anyhow::anyhow!("data source connect failed: {e}"))?;

        // Snapshot fanout into the session.
        let snapshot_shared = Arc::clone(shared);
        let callback_id = shared.hub.add_snapshot_callback(
            Arc::new(move |snapshot| snapshot_shared.on_snapshot(snapshot)),
            None,
        );
        *shared
            .snapshot_cb
            .lock()
            .expect("runner snapshot lock poisoned") = Some(callback_id);

        shared.hub.start().await;
        shared.running.store(true, Ordering::SeqCst);

        self.spawn_workers(intent_rx, event_rx, cmd_rx);
        shared.log("strategy session started");
        Ok(())
    }

    fn build_feed(&self, config: &AppConfig) -> Result<Arc<dyn FeedSource>> {
        let source = config.data_source.to_ascii_lowercase();
        let feed: Arc<dyn FeedSource> = match source.as_str() {
            "simulated" => Arc::new(SimulatedFeed::with_clock(
                Duration::from_secs_f64(config.sim_interval.max(0.01)),
                config.sim_volatility,
                None,
                Arc::clone(&self.shared.clock),
            )),
            "csv" => {
                if config.csv_data_path.is_empty() {
                    bail!("csv data source requires csv_data_path");
                }
                Arc::new(CsvReplayFeed::new(
                    &config.csv_data_path,
                    config.csv_loop,
                    config.csv_speed,
                ))
            }
            // Remote consolidators poll an injected quote boundary.
            "akshare" | "tushare" | "multisource" => {
                let provider = self
                    .shared
                    .quote_provider
                    .lock()
                    .expect("runner provider lock poisoned")
                    .clone()
                    .context("remote data source requires a quote provider")?;
                Arc::new(HttpPollingFeed::new(
                    provider,
                    Duration::from_secs_f64(config.http_data_interval.max(1.0)),
                ))
            }
            other => bail!("unsupported data source '{other}'"),
        };
        Ok(feed)
    }

    fn spawn_workers(
        self: &Arc<Self>,
        mut intent_rx: UnboundedReceiver<Order>,
        mut event_rx: UnboundedReceiver<BrokerEvent>,
        mut cmd_rx: UnboundedReceiver<RunnerCommand>,
    ) {
        let mut tasks = self.shared.tasks.lock().expect("runner tasks lock poisoned");

        let runner = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(order) = intent_rx.recv().await {
                runner.handle_intent(order).await;
            }
        }));

        let runner = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                runner.handle_broker_event(event).await;
            }
        }));

        let runner = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                match command {
                    RunnerCommand::RiskStop(reason) => {
                        {
                            let mut session = runner
                                .shared
                                .session
                                .lock()
                                .expect("runner session lock poisoned");
                            session.risk_pause_reason = Some(reason.clone());
                        }
                        runner.shared.log(&format!("risk stop: {reason}"));
                        runner.stop().await;
                    }
                }
            }
        }));

        // Periodic account refresh keeps drawdown checks alive when the
        // broker only answers polls.
        let runner = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(REFRESH_TICK).await;
                if !runner.shared.running.load(Ordering::SeqCst) {
                    break;
                }
                runner.refresh_portfolio().await;
            }
        }));
    }

    // ------------------------------------------------------------------
    // Intent routing
    // ------------------------------------------------------------------

    async fn handle_intent(self: &Arc<Self>, order: Order) {
        let shared = &self.shared;
        if !shared.engine.is_trading() {
            shared.log("trading engine inactive, dropping order intent");
            return;
        }
        if order.quantity <= 0 {
            return;
        }

        let (allowed, reason) = self.check_risk(&order).await;
        if !allowed {
            let mut session = shared.session.lock().expect("runner session lock poisoned");
            if let Some(slot) = session.slots.get_mut(&order.code) {
                slot.cell
                    .mark_order_status(&order.order_id, OrderStatus::Rejected);
            }
            drop(session);
            shared.log(&format!("risk gate rejected order: {reason}"));
            return;
        }

        if !shared.config().strategy_auto_execute {
            {
                let mut session = shared.session.lock().expect("runner session lock poisoned");
                if let Some(slot) = session.slots.get_mut(&order.code) {
                    slot.cell
                        .mark_order_status(&order.order_id, OrderStatus::Pending);
                }
            }
            shared.log(&format!(
                "strategy signal held for confirmation: {} {} {}@{:.2}",
                order.code,
                order.side.wire(),
                order.quantity,
                order.price
            ));
            let sink = shared
                .signal_sink
                .lock()
                .expect("runner signal lock poisoned")
                .clone();
            if let Some(sink) = sink {
                let mut held = order.clone();
                held.status = OrderStatus::Pending;
                sink(&held);
            }
            return;
        }

        let result = match order.side {
            Side::Buy => {
                shared
                    .engine
                    .buy(&order.code, order.price, order.quantity, order.order_type)
                    .await
            }
            Side::Sell => {
                shared
                    .engine
                    .sell(&order.code, order.price, order.quantity, order.order_type)
                    .await
            }
        };

        if result.success {
            let broker_order_id = result.order_id.clone();
            let mut session = shared.session.lock().expect("runner session lock poisoned");
            if let Some(slot) = session.slots.get_mut(&order.code) {
                slot.cell.rebind_order_id(&order.order_id, &broker_order_id);
            }
            session
                .order_owner
                .insert(broker_order_id, order.code.clone());
            drop(session);
            shared.log(&format!(
                "order routed: {} {} {}",
                order.code,
                order.side.wire(),
                order.quantity
            ));
        } else {
            let mut session = shared.session.lock().expect("runner session lock poisoned");
            if let Some(slot) = session.slots.get_mut(&order.code) {
                slot.cell
                    .mark_order_status(&order.order_id, OrderStatus::Rejected);
            }
            drop(session);
            shared.log(&format!("order routing failed: {}", result.message));
        }
    }

    /// Pre-trade evaluation: T+1 sellable guard for SELLs, then the gate.
    async fn check_risk(self: &Arc<Self>, order: &Order) -> (bool, String) {
        let shared = &self.shared;
        let Some(gate) = shared.gate() else {
            return (true, String::new());
        };

        if order.side == Side::Sell {
            let sellable = shared.engine.sellable_quantity(&order.code).await;
            if sellable < order.quantity {
                return (
                    false,
                    "T+1 restriction: today's buys settle next trading day".to_string(),
                );
            }
        }

        let account = {
            let session = shared.session.lock().expect("runner session lock poisoned");
            session.last_account.clone()
        };
        let account = match account {
            Some(account) => Some(account),
            None => shared.engine.account().await,
        };
        let Some(account) = account else {
            return (true, String::new());
        };

        let (positions, current_price) = {
            let session = shared.session.lock().expect("runner session lock poisoned");
            let mut positions: BTreeMap<String, Position> = session
                .positions
                .iter()
                .map(|(code, p)| (code.clone(), p.clone()))
                .collect();
            for (code, position) in positions.iter_mut() {
                if let Some(price) = session.latest_prices.get(code) {
                    if *price > 0.0 {
                        position.current_price = *price;
                    }
                }
            }
            let current_price = session
                .latest_prices
                .get(&order.code)
                .copied()
                .filter(|p| *p > 0.0)
                .unwrap_or(order.price);
            (positions, current_price)
        };

        let cash = account.cash;
        let mut total_value = account.total_value;
        if total_value <= 0.0 {
            total_value = cash + positions.values().map(Position::market_value).sum::<f64>();
        }
        if total_value <= 0.0 {
            total_value = (order.price * order.quantity.max(1) as f64).max(1.0);
        }

        gate.check_order(order, &positions, cash, total_value, current_price)
    }

    // ------------------------------------------------------------------
    // Broker events
    // ------------------------------------------------------------------

    async fn handle_broker_event(self: &Arc<Self>, event: BrokerEvent) {
        let shared = &self.shared;
        match event {
            BrokerEvent::Order(order) => {
                let mut session = shared.session.lock().expect("runner session lock poisoned");
                let owner = session.order_owner.get(&order.order_id).cloned();
                if let Some(code) = owner {
                    if let Some(slot) = session.slots.get_mut(&code) {
                        slot.deliver_order_update(&order);
                    }
                }
                drop(session);
                debug!(order_id = %order.order_id, status = %order.status, "order update");
            }
            BrokerEvent::Trade(trade) => {
                let realized_loss = {
                    let mut session =
                        shared.session.lock().expect("runner session lock poisoned");
                    let owner = session
                        .order_owner
                        .get(&trade.order_id)
                        .cloned()
                        .or_else(|| {
                            session
                                .slots
                                .contains_key(&trade.code)
                                .then(|| trade.code.clone())
                        });
                    let mut realized_loss = None;
                    if let Some(code) = owner {
                        if let Some(slot) = session.slots.get_mut(&code) {
                            if trade.side == Side::Sell {
                                if let Some(position) = slot.cell.position_for(&trade.code) {
                                    let pnl = (trade.price - position.avg_cost)
                                        * trade.quantity as f64
                                        - trade.commission;
                                    if pnl < 0.0 {
                                        realized_loss = Some(-pnl);
                                    }
                                }
                            }
                            slot.deliver_fill(&trade);
                        }
                    }
                    session.order_owner.remove(&trade.order_id);
                    realized_loss
                };

                shared.log(&format!(
                    "fill: {} {} {}@{:.2}",
                    trade.code,
                    trade.side.wire(),
                    trade.quantity,
                    trade.price
                ));
                if let Some(gate) = shared.gate() {
                    gate.on_trade_completed();
                    if let Some(loss) = realized_loss {
                        gate.check_daily_loss(loss);
                    }
                }
                self.refresh_portfolio().await;
            }
            BrokerEvent::Position(position) => {
                let checked = {
                    let mut session =
                        shared.session.lock().expect("runner session lock poisoned");
                    if position.quantity <= 0 {
                        session.positions.remove(&position.code);
                        None
                    } else {
                        let mut position = position;
                        if let Some(price) = session.latest_prices.get(&position.code) {
                            if *price > 0.0 {
                                position.current_price = *price;
                            }
                        }
                        session
                            .positions
                            .insert(position.code.clone(), position.clone());
                        Some(position)
                    }
                };
                if let (Some(position), Some(gate)) = (checked, shared.gate()) {
                    gate.check_position(&position);
                }
            }
            BrokerEvent::Account(account) => {
                shared.update_account_state(account);
            }
            BrokerEvent::Error(message) => {
                warn!(target: "runner", "broker error: {message}");
            }
            BrokerEvent::Connected
            | BrokerEvent::Disconnected
            | BrokerEvent::LoggedIn
            | BrokerEvent::LoggedOut => {}
        }
    }

    /// Re-query positions and the account, feeding the drawdown check.
    async fn refresh_portfolio(self: &Arc<Self>) {
        let shared = &self.shared;
        let positions = shared.engine.positions().await;
        {
            let mut session = shared.session.lock().expect("runner session lock poisoned");
            let latest = session.latest_prices.clone();
            session.positions = positions
                .into_iter()
                .map(|mut p| {
                    if let Some(price) = latest.get(&p.code) {
                        if *price > 0.0 {
                            p.current_price = *price;
                        }
                    }
                    (p.code.clone(), p)
                })
                .collect();
        }
        if let Some(account) = shared.engine.account().await {
            shared.update_account_state(account);
        }
    }

    // ------------------------------------------------------------------
    // Stop & status
    // ------------------------------------------------------------------

    pub async fn stop(self: &Arc<Self>) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        shared.log("stopping strategy session");

        if let Some(id) = shared
            .snapshot_cb
            .lock()
            .expect("runner snapshot lock poisoned")
            .take()
        {
            shared.hub.remove_callback(id);
        }

        let codes = {
            let session = shared.session.lock().expect("runner session lock poisoned");
            session.codes.clone()
        };
        if !codes.is_empty() {
            shared.hub.unsubscribe(&codes);
        }
        shared.hub.stop().await;
        shared.hub.disconnect().await;
        *shared.feed.lock().expect("runner feed lock poisoned") = None;

        shared.engine.stop_trading();
        shared.engine.disconnect().await;

        {
            let mut session = shared.session.lock().expect("runner session lock poisoned");
            for slot in session.slots.values_mut() {
                slot.stop();
            }
            session.slots.clear();
            session.order_owner.clear();
            session.codes.clear();
            session.latest_prices.clear();
        }

        // Leave the gate re-armed for the next session.
        if let Some(gate) = shared.gate() {
            gate.set_trading_allowed(true);
        }
        *shared.commands.lock().expect("runner cmd lock poisoned") = None;

        let tasks: Vec<JoinHandle<()>> = shared
            .tasks
            .lock()
            .expect("runner tasks lock poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        shared.log("strategy session stopped");
    }

    /// Current session view of a strategy's position, for tests and UIs.
    pub fn strategy_position(&self, code: &str) -> i64 {
        let session = self
            .shared
            .session
            .lock()
            .expect("runner session lock poisoned");
        session
            .slots
            .get(code)
            .map(|slot| {
                slot.cell
                    .position_for(code)
                    .map(|p| p.quantity)
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    pub fn risk_summary(&self) -> Option<RunnerStatus> {
        let gate = self.shared.gate()?;
        let (positions, total_value, reason) = {
            let session = self
                .shared
                .session
                .lock()
                .expect("runner session lock poisoned");
            let positions: BTreeMap<String, Position> = session
                .positions
                .iter()
                .map(|(code, p)| (code.clone(), p.clone()))
                .collect();
            let mut total_value = session
                .last_account
                .as_ref()
                .map(|a| a.total_value)
                .unwrap_or(0.0);
            if total_value <= 0.0 {
                let cash = session
                    .last_account
                    .as_ref()
                    .map(|a| a.cash)
                    .unwrap_or(0.0);
                total_value = cash + positions.values().map(Position::market_value).sum::<f64>();
            }
            (
                positions,
                total_value,
                session.risk_pause_reason.clone().unwrap_or_default(),
            )
        };
        Some(RunnerStatus {
            risk: gate.summary(&positions, total_value),
            is_running: self.is_running(),
            risk_paused_reason: reason,
        })
    }

    /// Manually clear risk counters and alerts and re-enable trading.
    pub fn reset_risk_state(&self) {
        if let Some(gate) = self.shared.gate() {
            gate.clear_alerts();
            gate.reset_daily();
            gate.set_trading_allowed(true);
        }
        let mut session = self
            .shared
            .session
            .lock()
            .expect("runner session lock poisoned");
        session.risk_pause_reason = None;
        drop(session);
        self.shared.log("risk state manually reset");
    }
}

/// Total conversion; reapplying the same snapshot yields the same bar.
fn snapshot_to_bar(snapshot: &Snapshot) -> Bar {
    let price = if snapshot.price > 0.0 {
        snapshot.price
    } else if snapshot.open > 0.0 {
        snapshot.open
    } else {
        0.0
    };
    Bar {
        ts: snapshot.ts,
        open: if snapshot.open > 0.0 { snapshot.open } else { price },
        high: if snapshot.high > 0.0 { snapshot.high } else { price },
        low: if snapshot.low > 0.0 { snapshot.low } else { price },
        close: price,
        volume: snapshot.volume as f64,
        turnover: snapshot.turnover,
    }
}

fn risk_config_from(config: &AppConfig) -> RiskConfig {
    RiskConfig {
        max_position_pct: config.max_position_pct,
        max_total_position_pct: config.max_total_position_pct,
        stop_loss_pct: config.stop_loss_pct,
        take_profit_pct: config.take_profit_pct,
        trailing_stop_pct: config.trailing_stop_pct,
        max_drawdown_pct: config.max_drawdown_pct,
        max_daily_trades: config.max_daily_trades,
        max_daily_loss: config.max_daily_loss,
        min_trade_interval_secs: config.min_trade_interval,
        max_price_deviation: config.max_price_deviation,
    }
}

fn broker_config_from(config: &AppConfig) -> Result<BrokerConfig> {
    let broker_type = BrokerType::parse(&config.broker_type)
        .with_context(|| format!("unsupported broker type '{}'", config.broker_type))?;

    if broker_type != BrokerType::Simulated {
        if config.broker_account.trim().is_empty()
            || config.broker_password.trim().is_empty()
            || config.broker_api_url.trim().is_empty()
        {
            bail!("broker account, password and api url are required");
        }
    }

    Ok(BrokerConfig {
        broker_type,
        account: config.broker_account.trim().to_string(),
        password: config.broker_password.trim().to_string(),
        server: String::new(),
        port: 0,
        base_url: config.broker_api_url.trim().to_string(),
        api_key: config.broker_api_key.clone(),
        api_secret: config.broker_api_secret.clone(),
        sign_method: SignMethod::HmacSha256,
        verify_ssl: config.broker_api_verify_ssl,
        client_cert: if config.broker_api_client_cert.is_empty() {
            None
        } else {
            Some(PathBuf::from(&config.broker_api_client_cert))
        },
        poll_interval: Duration::from_secs(config.api_poll_interval.max(1)),
        timeout: Duration::from_secs(config.api_timeout.max(1)),
        initial_capital: config.initial_capital,
        commission_rate: config.commission_rate,
        slippage: config.slippage,
    })
}
