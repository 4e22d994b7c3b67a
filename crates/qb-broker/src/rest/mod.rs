//! REST gateway adapter base.
//!
//! One scaffold covers every wire-compatible broker: specializations only
//! swap URL paths and connection defaults (see [`RestEndpoints`] and the
//! named constructors on [`RestBroker`]). The adapter owns the auth token
//! lifecycle, optional HMAC request signing, a tolerant response decoder
//! and a background sync worker that keeps local caches fresh by polling.
//!
//! State machine: DISCONNECTED -> (connect: ping) -> CONNECTED ->
//! (login: token) -> AUTHENTICATED -> (logout | disconnect) ->
//! DISCONNECTED. `logout` tears down locally even when the server call
//! fails.

mod endpoints;
pub mod parse;
pub mod sign;

pub use endpoints::RestEndpoints;

use crate::trader::BrokerTrader;
use crate::types::{
    BrokerConfig, BrokerError, BrokerEvent, BrokerEventSender, BrokerType, OrderResult,
};
use async_trait::async_trait;
use parse::OrderFallback;
use qb_schemas::{AccountInfo, Clock, Order, OrderStatus, OrderType, Position, Side, SystemClock, Trade};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Everything about one outgoing request, as seen by a [`RequestAdapter`].
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub params: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub require_auth: bool,
}

/// Test seam: intercepts requests after header construction, before any
/// socket is touched.
pub type RequestAdapter =
    Arc<dyn Fn(&RequestContext) -> Result<Value, BrokerError> + Send + Sync>;

/// Custom signature override `(method, path, payload, timestamp) -> hex`.
pub type CustomSigner = Arc<dyn Fn(&str, &str, &str, &str) -> String + Send + Sync>;

#[derive(Default)]
struct RestCaches {
    orders: BTreeMap<String, Order>,
    positions: BTreeMap<String, Position>,
    trades: Vec<Trade>,
    account: Option<AccountInfo>,
}

struct RestInner {
    config: BrokerConfig,
    endpoints: RestEndpoints,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    token: Mutex<Option<String>>,
    caches: Mutex<RestCaches>,
    events: Mutex<Option<BrokerEventSender>>,
    mock_responses: Mutex<HashMap<(String, String), Value>>,
    request_adapter: Mutex<Option<RequestAdapter>>,
    custom_signer: Mutex<Option<CustomSigner>>,
    connected: AtomicBool,
    logged_in: AtomicBool,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Shared HTTP broker adapter; see the module docs.
pub struct RestBroker {
    inner: Arc<RestInner>,
}

impl RestBroker {
    /// Build an adapter with explicit endpoints.
    pub fn with_parts(
        config: BrokerConfig,
        endpoints: RestEndpoints,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BrokerError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if !config.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(cert_path) = &config.client_cert {
            let pem = std::fs::read(cert_path).map_err(|e| {
                BrokerError::Config(format!("read client cert '{}': {e}", cert_path.display()))
            })?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| BrokerError::Config(format!("parse client cert: {e}")))?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| BrokerError::Config(format!("build http client: {e}")))?;

        Ok(Self {
            inner: Arc::new(RestInner {
                config,
                endpoints,
                client,
                clock,
                token: Mutex::new(None),
                caches: Mutex::new(RestCaches::default()),
                events: Mutex::new(None),
                mock_responses: Mutex::new(HashMap::new()),
                request_adapter: Mutex::new(None),
                custom_signer: Mutex::new(None),
                connected: AtomicBool::new(false),
                logged_in: AtomicBool::new(false),
                running: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
                worker: Mutex::new(None),
            }),
        })
    }

    fn specialized(
        mut config: BrokerConfig,
        endpoints: RestEndpoints,
        default_base_url: &str,
    ) -> Result<Self, BrokerError> {
        if config.base_url.is_empty() {
            config.base_url = default_base_url.to_string();
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self::with_parts(config, endpoints, Arc::new(SystemClock))
    }

    pub fn huatai(config: BrokerConfig) -> Result<Self, BrokerError> {
        Self::specialized(config, RestEndpoints::huatai(), "http://127.0.0.1:7001")
    }

    pub fn zhongxin(config: BrokerConfig) -> Result<Self, BrokerError> {
        Self::specialized(config, RestEndpoints::zhongxin(), "http://127.0.0.1:7002")
    }

    pub fn guotaijunan(config: BrokerConfig) -> Result<Self, BrokerError> {
        Self::specialized(config, RestEndpoints::guotaijunan(), "http://127.0.0.1:7003")
    }

    /// Haitong gateways require SHA-512 signatures.
    pub fn haitong(mut config: BrokerConfig) -> Result<Self, BrokerError> {
        config.sign_method = crate::types::SignMethod::HmacSha512;
        Self::specialized(config, RestEndpoints::haitong(), "https://127.0.0.1:7004")
    }

    pub fn guangfa(config: BrokerConfig) -> Result<Self, BrokerError> {
        Self::specialized(config, RestEndpoints::guangfa(), "https://127.0.0.1:7005")
    }

    /// Register a static response for `(method, path)`; checked before the
    /// request adapter and the network.
    pub fn set_mock_response(&self, method: &str, path: &str, response: Value) {
        self.inner
            .mock_responses
            .lock()
            .expect("rest mocks lock poisoned")
            .insert((method.to_uppercase(), path.to_string()), response);
    }

    pub fn set_request_adapter(&self, adapter: RequestAdapter) {
        *self
            .inner
            .request_adapter
            .lock()
            .expect("rest adapter lock poisoned") = Some(adapter);
    }

    pub fn set_custom_signer(&self, signer: CustomSigner) {
        *self
            .inner
            .custom_signer
            .lock()
            .expect("rest signer lock poisoned") = Some(signer);
    }

    /// The security headers this adapter would attach to a request; empty
    /// when no API key is configured.
    pub fn signed_headers(
        &self,
        method: &str,
        path: &str,
        params: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Vec<(String, String)> {
        self.inner.build_headers(method, path, params, body, false)
    }
}

/// Unwrap the `{data: ...}` envelope: an object merges with its sibling
/// fields (data fields win), any other payload replaces the envelope.
pub fn unwrap_data(value: Value) -> Value {
    if let Value::Object(map) = &value {
        if let Some(data) = map.get("data") {
            if let Value::Object(data_map) = data {
                let mut merged = data_map.clone();
                for (key, val) in map {
                    if key != "data" && !merged.contains_key(key) {
                        merged.insert(key.clone(), val.clone());
                    }
                }
                return Value::Object(merged);
            }
            return data.clone();
        }
    }
    value
}

impl RestInner {
    fn emit(&self, event: BrokerEvent) {
        if let Some(tx) = self.events.lock().expect("rest events lock poisoned").as_ref() {
            let _ = tx.send(event);
        }
    }

    fn emit_error(&self, context: &str, err: &BrokerError) {
        error!(broker = %self.config.broker_type, context, error = %err, "broker call failed");
        self.emit(BrokerEvent::Error(format!("{context}: {err}")));
    }

    fn build_headers(
        &self,
        method: &str,
        path: &str,
        params: &BTreeMap<String, String>,
        body: Option<&Value>,
        require_auth: bool,
    ) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::new();

        if require_auth {
            if let Some(token) = self.token.lock().expect("rest token lock poisoned").as_ref() {
                headers.push(("Authorization".to_string(), format!("Bearer {token}")));
            }
        }

        if !self.config.api_key.is_empty() {
            let timestamp = self.clock.now().format("%Y-%m-%dT%H:%M:%S").to_string();
            let payload = sign::canonical_payload(params, body);
            let custom = self
                .custom_signer
                .lock()
                .expect("rest signer lock poisoned")
                .clone();
            let signature = match custom {
                Some(signer) => signer(method, path, &payload, &timestamp),
                None => sign::build_signature(
                    &self.config.api_secret,
                    method,
                    path,
                    &payload,
                    &timestamp,
                    self.config.sign_method,
                ),
            };
            headers.push(("X-API-Key".to_string(), self.config.api_key.clone()));
            headers.push(("X-Timestamp".to_string(), timestamp));
            headers.push(("X-Signature".to_string(), signature));
        }

        headers
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        params: BTreeMap<String, String>,
        body: Option<Value>,
        require_auth: bool,
    ) -> Result<Value, BrokerError> {
        let mock = self
            .mock_responses
            .lock()
            .expect("rest mocks lock poisoned")
            .get(&(method.to_uppercase(), path.to_string()))
            .cloned();
        if let Some(response) = mock {
            return Ok(unwrap_data(response));
        }

        let headers = self.build_headers(method, path, &params, body.as_ref(), require_auth);

        let adapter = self
            .request_adapter
            .lock()
            .expect("rest adapter lock poisoned")
            .clone();
        if let Some(adapter) = adapter {
            let ctx = RequestContext {
                method: method.to_uppercase(),
                path: path.to_string(),
                headers,
                params,
                body,
                require_auth,
            };
            return adapter(&ctx).map(unwrap_data);
        }

        if self.config.base_url.is_empty() {
            return Err(BrokerError::Config("base_url is not configured".into()));
        }

        let url = format!("{}{}", self.config.base_url, path);
        let http_method: reqwest::Method = method
            .to_uppercase()
            .parse()
            .map_err(|_| BrokerError::Config(format!("bad http method '{method}'")))?;

        let mut request = self.client.request(http_method, &url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if !params.is_empty() {
            let pairs: Vec<(&String, &String)> = params.iter().collect();
            request = request.query(&pairs);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let text = response
            .text()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        if text.is_empty() {
            return Ok(json!({}));
        }
        let value: Value =
            serde_json::from_str(&text).map_err(|e| BrokerError::Parse(e.to_string()))?;
        Ok(unwrap_data(value))
    }

    fn extract_token(response: &Value) -> Option<String> {
        parse::str_of(response, &["token", "access_token"])
    }

    // ------------------------------------------------------------------
    // Cache refresh (login kick-off + background sync)
    // ------------------------------------------------------------------

    async fn refresh_account(&self) -> Option<AccountInfo> {
        if !self.logged_in.load(Ordering::SeqCst) {
            return None;
        }
        match self
            .request("GET", &self.endpoints.account.clone(), BTreeMap::new(), None, true)
            .await
        {
            Ok(data) => {
                let account = parse::parse_account(
                    &data,
                    &self.config.account,
                    self.config.broker_type.as_str(),
                );
                self.caches.lock().expect("rest caches lock poisoned").account =
                    Some(account.clone());
                self.emit(BrokerEvent::Account(account.clone()));
                Some(account)
            }
            Err(e) => {
                self.emit_error("query account", &e);
                None
            }
        }
    }

    async fn refresh_positions(&self) -> Vec<Position> {
        if !self.logged_in.load(Ordering::SeqCst) {
            return Vec::new();
        }
        match self
            .request("GET", &self.endpoints.positions.clone(), BTreeMap::new(), None, true)
            .await
        {
            Ok(data) => {
                let positions: Vec<Position> = parse::ensure_list(&data, "positions")
                    .iter()
                    .map(parse::parse_position)
                    .collect();
                {
                    let mut caches = self.caches.lock().expect("rest caches lock poisoned");
                    caches.positions =
                        positions.iter().map(|p| (p.code.clone(), p.clone())).collect();
                }
                for position in &positions {
                    self.emit(BrokerEvent::Position(position.clone()));
                }
                positions
            }
            Err(e) => {
                self.emit_error("query positions", &e);
                Vec::new()
            }
        }
    }

    async fn refresh_orders(&self, status: Option<OrderStatus>) -> Vec<Order> {
        if !self.logged_in.load(Ordering::SeqCst) {
            return Vec::new();
        }
        let mut params = BTreeMap::new();
        if let Some(status) = status {
            params.insert("status".to_string(), status.wire().to_string());
        }
        match self
            .request("GET", &self.endpoints.orders.clone(), params, None, true)
            .await
        {
            Ok(data) => {
                let now = self.clock.now();
                let fallback = OrderFallback::default();
                let orders: Vec<Order> = parse::ensure_list(&data, "orders")
                    .iter()
                    .map(|item| parse::parse_order(item, &fallback, now))
                    .collect();
                {
                    let mut caches = self.caches.lock().expect("rest caches lock poisoned");
                    for order in &orders {
                        caches.orders.insert(order.order_id.clone(), order.clone());
                    }
                }
                for order in &orders {
                    self.emit(BrokerEvent::Order(order.clone()));
                }
                orders
            }
            Err(e) => {
                self.emit_error("query orders", &e);
                Vec::new()
            }
        }
    }

    async fn refresh_trades(&self) -> Vec<Trade> {
        if !self.logged_in.load(Ordering::SeqCst) {
            return Vec::new();
        }
        match self
            .request("GET", &self.endpoints.trades.clone(), BTreeMap::new(), None, true)
            .await
        {
            Ok(data) => {
                let now = self.clock.now();
                let trades: Vec<Trade> = parse::ensure_list(&data, "trades")
                    .iter()
                    .map(|item| parse::parse_trade(item, now))
                    .collect();
                self.caches.lock().expect("rest caches lock poisoned").trades = trades.clone();
                for trade in &trades {
                    self.emit(BrokerEvent::Trade(trade.clone()));
                }
                trades
            }
            Err(e) => {
                self.emit_error("query trades", &e);
                Vec::new()
            }
        }
    }

    fn start_polling(inner: &Arc<RestInner>) {
        if inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let worker_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_inner.notify.notified() => {}
                    _ = tokio::time::sleep(worker_inner.config.poll_interval) => {}
                }
                if !worker_inner.running.load(Ordering::SeqCst) {
                    break;
                }
                if !worker_inner.logged_in.load(Ordering::SeqCst) {
                    continue;
                }
                worker_inner.refresh_account().await;
                worker_inner.refresh_positions().await;
                worker_inner.refresh_orders(None).await;
                worker_inner.refresh_trades().await;
            }
        });
        *inner.worker.lock().expect("rest worker lock poisoned") = Some(handle);
    }

    async fn stop_polling(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        let handle = self.worker.lock().expect("rest worker lock poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
    }
}

#[async_trait]
impl BrokerTrader for RestBroker {
    fn broker_type(&self) -> BrokerType {
        self.inner.config.broker_type
    }

    fn set_event_sender(&self, sender: BrokerEventSender) {
        *self.inner.events.lock().expect("rest events lock poisoned") = Some(sender);
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.inner.logged_in.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        let ping = self.inner.endpoints.ping.clone();
        match self
            .inner
            .request("GET", &ping, BTreeMap::new(), None, false)
            .await
        {
            Ok(_) => {
                self.inner.connected.store(true, Ordering::SeqCst);
                info!(broker = %self.inner.config.broker_type, "gateway connected");
                self.inner.emit(BrokerEvent::Connected);
                Ok(())
            }
            Err(e) => {
                self.inner.emit_error("connect", &e);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        self.inner.stop_polling().await;
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.logged_in.store(false, Ordering::SeqCst);
        *self.inner.token.lock().expect("rest token lock poisoned") = None;
        info!(broker = %self.inner.config.broker_type, "gateway disconnected");
        self.inner.emit(BrokerEvent::Disconnected);
    }

    async fn login(&self) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let body = json!({
            "account": self.inner.config.account,
            "password": self.inner.config.password,
            "server": self.inner.config.server,
            "port": self.inner.config.port,
        });
        let login_path = self.inner.endpoints.login.clone();
        let response = match self
            .inner
            .request("POST", &login_path, BTreeMap::new(), Some(body), false)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.inner.emit_error("login", &e);
                return Err(e);
            }
        };

        let token = RestInner::extract_token(&response)
            .ok_or_else(|| BrokerError::Parse("login response carried no token".into()))?;
        *self.inner.token.lock().expect("rest token lock poisoned") = Some(token);
        self.inner.logged_in.store(true, Ordering::SeqCst);
        info!(
            broker = %self.inner.config.broker_type,
            account = %self.inner.config.account,
            "logged in"
        );
        self.inner.emit(BrokerEvent::LoggedIn);

        // Prime the caches, then keep them fresh in the background.
        self.inner.refresh_account().await;
        self.inner.refresh_positions().await;
        self.inner.refresh_orders(None).await;
        RestInner::start_polling(&self.inner);
        Ok(())
    }

    async fn logout(&self) {
        if self.is_logged_in() {
            let body = json!({"account": self.inner.config.account});
            let logout_path = self.inner.endpoints.logout.clone();
            if let Err(e) = self
                .inner
                .request("POST", &logout_path, BTreeMap::new(), Some(body), true)
                .await
            {
                warn!(broker = %self.inner.config.broker_type, error = %e, "logout call failed");
            }
        }
        self.inner.stop_polling().await;
        self.inner.logged_in.store(false, Ordering::SeqCst);
        *self.inner.token.lock().expect("rest token lock poisoned") = None;
        info!(broker = %self.inner.config.broker_type, "logged out");
        self.inner.emit(BrokerEvent::LoggedOut);
    }

    async fn send_order(
        &self,
        code: &str,
        side: Side,
        price: f64,
        quantity: i64,
        order_type: OrderType,
    ) -> OrderResult {
        if !self.is_logged_in() {
            return OrderResult::fail("not logged in");
        }

        let body = json!({
            "code": code,
            "side": side.wire(),
            "price": price,
            "quantity": quantity,
            "order_type": order_type.wire(),
        });
        let order_path = self.inner.endpoints.order.clone();
        match self
            .inner
            .request("POST", &order_path, BTreeMap::new(), Some(body), true)
            .await
        {
            Ok(response) => {
                // Either `{order: {...}}` or a flat order object.
                let order_data = match response.get("order") {
                    Some(Value::Object(_)) => response["order"].clone(),
                    _ => response,
                };
                let fallback = OrderFallback {
                    code: code.to_string(),
                    side: Some(side),
                    price,
                    quantity,
                };
                let order = parse::parse_order(&order_data, &fallback, self.inner.clock.now());
                self.inner
                    .caches
                    .lock()
                    .expect("rest caches lock poisoned")
                    .orders
                    .insert(order.order_id.clone(), order.clone());
                self.inner.emit(BrokerEvent::Order(order.clone()));
                OrderResult::ok(order)
            }
            Err(e) => {
                self.inner.emit_error("send order", &e);
                OrderResult::fail(e.to_string())
            }
        }
    }

    async fn cancel_order(&self, order_id: &str) -> bool {
        if !self.is_logged_in() {
            return false;
        }
        let path = self.inner.endpoints.cancel_path(order_id);
        match self
            .inner
            .request("POST", &path, BTreeMap::new(), None, true)
            .await
        {
            Ok(_) => {
                let updated = {
                    let mut caches = self.inner.caches.lock().expect("rest caches lock poisoned");
                    caches.orders.get_mut(order_id).map(|order| {
                        order.status = OrderStatus::Cancelled;
                        order.update_time = Some(self.inner.clock.now());
                        order.clone()
                    })
                };
                if let Some(order) = updated {
                    self.inner.emit(BrokerEvent::Order(order));
                }
                true
            }
            Err(e) => {
                self.inner.emit_error("cancel order", &e);
                false
            }
        }
    }

    async fn modify_order(
        &self,
        order_id: &str,
        price: Option<f64>,
        quantity: Option<i64>,
    ) -> bool {
        if !self.is_logged_in() {
            return false;
        }
        let mut body = serde_json::Map::new();
        if let Some(price) = price {
            body.insert("price".to_string(), json!(price));
        }
        if let Some(quantity) = quantity {
            body.insert("quantity".to_string(), json!(quantity));
        }
        if body.is_empty() {
            return false;
        }
        let path = self.inner.endpoints.modify_path(order_id);
        match self
            .inner
            .request("PUT", &path, BTreeMap::new(), Some(Value::Object(body)), true)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                self.inner.emit_error("modify order", &e);
                false
            }
        }
    }

    async fn query_account(&self) -> Option<AccountInfo> {
        self.inner.refresh_account().await
    }

    async fn query_positions(&self) -> Vec<Position> {
        self.inner.refresh_positions().await
    }

    async fn query_orders(&self, status: Option<OrderStatus>) -> Vec<Order> {
        self.inner.refresh_orders(status).await
    }

    async fn query_trades(&self) -> Vec<Trade> {
        self.inner.refresh_trades().await
    }

    async fn sellable_quantity(&self, code: &str) -> i64 {
        // The gateway enforces the venue's settlement rules; locally the
        // cached position is the best available answer.
        self.inner
            .caches
            .lock()
            .expect("rest caches lock poisoned")
            .positions
            .get(code)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }
}
