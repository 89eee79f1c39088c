//! Client-side replica of the shared state.
//!
//! A [`Replica`] keeps a full local copy of the [`SharedState`] and keeps it
//! converged with the hub:
//!
//! 1. On startup the last cached copy is loaded for instant offline reads.
//! 2. Each (re)connect fetches the full state over HTTP and overwrites the
//!    local copy; the server always wins over stale or offline-edited data.
//! 3. A WebSocket subscription then folds in every broadcast with the same
//!    semantics the hub used to produce it.
//!
//! Local mutations apply immediately, go to the cache file, and are emitted
//! to the hub only while connected. There is no offline replay queue; edits
//! made offline survive locally until the next connect overwrites them.
//! Transport loss triggers reconnection with capped exponential backoff.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use lunchline_core::{MenuItem, Order, OrderId, OrderPatch, SharedState, Student};

use crate::protocol::{ClientEvent, ProtocolError, ServerMessage};
use crate::store::StateStore;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the replica.
#[derive(Debug, Clone)]
pub enum ReplicaEvent {
    /// Connected and freshly resynchronized with the server.
    Connected,
    /// Transport lost; reconnection continues in the background.
    Disconnected,
    /// A broadcast changed the local state; the payload is what landed.
    Applied(ServerMessage),
}

/// Replica errors.
#[derive(Debug, Clone)]
pub enum ReplicaError {
    /// The event failed validation and was not applied anywhere.
    Rejected(ProtocolError),
    /// Fetching the full state over HTTP failed.
    HttpFailed(String),
    /// Opening the WebSocket failed.
    ConnectFailed(String),
}

impl std::fmt::Display for ReplicaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(e) => write!(f, "Rejected event: {e}"),
            Self::HttpFailed(e) => write!(f, "State fetch failed: {e}"),
            Self::ConnectFailed(e) => write!(f, "WebSocket connect failed: {e}"),
        }
    }
}

impl std::error::Error for ReplicaError {}

/// Replica configuration.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Base URL of the server, e.g. `http://127.0.0.1:3000`. A bare
    /// `host:port` is treated as http.
    pub server_url: String,
    /// Where the local cache file lives.
    pub cache_path: PathBuf,
    /// First reconnect delay. Default: 500ms.
    pub reconnect_base_ms: u64,
    /// Reconnect delay ceiling. Default: 30s.
    pub reconnect_max_ms: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            cache_path: PathBuf::from("lunchline-cache.json"),
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl ReplicaConfig {
    pub fn new(server_url: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            server_url: server_url.into(),
            cache_path: cache_path.into(),
            ..Self::default()
        }
    }
}

/// The client replica.
///
/// Holds a local copy of the shared state, a file cache for offline starts,
/// and a background connection loop that keeps the copy converged with the
/// hub. All methods are cheap to call from UI code; disk writes happen on
/// blocking threads and network traffic on background tasks.
pub struct Replica {
    config: ReplicaConfig,

    /// The local copy of the state.
    state: Arc<RwLock<SharedState>>,

    /// Connection state, written by the supervisor task.
    conn: Arc<RwLock<ConnectionState>>,

    /// File cache backing offline starts.
    cache: StateStore,

    http: reqwest::Client,

    /// Channel to the WebSocket writer task, present while connected.
    outgoing_tx: Arc<RwLock<Option<mpsc::Sender<ClientEvent>>>>,

    /// Event sender (shared with the background tasks).
    event_tx: mpsc::Sender<ReplicaEvent>,

    /// Event receiver for the application.
    event_rx: Option<mpsc::Receiver<ReplicaEvent>>,

    /// Stop signal for the supervisor.
    stop_tx: watch::Sender<bool>,

    /// Handed to the supervisor on the first `start`.
    supervisor_rx: Option<watch::Receiver<bool>>,
}

impl Replica {
    /// Create a new replica. Nothing runs until [`start`](Self::start).
    pub fn new(config: ReplicaConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            cache: StateStore::new(&config.cache_path),
            config,
            state: Arc::new(RwLock::new(SharedState::default())),
            conn: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            http: reqwest::Client::new(),
            outgoing_tx: Arc::new(RwLock::new(None)),
            event_tx,
            event_rx: Some(event_rx),
            stop_tx,
            supervisor_rx: Some(stop_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ReplicaEvent>> {
        self.event_rx.take()
    }

    /// Start the background connection loop.
    ///
    /// The loop loads the cache, then connects and reconnects forever until
    /// [`stop`](Self::stop) is called or the replica is dropped. Calling
    /// `start` a second time does nothing.
    pub fn start(&mut self) {
        let Some(stop_rx) = self.supervisor_rx.take() else {
            warn!("Replica already started");
            return;
        };
        tokio::spawn(run_supervisor(
            self.config.clone(),
            self.state.clone(),
            self.conn.clone(),
            self.cache.clone(),
            self.http.clone(),
            self.outgoing_tx.clone(),
            self.event_tx.clone(),
            stop_rx,
        ));
    }

    /// Stop syncing. Local reads and mutations keep working against the
    /// cache; the replica cannot be started again.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Validate, apply locally, write the cache, then emit to the hub when
    /// connected.
    ///
    /// Returns whether the event changed local state. A `false` means the
    /// event was a no-op (duplicate add, unknown order id) and nothing was
    /// cached or emitted. Mutations made while disconnected stay local; the
    /// next successful connect overwrites them with the server's view.
    pub async fn submit(&self, event: ClientEvent) -> Result<bool, ReplicaError> {
        event.validate().map_err(ReplicaError::Rejected)?;

        let changed = {
            let mut local = self.state.write().await;
            event.apply_to(&mut local).is_some()
        };
        if !changed {
            debug!("{} changed nothing locally", event.name());
            return Ok(false);
        }

        let snapshot = self.state.read().await.clone();
        write_cache(&self.cache, snapshot).await;

        if *self.conn.read().await == ConnectionState::Connected {
            let tx = self.outgoing_tx.read().await.clone();
            if let Some(tx) = tx {
                if tx.send(event).await.is_err() {
                    debug!("Writer task is gone; change stays local until resync");
                }
            }
        }
        Ok(true)
    }

    /// Add a new order.
    pub async fn add_order(&self, order: Order) -> Result<bool, ReplicaError> {
        self.submit(ClientEvent::OrderAdded(order)).await
    }

    /// Merge a partial update into an existing order.
    pub async fn update_order(&self, patch: OrderPatch) -> Result<bool, ReplicaError> {
        self.submit(ClientEvent::OrderUpdated(patch)).await
    }

    /// Delete an order.
    pub async fn delete_order(&self, id: OrderId) -> Result<bool, ReplicaError> {
        self.submit(ClientEvent::OrderDeleted(id)).await
    }

    /// Replace the menu.
    pub async fn replace_menu(&self, items: Vec<MenuItem>) -> Result<bool, ReplicaError> {
        self.submit(ClientEvent::MenuUpdated(items)).await
    }

    /// Lock or unlock the order form.
    pub async fn set_form_locked(&self, locked: bool) -> Result<bool, ReplicaError> {
        self.submit(ClientEvent::FormLockUpdated(locked)).await
    }

    /// Change the form title and/or description.
    pub async fn update_form_settings(
        &self,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<bool, ReplicaError> {
        self.submit(ClientEvent::FormSettingsUpdated { title, description })
            .await
    }

    /// Swap in a complete dataset.
    pub async fn replace_all(
        &self,
        orders: Vec<Order>,
        menu_items: Vec<MenuItem>,
        students: Option<Vec<Student>>,
    ) -> Result<bool, ReplicaError> {
        self.submit(ClientEvent::ReplaceAll {
            orders,
            menu_items,
            students,
        })
        .await
    }

    /// Snapshot of the local state.
    pub async fn state(&self) -> SharedState {
        self.state.read().await.clone()
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.conn.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    /// Get the cache file path.
    pub fn cache_path(&self) -> &Path {
        self.cache.path()
    }
}

async fn run_supervisor(
    config: ReplicaConfig,
    state: Arc<RwLock<SharedState>>,
    conn: Arc<RwLock<ConnectionState>>,
    cache: StateStore,
    http: reqwest::Client,
    outgoing: Arc<RwLock<Option<mpsc::Sender<ClientEvent>>>>,
    event_tx: mpsc::Sender<ReplicaEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    // Cached state first, so offline starts render immediately.
    let preload = {
        let cache = cache.clone();
        tokio::task::spawn_blocking(move || cache.try_load()).await
    };
    match preload {
        Ok(Ok(cached)) => {
            *state.write().await = cached;
            info!("Loaded cached state from {}", cache.path().display());
        }
        Ok(Err(e)) => info!("Starting with empty state: {e}"),
        Err(e) => warn!("Cache preload task failed: {e}"),
    }

    let mut first_attempt = true;
    let mut attempt: u32 = 0;
    loop {
        if stop_rx.has_changed().is_err() || *stop_rx.borrow() {
            break;
        }

        *conn.write().await = if first_attempt {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        first_attempt = false;

        match connect_once(
            &config, &state, &conn, &cache, &http, &outgoing, &event_tx, &mut stop_rx,
        )
        .await
        {
            Ok(()) => attempt = 0,
            Err(e) => {
                attempt = attempt.saturating_add(1);
                *conn.write().await = ConnectionState::Disconnected;
                warn!("Connection attempt failed: {e}");
            }
        }

        if stop_rx.has_changed().is_err() || *stop_rx.borrow() {
            break;
        }

        let delay = backoff_delay(&config, attempt);
        debug!("Retrying in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => break,
        }
    }

    *conn.write().await = ConnectionState::Disconnected;
    debug!("Replica supervisor stopped");
}

/// One full session: hydrate over HTTP, then pump the WebSocket until it
/// closes. `Ok` means the session ended (or a stop was requested), `Err`
/// that it never got established.
async fn connect_once(
    config: &ReplicaConfig,
    state: &Arc<RwLock<SharedState>>,
    conn: &Arc<RwLock<ConnectionState>>,
    cache: &StateStore,
    http: &reqwest::Client,
    outgoing: &Arc<RwLock<Option<mpsc::Sender<ClientEvent>>>>,
    event_tx: &mpsc::Sender<ReplicaEvent>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<(), ReplicaError> {
    // The server's state wins over whatever the cache or offline edits
    // left behind.
    let data_url = api_data_url(&config.server_url);
    let fetched = tokio::select! {
        res = fetch_state(http, &data_url) => res?,
        _ = stop_rx.changed() => return Ok(()),
    };
    *state.write().await = fetched.clone();
    write_cache(cache, fetched).await;

    let url = sync_url(&config.server_url);
    let (ws, _) = tokio::select! {
        res = connect_async(&url) => {
            res.map_err(|e| ReplicaError::ConnectFailed(e.to_string()))?
        }
        _ = stop_rx.changed() => return Ok(()),
    };
    info!("Connected to {url}");

    let (ws_writer, ws_reader) = ws.split();
    let (out_tx, out_rx) = mpsc::channel::<ClientEvent>(256);
    *outgoing.write().await = Some(out_tx);
    *conn.write().await = ConnectionState::Connected;
    let _ = event_tx.send(ReplicaEvent::Connected).await;

    tokio::spawn(run_writer(ws_writer, out_rx));

    pump(ws_reader, state, cache, event_tx, stop_rx).await;

    // Dropping the sender ends the writer task.
    *outgoing.write().await = None;
    *conn.write().await = ConnectionState::Disconnected;
    let _ = event_tx.send(ReplicaEvent::Disconnected).await;
    info!("Connection to {url} closed");
    Ok(())
}

/// Apply inbound broadcasts until the socket closes or a stop is requested.
async fn pump(
    mut reader: WsSource,
    state: &Arc<RwLock<SharedState>>,
    cache: &StateStore,
    event_tx: &mpsc::Sender<ReplicaEvent>,
    stop_rx: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let message = match ServerMessage::decode(text.as_str()) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Ignoring undecodable frame: {e}");
                            continue;
                        }
                    };
                    let changed = {
                        let mut local = state.write().await;
                        message.apply_to(&mut local)
                    };
                    if changed {
                        let snapshot = state.read().await.clone();
                        write_cache(cache, snapshot).await;
                        let _ = event_tx.send(ReplicaEvent::Applied(message)).await;
                    } else {
                        debug!("{} changed nothing locally", message.name());
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive failed: {e}");
                    break;
                }
            },
            _ = stop_rx.changed() => break,
        }
    }
}

/// Forward locally emitted events into the WebSocket.
async fn run_writer(mut sink: WsSink, mut out_rx: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = out_rx.recv().await {
        let text = match event.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not encode {}: {e}", event.name());
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

async fn fetch_state(http: &reqwest::Client, url: &str) -> Result<SharedState, ReplicaError> {
    let response = http
        .get(url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| ReplicaError::HttpFailed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ReplicaError::HttpFailed(format!(
            "GET {url} answered {}",
            response.status()
        )));
    }
    response
        .json::<SharedState>()
        .await
        .map_err(|e| ReplicaError::HttpFailed(e.to_string()))
}

async fn write_cache(cache: &StateStore, snapshot: SharedState) {
    let cache = cache.clone();
    match tokio::task::spawn_blocking(move || cache.save(&snapshot)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Cache write failed: {e}"),
        Err(e) => warn!("Cache write task failed: {e}"),
    }
}

fn http_base(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn api_data_url(base: &str) -> String {
    format!("{}/api/data", http_base(base))
}

fn sync_url(base: &str) -> String {
    let base = http_base(base);
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base}")
    };
    format!("{ws}/sync")
}

fn backoff_delay(config: &ReplicaConfig, attempt: u32) -> Duration {
    let exp = attempt.min(16);
    let ms = config.reconnect_base_ms.saturating_mul(1u64 << exp);
    Duration::from_millis(ms.min(config.reconnect_max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunchline_core::OrderItem;
    use tempfile::{tempdir, TempDir};

    fn test_config(dir: &TempDir) -> ReplicaConfig {
        ReplicaConfig {
            server_url: "http://127.0.0.1:1".to_string(),
            cache_path: dir.path().join("cache.json"),
            ..ReplicaConfig::default()
        }
    }

    fn sample_order() -> Order {
        Order {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            grade: "12".to_string(),
            items: vec![OrderItem::new("Nachos", 1, 4.5)],
            ..Order::new()
        }
    }

    #[tokio::test]
    async fn test_replica_initial_state() {
        let dir = tempdir().unwrap();
        let mut replica = Replica::new(test_config(&dir));

        assert_eq!(
            replica.connection_state().await,
            ConnectionState::Disconnected
        );
        assert_eq!(replica.state().await, SharedState::default());
        assert_eq!(replica.server_url(), "http://127.0.0.1:1");
        assert!(replica.take_event_rx().is_some());
        assert!(replica.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_offline_mutation_applies_and_caches() {
        let dir = tempdir().unwrap();
        let replica = Replica::new(test_config(&dir));
        let order = sample_order();
        let id = order.id.clone();

        assert!(replica.add_order(order).await.unwrap());
        assert!(replica.state().await.order(&id).is_some());

        // The mutation must be on disk before submit returns.
        let cached = StateStore::new(replica.cache_path()).try_load().unwrap();
        assert!(cached.order(&id).is_some());
    }

    #[tokio::test]
    async fn test_duplicate_offline_add_ignored() {
        let dir = tempdir().unwrap();
        let replica = Replica::new(test_config(&dir));
        let order = sample_order();

        assert!(replica.add_order(order.clone()).await.unwrap());
        assert!(!replica.add_order(order).await.unwrap());
        assert_eq!(replica.state().await.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_event_touches_nothing() {
        let dir = tempdir().unwrap();
        let replica = Replica::new(test_config(&dir));

        let result = replica
            .replace_menu(vec![MenuItem::new("Refund", -1.0)])
            .await;
        assert!(matches!(result, Err(ReplicaError::Rejected(_))));
        assert!(replica.state().await.menu_items.is_empty());
        assert!(!replica.cache_path().exists());
    }

    #[tokio::test]
    async fn test_update_then_delete_locally() {
        let dir = tempdir().unwrap();
        let replica = Replica::new(test_config(&dir));
        let order = sample_order();
        let id = order.id.clone();
        replica.add_order(order).await.unwrap();

        let mut patch = OrderPatch::new(id.clone());
        patch.checked_in = Some(true);
        assert!(replica.update_order(patch).await.unwrap());
        assert!(replica.state().await.order(&id).unwrap().checked_in);

        assert!(replica.delete_order(id.clone()).await.unwrap());
        assert!(!replica.delete_order(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_harmless() {
        let dir = tempdir().unwrap();
        let replica = Replica::new(test_config(&dir));
        replica.stop();
    }

    #[test]
    fn test_url_derivation() {
        assert_eq!(sync_url("http://localhost:3000"), "ws://localhost:3000/sync");
        assert_eq!(sync_url("https://example.com/"), "wss://example.com/sync");
        assert_eq!(sync_url("127.0.0.1:9001"), "ws://127.0.0.1:9001/sync");
        assert_eq!(
            api_data_url("http://localhost:3000/"),
            "http://localhost:3000/api/data"
        );
        assert_eq!(api_data_url("localhost:3000"), "http://localhost:3000/api/data");
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = ReplicaConfig::default();
        let first = backoff_delay(&config, 0);
        assert_eq!(first, Duration::from_millis(config.reconnect_base_ms));

        let mut previous = first;
        for attempt in 1..40 {
            let delay = backoff_delay(&config, attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(config.reconnect_max_ms));
            previous = delay;
        }
    }
}
