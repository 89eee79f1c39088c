//! HTTP and WebSocket surface, multiplexed on one port.
//!
//! ```text
//!  GET  /api/data             full state snapshot
//!  POST /api/data             section-level merge, pushed to everyone
//!  GET  /api/students/status  roster summary
//!  GET  /sync                 WebSocket upgrade
//! ```
//!
//! The server owns no state of its own. HTTP handlers are thin wrappers over
//! hub commands, and each WebSocket connection becomes a task that pumps
//! frames between its socket and the hub:
//!
//! ```text
//!  socket ── ClientEvent ──► hub.apply()
//!  socket ◄── Frame ──────── broadcast receiver (own origin skipped)
//! ```
//!
//! A frame that fails to decode is logged and dropped; the connection stays
//! up. A connection that falls behind the broadcast is resynchronized with
//! a fresh snapshot instead of being disconnected.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use lunchline_core::{SharedState, StatePatch, Student};

use crate::broadcast::ClientInfo;
use crate::hub::{HubError, HubHandle};
use crate::protocol::{ClientEvent, ServerMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Server errors.
#[derive(Debug)]
pub enum ServerError {
    BindFailed(String),
    ServeFailed(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BindFailed(e) => write!(f, "Could not bind: {e}"),
            Self::ServeFailed(e) => write!(f, "Server failed: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

/// Error shape for HTTP handlers. A body that fails validation is the
/// caller's fault; the hub being gone means shutdown is in progress.
#[derive(Debug)]
pub enum ApiError {
    Invalid(String),
    Unavailable(HubError),
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        ApiError::Unavailable(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Invalid(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            Self::Unavailable(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
        }
    }
}

/// Roster summary returned by `GET /api/students/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentsStatus {
    pub count: usize,
    pub has_data: bool,
    pub first_few: Vec<StudentSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

fn roster_status(state: &SharedState) -> StudentsStatus {
    StudentsStatus {
        count: state.students.len(),
        has_data: !state.students.is_empty(),
        first_few: state.students.iter().take(3).map(summarize).collect(),
    }
}

fn summarize(student: &Student) -> StudentSummary {
    StudentSummary {
        id: student.id.clone(),
        first_name: student.first_name.clone(),
        last_name: student.last_name.clone(),
    }
}

/// The combined HTTP + WebSocket server.
pub struct SyncServer {
    config: ServerConfig,
    hub: HubHandle,
}

impl SyncServer {
    pub fn new(hub: HubHandle, config: ServerConfig) -> Self {
        Self { config, hub }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    fn app(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE])
            .allow_origin(Any);

        Router::new()
            .route("/api/data", get(get_data).post(post_data))
            .route("/api/students/status", get(students_status))
            .route("/sync", get(ws_upgrade))
            .layer(cors)
            .with_state(self.hub.clone())
    }

    /// Bind and serve until the shutdown future completes.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| ServerError::BindFailed(format!("{}: {e}", self.config.bind_addr)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindFailed(e.to_string()))?;
        info!("Listening on http://{addr} (WebSocket at /sync)");

        let app = self.app();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::ServeFailed(e.to_string()))
    }
}

async fn get_data(State(hub): State<HubHandle>) -> Result<Json<SharedState>, ApiError> {
    Ok(Json(hub.snapshot().await?))
}

async fn post_data(
    State(hub): State<HubHandle>,
    Json(patch): Json<StatePatch>,
) -> Result<Json<SharedState>, ApiError> {
    // The bulk endpoint honors the same menu rules as the event path
    if let Some(items) = &patch.menu_items {
        if let Some(bad) = items.iter().find(|item| !item.has_valid_price()) {
            return Err(ApiError::Invalid(format!(
                "menu item '{}' has invalid price {}",
                bad.name, bad.price
            )));
        }
    }
    let updated = hub.merge(patch).await?;
    Ok(Json(updated))
}

async fn students_status(State(hub): State<HubHandle>) -> Result<Json<StudentsStatus>, ApiError> {
    let state = hub.snapshot().await?;
    Ok(Json(roster_status(&state)))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<HubHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, hub))
}

/// One task per WebSocket connection.
async fn handle_socket(socket: WebSocket, addr: SocketAddr, hub: HubHandle) {
    let info = ClientInfo::new(Some(addr));
    let client_id = info.client_id;

    let attached = match hub.attach(info).await {
        Ok(attached) => attached,
        Err(e) => {
            warn!("Could not attach {addr}: {e}");
            return;
        }
    };
    let snapshot = attached.snapshot;
    let mut receiver = attached.receiver;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // First frame on every connection is the full state
    match ServerMessage::InitialData(snapshot).encode() {
        Ok(text) => {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                hub.detach(client_id).await;
                return;
            }
        }
        Err(e) => {
            error!("Could not encode initial state for {client_id}: {e}");
            hub.detach(client_id).await;
            return;
        }
    }

    info!("WebSocket client {client_id} connected from {addr}");

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match ClientEvent::decode(text.as_str()) {
                            Ok(event) => {
                                if hub.apply(client_id, event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Undecodable frame from {client_id}: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Ignoring binary frame from {client_id}");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/Pong are answered by the websocket layer
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error from {client_id}: {e}");
                        break;
                    }
                }
            }

            frame = receiver.recv() => {
                match frame {
                    Ok(frame) => {
                        if !frame.should_deliver_to(&client_id) {
                            continue;
                        }
                        if ws_sender
                            .send(Message::Text(frame.payload.clone().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Client {client_id} lagged by {missed} frames, resynchronizing");
                        // Move to the channel tail, then overwrite with a
                        // fresh snapshot; anything replayed from both is
                        // idempotent on the replica
                        receiver = receiver.resubscribe();
                        match hub.snapshot().await {
                            Ok(snapshot) => match ServerMessage::StateUpdated(snapshot).encode() {
                                Ok(text) => {
                                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => error!("Could not encode resync for {client_id}: {e}"),
                            },
                            Err(_) => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    hub.detach(client_id).await;
    info!("WebSocket client {client_id} disconnected");
}
