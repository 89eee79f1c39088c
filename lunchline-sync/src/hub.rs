//! The authoritative hub: one task owns the state, one queue feeds it.
//!
//! ```text
//!  ws conn ──┐
//!  ws conn ──┼─► mpsc queue ─► [hub task] ──► Frame fan-out ──► every conn
//!  http     ──┘                    │
//!                                  ▼ watch (latest snapshot)
//!                            [persister task] ──► StateStore
//! ```
//!
//! Every mutation from every transport goes through the same command queue
//! and is applied by a single task that exclusively owns the [`SharedState`].
//! Queue order is application order; no locks, no interleaving. Attaching is
//! a queue command too, so the snapshot a client receives and the position
//! its receiver starts at are consistent by construction.
//!
//! Persistence hangs off a watch channel: the hub publishes a snapshot after
//! each accepted mutation and moves on. The persister writes sequentially,
//! collapsing bursts into the newest snapshot, so a slow disk delays saves
//! but never the queue. Shutdown retires the persister, then performs one
//! final direct save, so the last write is always the freshest state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

use lunchline_core::{SharedState, StatePatch};

use crate::broadcast::{BroadcastGroup, ClientInfo, Frame};
use crate::protocol::{ClientEvent, ServerMessage};
use crate::store::{StateStore, StoreError};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Command queue depth; senders back off when it fills. Default: 256.
    pub queue_depth: usize,
    /// Frames buffered per client before it lags. Default: 256.
    pub broadcast_capacity: usize,
    /// How long the persister waits after a change before writing, to
    /// coalesce bursts into one save. Default: 100ms.
    pub persist_debounce_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            broadcast_capacity: 256,
            persist_debounce_ms: 100,
        }
    }
}

impl HubConfig {
    /// Config for testing (small queues, immediate persistence).
    pub fn for_testing() -> Self {
        Self {
            queue_depth: 32,
            broadcast_capacity: 32,
            persist_debounce_ms: 0,
        }
    }
}

/// Hub errors.
#[derive(Debug, Clone)]
pub enum HubError {
    /// The hub task is gone; the system is shutting down.
    QueueClosed,
    /// The hub dropped a reply channel, which should not happen.
    ReplyDropped,
    /// The final save during shutdown failed.
    FinalSaveFailed(String),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueClosed => write!(f, "Hub queue is closed"),
            Self::ReplyDropped => write!(f, "Hub dropped the reply channel"),
            Self::FinalSaveFailed(e) => write!(f, "Final save failed: {e}"),
        }
    }
}

impl std::error::Error for HubError {}

/// Hub statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubStats {
    pub active_clients: usize,
    pub events_applied: u64,
    pub events_rejected: u64,
    pub frames_sent: u64,
    pub saves_completed: u64,
}

/// What a freshly attached client starts from: the state as of attachment,
/// and a receiver positioned immediately after it.
pub struct AttachedClient {
    pub snapshot: SharedState,
    pub receiver: broadcast::Receiver<Arc<Frame>>,
}

enum HubCommand {
    Attach {
        info: ClientInfo,
        reply: oneshot::Sender<AttachedClient>,
    },
    Detach {
        client_id: Uuid,
    },
    Apply {
        origin: Uuid,
        event: ClientEvent,
    },
    Merge {
        patch: StatePatch,
        reply: oneshot::Sender<SharedState>,
    },
    Snapshot {
        reply: oneshot::Sender<SharedState>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Cloneable handle for talking to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Register a connection: returns the current state and a broadcast
    /// receiver that picks up exactly where the snapshot leaves off.
    pub async fn attach(&self, info: ClientInfo) -> Result<AttachedClient, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Attach { info, reply })
            .await
            .map_err(|_| HubError::QueueClosed)?;
        rx.await.map_err(|_| HubError::ReplyDropped)
    }

    /// Unregister a connection. Safe to call during shutdown.
    pub async fn detach(&self, client_id: Uuid) {
        let _ = self.tx.send(HubCommand::Detach { client_id }).await;
    }

    /// Enqueue a client event. Returns once the event is queued, not once it
    /// is applied; application order is queue order.
    pub async fn apply(&self, origin: Uuid, event: ClientEvent) -> Result<(), HubError> {
        self.tx
            .send(HubCommand::Apply { origin, event })
            .await
            .map_err(|_| HubError::QueueClosed)
    }

    /// Apply a bulk overwrite and get the resulting state back. Everyone,
    /// including the caller's own connections, receives the new state.
    pub async fn merge(&self, patch: StatePatch) -> Result<SharedState, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Merge { patch, reply })
            .await
            .map_err(|_| HubError::QueueClosed)?;
        rx.await.map_err(|_| HubError::ReplyDropped)
    }

    /// Current state, as of every previously queued command.
    pub async fn snapshot(&self) -> Result<SharedState, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Snapshot { reply })
            .await
            .map_err(|_| HubError::QueueClosed)?;
        rx.await.map_err(|_| HubError::ReplyDropped)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Stats { reply })
            .await
            .map_err(|_| HubError::QueueClosed)?;
        rx.await.map_err(|_| HubError::ReplyDropped)
    }

    /// Stop the hub after one final save of the current state.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Shutdown { reply })
            .await
            .map_err(|_| HubError::QueueClosed)?;
        rx.await
            .map_err(|_| HubError::ReplyDropped)?
            .map_err(|e| HubError::FinalSaveFailed(e.to_string()))
    }
}

/// The state-owning actor.
pub struct Hub {
    state: SharedState,
    store: StateStore,
    group: BroadcastGroup,
    queue: mpsc::Receiver<HubCommand>,
    persist_tx: watch::Sender<SharedState>,
    persister: tokio::task::JoinHandle<()>,
    saves: Arc<AtomicU64>,
    events_applied: u64,
    events_rejected: u64,
}

impl Hub {
    /// Spawn the hub task and its persister; returns the handle everything
    /// else uses to reach them.
    pub fn spawn(state: SharedState, store: StateStore, config: HubConfig) -> HubHandle {
        let (tx, queue) = mpsc::channel(config.queue_depth);
        let (persist_tx, persist_rx) = watch::channel(state.clone());
        let saves = Arc::new(AtomicU64::new(0));

        let persister = tokio::spawn(run_persister(
            persist_rx,
            store.clone(),
            Duration::from_millis(config.persist_debounce_ms),
            saves.clone(),
        ));

        let hub = Hub {
            state,
            store,
            group: BroadcastGroup::new(config.broadcast_capacity),
            queue,
            persist_tx,
            persister,
            saves,
            events_applied: 0,
            events_rejected: 0,
        };
        tokio::spawn(hub.run());

        HubHandle { tx }
    }

    async fn run(mut self) {
        info!(
            "Hub started: {} orders, {} menu items, {} students",
            self.state.orders.len(),
            self.state.menu_items.len(),
            self.state.students.len()
        );

        let mut shutdown_reply = None;
        while let Some(cmd) = self.queue.recv().await {
            match cmd {
                HubCommand::Attach { info, reply } => {
                    let client_id = info.client_id;
                    let receiver = self.group.attach(info);
                    let attached = AttachedClient {
                        snapshot: self.state.clone(),
                        receiver,
                    };
                    if reply.send(attached).is_err() {
                        // Connection died between upgrade and attach
                        self.group.detach(&client_id);
                    } else {
                        info!(
                            "Client {client_id} attached ({} online)",
                            self.group.client_count()
                        );
                    }
                }
                HubCommand::Detach { client_id } => {
                    if self.group.detach(&client_id).is_some() {
                        info!(
                            "Client {client_id} detached ({} online)",
                            self.group.client_count()
                        );
                    }
                }
                HubCommand::Apply { origin, event } => self.apply_event(origin, event),
                HubCommand::Merge { patch, reply } => {
                    self.state.apply_patch(patch);
                    self.events_applied += 1;
                    self.publish_snapshot();
                    self.send_to_all(&ServerMessage::StateUpdated(self.state.clone()));
                    let _ = reply.send(self.state.clone());
                }
                HubCommand::Snapshot { reply } => {
                    let _ = reply.send(self.state.clone());
                }
                HubCommand::Stats { reply } => {
                    let group_stats = self.group.stats();
                    let _ = reply.send(HubStats {
                        active_clients: group_stats.active_clients,
                        events_applied: self.events_applied,
                        events_rejected: self.events_rejected,
                        frames_sent: group_stats.frames_sent,
                        saves_completed: self.saves.load(Ordering::Relaxed),
                    });
                }
                HubCommand::Shutdown { reply } => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        let Hub {
            state,
            store,
            persist_tx,
            persister,
            events_applied,
            events_rejected,
            ..
        } = self;

        // Retire the persister before the final save: drop the watch sender
        // so its loop exits, then wait out any write it has in flight. The
        // final save must be the last writer of the file.
        drop(persist_tx);
        if let Err(e) = persister.await {
            warn!("Persister task did not stop cleanly: {e}");
        }

        let result = tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .unwrap_or_else(|e| Err(StoreError::WriteFailed(e.to_string())));
        match &result {
            Ok(()) => info!("Final state saved"),
            Err(e) => error!("Final save failed: {e}"),
        }
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(result);
        }

        info!("Hub stopped: {events_applied} events applied, {events_rejected} rejected");
    }

    /// Apply one client event: mutate, persist, rebroadcast. Events that
    /// fail validation or change nothing produce no broadcast and no save.
    fn apply_event(&mut self, origin: Uuid, event: ClientEvent) {
        if let Err(e) = event.validate() {
            warn!("Rejected {} from {origin}: {e}", event.name());
            self.events_rejected += 1;
            return;
        }

        match event.apply_to(&mut self.state) {
            Some(msg) => {
                self.events_applied += 1;
                self.publish_snapshot();
                debug!("Applied {} from {origin}", event.name());
                self.send_from(origin, &msg);
            }
            None => debug!("No state change from {}, nothing broadcast", event.name()),
        }
    }

    /// Hand the persister the newest snapshot.
    fn publish_snapshot(&self) {
        if self.persist_tx.send(self.state.clone()).is_err() {
            error!("Persister is gone; state changes are no longer being saved");
        }
    }

    fn send_from(&mut self, origin: Uuid, msg: &ServerMessage) {
        match msg.encode() {
            Ok(payload) => {
                self.group.broadcast(Frame::from_client(origin, payload));
            }
            Err(e) => error!("Could not encode {}: {e}", msg.name()),
        }
    }

    fn send_to_all(&mut self, msg: &ServerMessage) {
        match msg.encode() {
            Ok(payload) => {
                self.group.broadcast(Frame::from_server(payload));
            }
            Err(e) => error!("Could not encode {}: {e}", msg.name()),
        }
    }
}

/// Sequential writer fed by the hub's watch channel. Stops when the hub
/// drops its sender.
async fn run_persister(
    mut rx: watch::Receiver<SharedState>,
    store: StateStore,
    debounce: Duration,
    saves: Arc<AtomicU64>,
) {
    while rx.changed().await.is_ok() {
        if !debounce.is_zero() {
            // Collapse a burst of mutations into one write
            tokio::time::sleep(debounce).await;
        }
        let snapshot = rx.borrow_and_update().clone();
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {
                saves.fetch_add(1, Ordering::Relaxed);
                debug!("State persisted");
            }
            Ok(Err(e)) => error!("State save failed: {e}"),
            Err(e) => error!("Persist task failed: {e}"),
        }
    }
    debug!("Persister stopped");
}
