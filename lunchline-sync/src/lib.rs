//! # lunchline-sync — Real-time state synchronization for Lunchline
//!
//! Keeps every connected client's copy of the order data identical to the
//! server's, over a JSON WebSocket protocol with an HTTP fallback for full
//! snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      WebSocket      ┌─────────────┐
//! │ Replica     │ ◄─────────────────► │ SyncServer  │
//! │ (per client)│     JSON frames     │ (axum)      │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │ mpsc queue
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ SharedState │                     │ Hub task    │
//! │ (local copy)│                     │ (authority) │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                            ┌──────┴──────┐
//!        ▼                            │ Broadcast   │
//! ┌─────────────┐                     │ fan-out     │
//! │ cache file  │                     └──────┬──────┘
//! └─────────────┘                            ▼
//!                                     ┌─────────────┐
//!                                     │ StateStore  │
//!                                     │ (JSON file) │
//!                                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol and event application semantics
//! - [`store`] — Atomic JSON file persistence with self-healing loads
//! - [`roster`] — Student roster file import
//! - [`broadcast`] — Per-client fan-out with origin filtering
//! - [`hub`] — The authoritative state task and its command queue
//! - [`server`] — axum HTTP + WebSocket front end
//! - [`client`] — Client replica with cache and reconnection

pub mod broadcast;
pub mod client;
pub mod hub;
pub mod protocol;
pub mod roster;
pub mod server;
pub mod store;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, ClientInfo, Frame};
pub use client::{ConnectionState, Replica, ReplicaConfig, ReplicaError, ReplicaEvent};
pub use hub::{AttachedClient, Hub, HubConfig, HubError, HubHandle, HubStats};
pub use protocol::{ClientEvent, ProtocolError, ServerMessage};
pub use roster::load_roster;
pub use server::{ServerConfig, ServerError, SyncServer};
pub use store::{StateStore, StoreError};
