//! Fan-out of encoded frames to every attached client.
//!
//! Built on a tokio broadcast channel: one send reaches all subscribers,
//! each of which buffers up to `capacity` frames independently. A client
//! that falls behind sees `Lagged` on its receiver and is resynchronized
//! by its connection task with a fresh snapshot.
//!
//! Frames carry the originating client's id so each connection can skip
//! echoing a mutation back to the client that sent it. The group itself
//! delivers to everyone; origin filtering happens at the connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

/// Identity of one attached connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub client_id: Uuid,
    /// Remote address, when the transport knows it.
    pub addr: Option<SocketAddr>,
}

impl ClientInfo {
    pub fn new(addr: Option<SocketAddr>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            addr,
        }
    }
}

/// One encoded wire frame plus its routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The client whose event produced this frame. `None` for frames the
    /// server originates itself, which every client should receive.
    pub origin: Option<Uuid>,
    /// Encoded JSON, ready to write to a socket.
    pub payload: String,
}

impl Frame {
    /// A frame caused by a client event; that client will not be echoed.
    pub fn from_client(origin: Uuid, payload: String) -> Self {
        Self {
            origin: Some(origin),
            payload,
        }
    }

    /// A server-originated frame, delivered to every client.
    pub fn from_server(payload: String) -> Self {
        Self {
            origin: None,
            payload,
        }
    }

    /// Whether `client_id`'s connection should forward this frame.
    pub fn should_deliver_to(&self, client_id: &Uuid) -> bool {
        self.origin.as_ref() != Some(client_id)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub active_clients: usize,
}

/// The single fan-out group for the shared dataset.
///
/// Owned exclusively by the hub task, so no interior locking is needed;
/// everything that touches it goes through the hub's command queue.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Frame>>,
    clients: HashMap<Uuid, ClientInfo>,
    capacity: usize,
    frames_sent: u64,
}

impl BroadcastGroup {
    /// `capacity` is how many frames each receiver buffers before a slow
    /// client starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            clients: HashMap::new(),
            capacity,
            frames_sent: 0,
        }
    }

    /// Register a connection and hand back its receiver.
    pub fn attach(&mut self, info: ClientInfo) -> broadcast::Receiver<Arc<Frame>> {
        self.clients.insert(info.client_id, info);
        self.sender.subscribe()
    }

    /// Drop a connection from the group.
    pub fn detach(&mut self, client_id: &Uuid) -> Option<ClientInfo> {
        self.clients.remove(client_id)
    }

    /// Fan a frame out to every subscriber. Returns how many receivers got
    /// it; zero when nobody is attached, which is not an error.
    pub fn broadcast(&mut self, frame: Frame) -> usize {
        let count = self.sender.send(Arc::new(frame)).unwrap_or(0);
        self.frames_sent += 1;
        count
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.clients.values().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent,
            active_clients: self.clients.len(),
        }
    }

    /// Raw receiver without registering a client (for tests and taps).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_attach_detach() {
        let mut group = BroadcastGroup::new(16);
        let info = ClientInfo::new(None);
        let id = info.client_id;

        let _rx = group.attach(info);
        assert_eq!(group.client_count(), 1);

        let removed = group.detach(&id);
        assert_eq!(removed.unwrap().client_id, id);
        assert_eq!(group.client_count(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_receiver() {
        let mut group = BroadcastGroup::new(16);

        let mut rx1 = group.attach(ClientInfo::new(None));
        let mut rx2 = group.attach(ClientInfo::new(None));
        let mut rx3 = group.attach(ClientInfo::new(None));

        let origin = Uuid::new_v4();
        let count = group.broadcast(Frame::from_client(origin, "{}".to_string()));

        // Every receiver sees it; origin filtering happens at the connection
        assert_eq!(count, 3);
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.origin, Some(origin));
            assert_eq!(frame.payload, "{}");
        }
    }

    #[tokio::test]
    async fn test_origin_filtering() {
        let sender = Uuid::new_v4();
        let other = Uuid::new_v4();

        let from_client = Frame::from_client(sender, "{}".to_string());
        assert!(!from_client.should_deliver_to(&sender));
        assert!(from_client.should_deliver_to(&other));

        let from_server = Frame::from_server("{}".to_string());
        assert!(from_server.should_deliver_to(&sender));
        assert!(from_server.should_deliver_to(&other));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_fine() {
        let mut group = BroadcastGroup::new(16);
        let count = group.broadcast(Frame::from_server("{}".to_string()));
        assert_eq!(count, 0);
        assert_eq!(group.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn test_stats_track_sends_and_clients() {
        let mut group = BroadcastGroup::new(16);
        let _rx = group.attach(ClientInfo::new(None));

        group.broadcast(Frame::from_server("a".to_string()));
        group.broadcast(Frame::from_server("b".to_string()));

        let stats = group.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.active_clients, 1);
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let mut group = BroadcastGroup::new(2);
        let mut rx = group.attach(ClientInfo::new(None));

        for i in 0..5 {
            group.broadcast(Frame::from_server(format!("{i}")));
        }

        // The two newest frames survive; the rest surface as Lagged
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert_eq!(missed, 3),
            other => panic!("Expected lag, got {other:?}"),
        }
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload, "3");
    }
}
