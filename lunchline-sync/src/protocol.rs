//! Typed wire protocol for state synchronization.
//!
//! Every frame is a JSON text message with an adjacent tag:
//!
//! ```text
//! {"type": "order-added",  "data": { ...order... }}
//! {"type": "order-deleted","data": "19c2f4a1b3e-7f3a90d2"}
//! {"type": "initialData",  "data": { ...full state... }}
//! ```
//!
//! Clients send [`ClientEvent`]s, the hub answers with [`ServerMessage`]s.
//! A frame that fails to decode or validate is dropped by the receiver; it
//! never tears down the connection and never reaches the shared state.

use log::debug;
use serde::{Deserialize, Serialize};

use lunchline_core::{
    FormSettings, MenuItem, Order, OrderId, OrderPatch, SharedState, Student,
};

/// Mutations a client may ask the hub to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// A brand-new order.
    OrderAdded(Order),
    /// Partial update merged into an existing order.
    OrderUpdated(OrderPatch),
    /// Remove the order with this id.
    OrderDeleted(OrderId),
    /// Replace the menu wholesale.
    MenuUpdated(Vec<MenuItem>),
    /// Lock or unlock the order form.
    FormLockUpdated(bool),
    /// Change the form header; absent fields keep their value.
    FormSettingsUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Swap in a complete dataset, e.g. restoring from an export.
    #[serde(rename_all = "camelCase")]
    ReplaceAll {
        orders: Vec<Order>,
        menu_items: Vec<MenuItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        students: Option<Vec<Student>>,
    },
}

impl ClientEvent {
    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderAdded(_) => "order-added",
            Self::OrderUpdated(_) => "order-updated",
            Self::OrderDeleted(_) => "order-deleted",
            Self::MenuUpdated(_) => "menu-updated",
            Self::FormLockUpdated(_) => "form-lock-updated",
            Self::FormSettingsUpdated { .. } => "form-settings-updated",
            Self::ReplaceAll { .. } => "replace-all",
        }
    }

    /// Semantic checks beyond what the type system enforces. A rejected
    /// event is ignored wholesale; no partial application.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::OrderAdded(order) => {
                if order.id.as_str().is_empty() {
                    return Err(ProtocolError::InvalidPayload(
                        "order id must not be empty".to_string(),
                    ));
                }
            }
            Self::OrderUpdated(patch) => {
                if patch.id.as_str().is_empty() {
                    return Err(ProtocolError::InvalidPayload(
                        "order id must not be empty".to_string(),
                    ));
                }
            }
            Self::OrderDeleted(id) => {
                if id.as_str().is_empty() {
                    return Err(ProtocolError::InvalidPayload(
                        "order id must not be empty".to_string(),
                    ));
                }
            }
            Self::MenuUpdated(items) => {
                if let Some(bad) = items.iter().find(|i| !i.has_valid_price()) {
                    return Err(ProtocolError::InvalidPayload(format!(
                        "menu item '{}' has invalid price {}",
                        bad.name, bad.price
                    )));
                }
            }
            Self::ReplaceAll { menu_items, .. } => {
                if let Some(bad) = menu_items.iter().find(|i| !i.has_valid_price()) {
                    return Err(ProtocolError::InvalidPayload(format!(
                        "menu item '{}' has invalid price {}",
                        bad.name, bad.price
                    )));
                }
            }
            Self::FormLockUpdated(_) | Self::FormSettingsUpdated { .. } => {}
        }
        Ok(())
    }

    /// Apply this event to a state and produce the broadcast it warrants.
    ///
    /// Returns `None` when nothing changed (duplicate add, unknown order id),
    /// in which case the caller must not broadcast or persist anything. The
    /// hub and the replica both route mutations through here so an event
    /// means the same thing on every copy of the state.
    pub fn apply_to(&self, state: &mut SharedState) -> Option<ServerMessage> {
        match self {
            Self::OrderAdded(order) => {
                if state.add_order(order.clone()) {
                    Some(ServerMessage::OrderAdded(order.clone()))
                } else {
                    debug!("Duplicate order {} ignored", order.id);
                    None
                }
            }
            Self::OrderUpdated(patch) => {
                let merged = state.update_order(patch.clone());
                if merged.is_none() {
                    debug!("Update for unknown order {} ignored", patch.id);
                }
                merged.map(ServerMessage::OrderUpdated)
            }
            Self::OrderDeleted(id) => {
                if state.remove_order(id) {
                    Some(ServerMessage::OrderDeleted(id.clone()))
                } else {
                    debug!("Delete for unknown order {id} ignored");
                    None
                }
            }
            Self::MenuUpdated(items) => {
                state.replace_menu(items.clone());
                Some(ServerMessage::MenuUpdated(items.clone()))
            }
            Self::FormLockUpdated(locked) => {
                state.set_form_locked(*locked);
                Some(ServerMessage::FormLockUpdated(*locked))
            }
            Self::FormSettingsUpdated { title, description } => {
                let settings = state.merge_form_settings(title.clone(), description.clone());
                Some(ServerMessage::FormSettingsUpdated(settings))
            }
            Self::ReplaceAll {
                orders,
                menu_items,
                students,
            } => {
                state.orders = orders.clone();
                state.menu_items = menu_items.clone();
                if let Some(students) = students {
                    state.replace_students(students.clone());
                }
                Some(ServerMessage::StateUpdated(state.clone()))
            }
        }
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from a wire frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Frames the hub pushes to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full snapshot sent once, immediately after a client attaches.
    #[serde(rename = "initialData")]
    InitialData(SharedState),
    /// Full snapshot after a bulk overwrite; sent to every client.
    StateUpdated(SharedState),
    /// A newly accepted order.
    OrderAdded(Order),
    /// The complete post-merge order, not the patch that produced it.
    OrderUpdated(Order),
    /// The removed order's id.
    OrderDeleted(OrderId),
    /// The new menu.
    MenuUpdated(Vec<MenuItem>),
    FormLockUpdated(bool),
    /// The full header after the change, both fields present.
    FormSettingsUpdated(FormSettings),
}

impl ServerMessage {
    /// Message name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitialData(_) => "initialData",
            Self::StateUpdated(_) => "state-updated",
            Self::OrderAdded(_) => "order-added",
            Self::OrderUpdated(_) => "order-updated",
            Self::OrderDeleted(_) => "order-deleted",
            Self::MenuUpdated(_) => "menu-updated",
            Self::FormLockUpdated(_) => "form-lock-updated",
            Self::FormSettingsUpdated(_) => "form-settings-updated",
        }
    }

    /// Fold a broadcast into a replica's local state. Returns whether the
    /// state changed. Snapshots overwrite wholesale; incremental messages
    /// land with the same semantics the hub used to produce them, so
    /// replaying a message a replica has already seen is a no-op.
    pub fn apply_to(&self, state: &mut SharedState) -> bool {
        match self {
            Self::InitialData(snapshot) | Self::StateUpdated(snapshot) => {
                *state = snapshot.clone();
                true
            }
            Self::OrderAdded(order) => state.add_order(order.clone()),
            // The hub already merged the patch; swap in the finished order.
            Self::OrderUpdated(order) => state.replace_order(order.clone()),
            Self::OrderDeleted(id) => state.remove_order(id),
            Self::MenuUpdated(items) => {
                state.replace_menu(items.clone());
                true
            }
            Self::FormLockUpdated(locked) => {
                state.set_form_locked(*locked);
                true
            }
            Self::FormSettingsUpdated(settings) => {
                state.merge_form_settings(
                    Some(settings.title.clone()),
                    Some(settings.description.clone()),
                );
                true
            }
        }
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from a wire frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidPayload(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidPayload(e) => write!(f, "Invalid payload: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use lunchline_core::OrderItem;

    fn sample_order() -> Order {
        Order {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            grade: "11".to_string(),
            items: vec![OrderItem::new("Pizza", 2, 5.0)],
            ..Order::new()
        }
    }

    #[test]
    fn test_order_added_roundtrip() {
        let event = ClientEvent::OrderAdded(sample_order());
        let encoded = event.encode().unwrap();
        assert!(encoded.starts_with(r#"{"type":"order-added","data":{"#));

        let decoded = ClientEvent::decode(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_order_deleted_carries_bare_id() {
        let event = ClientEvent::OrderDeleted(OrderId::from("abc-123"));
        let encoded = event.encode().unwrap();
        assert_eq!(encoded, r#"{"type":"order-deleted","data":"abc-123"}"#);
    }

    #[test]
    fn test_numeric_order_id_accepted() {
        // Frames from older clients carry numeric ids
        let frame = r#"{"type":"order-added","data":{"id":1,"items":[{"name":"X","quantity":2,"price":5.0}],"checkedIn":false}}"#;
        match ClientEvent::decode(frame).unwrap() {
            ClientEvent::OrderAdded(order) => {
                assert_eq!(order.id, OrderId::from("1"));
                assert_eq!(order.items.len(), 1);
            }
            other => panic!("Wrong event: {other:?}"),
        }

        let frame = r#"{"type":"order-deleted","data":1}"#;
        match ClientEvent::decode(frame).unwrap() {
            ClientEvent::OrderDeleted(id) => assert_eq!(id, OrderId::from("1")),
            other => panic!("Wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_initial_data_tag_is_camel_case() {
        let msg = ServerMessage::InitialData(SharedState::default());
        let encoded = msg.encode().unwrap();
        assert!(encoded.starts_with(r#"{"type":"initialData""#));
    }

    #[test]
    fn test_update_patch_decodes_sparse_fields() {
        let frame = r#"{"type":"order-updated","data":{"id":"abc","checkedIn":true}}"#;
        let event = ClientEvent::decode(frame).unwrap();

        match event {
            ClientEvent::OrderUpdated(patch) => {
                assert_eq!(patch.id, OrderId::from("abc"));
                assert_eq!(patch.checked_in, Some(true));
                assert_eq!(patch.first_name, None);
                assert_eq!(patch.student_id, None);
            }
            other => panic!("Wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = r#"{"type":"launch-missiles","data":{}}"#;
        assert!(ClientEvent::decode(frame).is_err());
    }

    #[test]
    fn test_missing_data_rejected() {
        let frame = r#"{"type":"order-added"}"#;
        assert!(ClientEvent::decode(frame).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ClientEvent::decode("not json at all").is_err());
        assert!(ServerMessage::decode("[1,2,3]").is_err());
    }

    #[test]
    fn test_menu_validation_rejects_bad_price() {
        let ok = ClientEvent::MenuUpdated(vec![MenuItem::new("Pizza", 5.0)]);
        assert!(ok.validate().is_ok());

        let negative = ClientEvent::MenuUpdated(vec![MenuItem::new("Refund", -1.0)]);
        assert!(negative.validate().is_err());

        let infinite = ClientEvent::MenuUpdated(vec![MenuItem::new("Inf", f64::INFINITY)]);
        assert!(infinite.validate().is_err());
    }

    #[test]
    fn test_empty_order_id_rejected() {
        let event = ClientEvent::OrderDeleted(OrderId::from(""));
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_replace_all_keys_are_camel_case() {
        let event = ClientEvent::ReplaceAll {
            orders: vec![sample_order()],
            menu_items: vec![MenuItem::new("Pizza", 5.0)],
            students: None,
        };
        let encoded = event.encode().unwrap();
        assert!(encoded.contains("\"menuItems\""));
        assert!(!encoded.contains("\"students\""));

        let decoded = ClientEvent::decode(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_form_settings_partial_decode() {
        let frame = r#"{"type":"form-settings-updated","data":{"title":"Taco Tuesday"}}"#;
        let event = ClientEvent::decode(frame).unwrap();

        match event {
            ClientEvent::FormSettingsUpdated { title, description } => {
                assert_eq!(title.as_deref(), Some("Taco Tuesday"));
                assert_eq!(description, None);
            }
            other => panic!("Wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_client_event_apply_reports_changes() {
        let mut state = SharedState::default();
        let order = sample_order();
        let id = order.id.clone();

        let added = ClientEvent::OrderAdded(order.clone()).apply_to(&mut state);
        assert!(matches!(added, Some(ServerMessage::OrderAdded(_))));

        // Same id again changes nothing and warrants no broadcast.
        assert_eq!(ClientEvent::OrderAdded(order).apply_to(&mut state), None);

        let mut patch = OrderPatch::new(id.clone());
        patch.checked_in = Some(true);
        match ClientEvent::OrderUpdated(patch).apply_to(&mut state) {
            Some(ServerMessage::OrderUpdated(merged)) => {
                assert!(merged.checked_in);
                assert_eq!(merged.first_name, "Ada");
            }
            other => panic!("Wrong outcome: {other:?}"),
        }

        assert!(ClientEvent::OrderDeleted(id.clone()).apply_to(&mut state).is_some());
        assert_eq!(ClientEvent::OrderDeleted(id).apply_to(&mut state), None);
    }

    #[test]
    fn test_server_message_apply_overwrites_and_merges() {
        let mut source = SharedState::default();
        source.add_order(sample_order());
        source.order_form_locked = true;

        let mut replica = SharedState::default();
        assert!(ServerMessage::InitialData(source.clone()).apply_to(&mut replica));
        assert_eq!(replica, source);

        // An update for an order the replica never saw is ignored.
        let stranger = sample_order();
        assert!(!ServerMessage::OrderUpdated(stranger).apply_to(&mut replica));
        assert_eq!(replica, source);
    }

    #[test]
    fn test_server_message_roundtrip() {
        let mut state = SharedState::default();
        state.add_order(sample_order());

        for msg in [
            ServerMessage::InitialData(state.clone()),
            ServerMessage::StateUpdated(state.clone()),
            ServerMessage::OrderAdded(sample_order()),
            ServerMessage::OrderDeleted(OrderId::from("abc")),
            ServerMessage::MenuUpdated(vec![MenuItem::new("Pizza", 5.0)]),
            ServerMessage::FormLockUpdated(true),
            ServerMessage::FormSettingsUpdated(FormSettings::default()),
        ] {
            let encoded = msg.encode().unwrap();
            let decoded = ServerMessage::decode(&encoded).unwrap();
            assert_eq!(decoded, msg);
            assert!(encoded.contains(&format!(r#""type":"{}""#, msg.name())));
        }
    }
}
