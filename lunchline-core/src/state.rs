//! The authoritative state blob and every mutation it supports.
//!
//! `SharedState` is the single document the whole system synchronizes: the
//! hub owns one copy, every replica keeps its own, and the persisted file on
//! disk is its pretty-printed JSON. All mutation goes through the methods
//! here so the hub and the replicas apply identical semantics.
//!
//! Older persisted files that predate the order-form fields load cleanly:
//! every section has a serde default.

use serde::{Deserialize, Serialize};

use crate::menu::MenuItem;
use crate::order::{Order, OrderId, OrderPatch};
use crate::student::Student;

fn default_form_title() -> String {
    "Fun Food Friday Order Form".to_string()
}

fn default_form_description() -> String {
    "Place your order for Fun Food Friday. Please fill out all fields.".to_string()
}

/// The order-form header as shown to students: what the form is called and
/// the blurb under the title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSettings {
    pub title: String,
    pub description: String,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            title: default_form_title(),
            description: default_form_description(),
        }
    }
}

/// Everything the system tracks, in its wire and file shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub menu_items: Vec<MenuItem>,
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub order_form_locked: bool,
    #[serde(default = "default_form_title")]
    pub order_form_title: String,
    #[serde(default = "default_form_description")]
    pub order_form_description: String,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            orders: Vec::new(),
            menu_items: Vec::new(),
            students: Vec::new(),
            order_form_locked: false,
            order_form_title: default_form_title(),
            order_form_description: default_form_description(),
        }
    }
}

impl SharedState {
    /// Look up an order by id.
    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| &o.id == id)
    }

    /// Append a new order. Returns `false` and leaves the state untouched
    /// when an order with the same id is already present, so a retried or
    /// doubled submission lands exactly once.
    pub fn add_order(&mut self, order: Order) -> bool {
        if self.order(&order.id).is_some() {
            return false;
        }
        self.orders.push(order);
        true
    }

    /// Shallow-merge a patch into the order it addresses. Returns a clone of
    /// the merged order for rebroadcast, or `None` when no order matches.
    pub fn update_order(&mut self, patch: OrderPatch) -> Option<Order> {
        let order = self.orders.iter_mut().find(|o| o.id == patch.id)?;
        order.merge(patch);
        Some(order.clone())
    }

    /// Replace an existing order wholesale, keeping position. Returns `false`
    /// when the id is unknown. This is how replicas apply an already-merged
    /// order received from the hub.
    pub fn replace_order(&mut self, order: Order) -> bool {
        match self.orders.iter_mut().find(|o| o.id == order.id) {
            Some(slot) => {
                *slot = order;
                true
            }
            None => false,
        }
    }

    /// Remove an order by id. Removing an id that is not present is a no-op,
    /// so concurrent deletes of the same order converge without error.
    pub fn remove_order(&mut self, id: &OrderId) -> bool {
        let before = self.orders.len();
        self.orders.retain(|o| &o.id != id);
        self.orders.len() != before
    }

    /// Replace the whole menu.
    pub fn replace_menu(&mut self, items: Vec<MenuItem>) {
        self.menu_items = items;
    }

    /// Replace the whole roster.
    pub fn replace_students(&mut self, students: Vec<Student>) {
        self.students = students;
    }

    pub fn set_form_locked(&mut self, locked: bool) {
        self.order_form_locked = locked;
    }

    /// Overwrite whichever form-header fields are present and return the
    /// resulting settings, ready for rebroadcast.
    pub fn merge_form_settings(
        &mut self,
        title: Option<String>,
        description: Option<String>,
    ) -> FormSettings {
        if let Some(title) = title {
            self.order_form_title = title;
        }
        if let Some(description) = description {
            self.order_form_description = description;
        }
        FormSettings {
            title: self.order_form_title.clone(),
            description: self.order_form_description.clone(),
        }
    }

    /// Overwrite every section the patch carries; absent sections are kept.
    pub fn apply_patch(&mut self, patch: StatePatch) {
        let StatePatch {
            orders,
            menu_items,
            students,
            order_form_locked,
            order_form_title,
            order_form_description,
        } = patch;

        if let Some(v) = orders {
            self.orders = v;
        }
        if let Some(v) = menu_items {
            self.menu_items = v;
        }
        if let Some(v) = students {
            self.students = v;
        }
        if let Some(v) = order_form_locked {
            self.order_form_locked = v;
        }
        if let Some(v) = order_form_title {
            self.order_form_title = v;
        }
        if let Some(v) = order_form_description {
            self.order_form_description = v;
        }
    }
}

/// Section-level partial overwrite of the shared state, as accepted on the
/// bulk-update endpoint. Any subset of sections may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders: Option<Vec<Order>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_items: Option<Vec<MenuItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub students: Option<Vec<Student>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_form_locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_form_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_form_description: Option<String>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self.orders.is_none()
            && self.menu_items.is_none()
            && self.students.is_none()
            && self.order_form_locked.is_none()
            && self.order_form_title.is_none()
            && self.order_form_description.is_none()
    }
}
