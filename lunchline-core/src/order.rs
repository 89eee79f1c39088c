//! Order records and the shallow-merge update semantics.
//!
//! Wire format is camelCase JSON, matching what the browser clients send:
//!
//! ```text
//! {
//!   "id": "19c2f4a1b3e-7f3a90d2",
//!   "firstName": "Ada", "lastName": "Lovelace", "grade": "11",
//!   "items": [{ "name": "Pizza", "quantity": 2, "price": 5.0 }],
//!   "checkedIn": false, "prepaid": true, "paymentMethod": "Venmo"
//! }
//! ```
//!
//! Boolean flags default to `false` and strings to empty when absent, so
//! state files written by older builds keep loading.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Opaque unique order identifier.
///
/// Minted on the client: a millisecond timestamp plus a random component, so
/// two clients creating orders in the same millisecond still diverge. Older
/// builds minted bare `Date.now()` numbers; those still arrive over the wire
/// and sit in saved data files, so ids deserialize from either a string or an
/// integer. Serialization always writes the string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl<'de> Deserialize<'de> for OrderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = OrderId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer order id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<OrderId, E> {
                Ok(OrderId(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<OrderId, E> {
                Ok(OrderId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<OrderId, E> {
                Ok(OrderId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<OrderId, E> {
                Ok(OrderId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

impl OrderId {
    /// Mint a fresh id.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        // Low 32 bits of a v4 uuid as the random component
        let salt = Uuid::new_v4().as_u128() as u32;
        OrderId(format!("{millis:x}-{salt:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        OrderId(s.to_string())
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        OrderId(s)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of an order: what, how many, at what unit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

impl OrderItem {
    pub fn new(name: impl Into<String>, quantity: u32, price: f64) -> Self {
        Self {
            name: name.into(),
            quantity,
            price,
        }
    }
}

fn default_payment_method() -> String {
    "Unpaid".to_string()
}

/// A single food order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    /// Roster reference, when name matching resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub checked_in: bool,
    #[serde(default)]
    pub is_poly: bool,
    #[serde(default)]
    pub prepaid: bool,
    #[serde(default)]
    pub venmo: bool,
    #[serde(default)]
    pub is_absent: bool,
    /// Free-form in practice: "Unpaid", "Cash", "Venmo", ...
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
}

impl Order {
    /// An empty order with a freshly minted id.
    pub fn new() -> Self {
        Self {
            id: OrderId::generate(),
            student_id: None,
            first_name: String::new(),
            last_name: String::new(),
            grade: String::new(),
            email: String::new(),
            items: Vec::new(),
            checked_in: false,
            is_poly: false,
            prepaid: false,
            venmo: false,
            is_absent: false,
            payment_method: default_payment_method(),
        }
    }

    /// Order total across all lines.
    pub fn total(&self) -> f64 {
        self.items
            .iter()
            .map(|item| item.price * f64::from(item.quantity))
            .sum()
    }

    /// Shallow-merge a partial update: fields present in the patch overwrite,
    /// everything else is kept. The id never changes.
    pub fn merge(&mut self, patch: OrderPatch) {
        let OrderPatch {
            id: _,
            student_id,
            first_name,
            last_name,
            grade,
            email,
            items,
            checked_in,
            is_poly,
            prepaid,
            venmo,
            is_absent,
            payment_method,
        } = patch;

        if let Some(v) = student_id {
            self.student_id = v;
        }
        if let Some(v) = first_name {
            self.first_name = v;
        }
        if let Some(v) = last_name {
            self.last_name = v;
        }
        if let Some(v) = grade {
            self.grade = v;
        }
        if let Some(v) = email {
            self.email = v;
        }
        if let Some(v) = items {
            self.items = v;
        }
        if let Some(v) = checked_in {
            self.checked_in = v;
        }
        if let Some(v) = is_poly {
            self.is_poly = v;
        }
        if let Some(v) = prepaid {
            self.prepaid = v;
        }
        if let Some(v) = venmo {
            self.venmo = v;
        }
        if let Some(v) = is_absent {
            self.is_absent = v;
        }
        if let Some(v) = payment_method {
            self.payment_method = v;
        }
    }
}

/// Deserialize a field that distinguishes "absent" from "explicitly null":
/// absent stays `None`, null becomes `Some(None)`, a value `Some(Some(v))`.
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Partial update for an existing order.
///
/// Only fields present in the payload take part in the merge. `studentId` is
/// a double option so that an explicit `null` clears the roster reference
/// while an absent key leaves it alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    /// Addresses the order to update; never merged into the target.
    pub id: OrderId,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub student_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_in: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_poly: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepaid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venmo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_absent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

impl OrderPatch {
    /// An empty patch addressing `id`.
    pub fn new(id: OrderId) -> Self {
        Self {
            id,
            student_id: None,
            first_name: None,
            last_name: None,
            grade: None,
            email: None,
            items: None,
            checked_in: None,
            is_poly: None,
            prepaid: None,
            venmo: None,
            is_absent: None,
            payment_method: None,
        }
    }
}
