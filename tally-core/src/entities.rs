//! Sales-domain entities.
//!
//! Entities keep a typed core schema and carry every unrecognised field in
//! an `extra` bag so records written by newer clients survive a round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AccountId, Timestamp};

/// Untyped field map of a stored document.
pub type Fields = Map<String, Value>;

/// A document as returned by the store: its id plus raw fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a JSON object. Non-object values yield an empty field map.
    pub fn from_json(id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }
}

/// One product line on a sale or a forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(flatten)]
    pub extra: Fields,
}

impl LineItem {
    pub fn new(product_code: impl Into<String>, quantity: impl Into<f64>) -> Self {
        Self {
            product_code: product_code.into(),
            quantity: Some(quantity.into()),
            extra: Fields::new(),
        }
    }

    /// A line item with no quantity recorded.
    pub fn unquantified(product_code: impl Into<String>) -> Self {
        Self {
            product_code: product_code.into(),
            quantity: None,
            extra: Fields::new(),
        }
    }

    /// Quantity, treating an unrecorded quantity as a single unit.
    pub fn units(&self) -> f64 {
        self.quantity.unwrap_or(1.0)
    }
}

/// A completed sale. Created by order entry; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub client_identifier: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<Timestamp>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub owner_account: AccountId,
    #[serde(flatten)]
    pub extra: Fields,
}

/// A registered customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<Timestamp>,
    pub owner_account: AccountId,
    #[serde(flatten)]
    pub extra: Fields,
}

/// A predicted order awaiting confirmation by an actual sale.
///
/// `fulfilled` only ever moves from `false` to `true`; there is no way to
/// clear it through this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub id: String,
    pub client_identifier: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    fulfilled: bool,
    pub owner_account: AccountId,
    #[serde(flatten)]
    pub extra: Fields,
}

impl Forecast {
    pub fn new(
        id: impl Into<String>,
        client_identifier: impl Into<String>,
        owner_account: impl Into<AccountId>,
        line_items: Vec<LineItem>,
    ) -> Self {
        Self {
            id: id.into(),
            client_identifier: client_identifier.into(),
            line_items,
            fulfilled: false,
            owner_account: owner_account.into(),
            extra: Fields::new(),
        }
    }

    /// Builder for forecasts loaded already fulfilled.
    pub fn already_fulfilled(mut self) -> Self {
        self.fulfilled = true;
        self
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled
    }

    /// Apply the one-way completion. Returns true if this call changed the flag.
    pub fn mark_fulfilled(&mut self) -> bool {
        let changed = !self.fulfilled;
        self.fulfilled = true;
        changed
    }
}
