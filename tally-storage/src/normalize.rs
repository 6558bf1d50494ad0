//! Ingestion adapter: raw store records to typed entities.
//!
//! Stored documents were written by several generations of clients and use
//! alternate names for the same field (`date`, `createdAt`, `timestamp`...)
//! and several timestamp encodings. All of that is folded here into the
//! canonical entity fields, so matching and metrics only ever see one
//! timestamp per entity. Missing optional data degrades to "no
//! contribution" (no timestamp, no line items, zero amount) rather than an
//! error.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use tally_core::{
    Customer, Fields, Forecast, LineItem, Record, Sale, TallyResult, Timestamp, ValidationError,
};

/// Field aliases for a sale's timestamp, in priority order.
pub const SALE_DATE_FIELDS: &[&str] = &["occurredAt", "date", "createdAt", "timestamp"];

/// Field aliases for a customer's registration timestamp, in priority order.
pub const CUSTOMER_DATE_FIELDS: &[&str] = &["registeredAt", "createdAt", "date"];

const CLIENT_FIELDS: &[&str] = &["clientIdentifier", "clientId", "client"];
const OWNER_FIELDS: &[&str] = &["ownerAccount", "userEmail", "owner"];
const AMOUNT_FIELDS: &[&str] = &["amount", "total", "value"];
const LINE_ITEM_FIELDS: &[&str] = &["lineItems", "items", "products"];
const PRODUCT_CODE_FIELDS: &[&str] = &["productCode", "code", "sku"];
const QUANTITY_FIELDS: &[&str] = &["quantity", "qty"];

/// Conversion from a raw store record.
pub trait FromRecord: Sized {
    fn from_record(record: &Record) -> Result<Self, ValidationError>;
}

fn first<'a>(fields: &'a Fields, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| fields.get(*name))
        .find(|value| !value.is_null())
}

fn first_string(fields: &Fields, names: &[&str]) -> Option<String> {
    match first(fields, names)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Everything not consumed by the typed schema.
fn extras(fields: &Fields, consumed: &[&[&str]]) -> Fields {
    fields
        .iter()
        .filter(|(name, _)| !consumed.iter().any(|group| group.contains(&name.as_str())))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Parse any supported timestamp encoding.
///
/// Accepts RFC 3339 strings, `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD` (local
/// time), epoch milliseconds, and `{seconds, nanoseconds}` objects (with or
/// without leading underscores).
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, nanos)
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

fn parse_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    amount.is_finite().then_some(amount)
}

fn parse_quantity(value: &Value) -> Option<f64> {
    let quantity = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (quantity.is_finite() && quantity >= 0.0).then_some(quantity)
}

fn parse_line_item(value: &Value) -> Option<LineItem> {
    let fields = value.as_object()?;
    let product_code = first_string(fields, PRODUCT_CODE_FIELDS)?;
    Some(LineItem {
        product_code,
        quantity: first(fields, QUANTITY_FIELDS).and_then(parse_quantity),
        extra: extras(fields, &[PRODUCT_CODE_FIELDS, QUANTITY_FIELDS]),
    })
}

/// Line items of a record. Entries without a product code are skipped.
fn parse_line_items(fields: &Fields) -> Vec<LineItem> {
    match first(fields, LINE_ITEM_FIELDS) {
        Some(Value::Array(items)) => items.iter().filter_map(parse_line_item).collect(),
        _ => Vec::new(),
    }
}

impl FromRecord for Sale {
    fn from_record(record: &Record) -> Result<Self, ValidationError> {
        let fields = &record.fields;
        Ok(Sale {
            id: record.id.clone(),
            client_identifier: first_string(fields, CLIENT_FIELDS).unwrap_or_default(),
            amount: first(fields, AMOUNT_FIELDS)
                .and_then(parse_amount)
                .unwrap_or(0.0),
            occurred_at: first(fields, SALE_DATE_FIELDS).and_then(parse_timestamp),
            line_items: parse_line_items(fields),
            owner_account: first_string(fields, OWNER_FIELDS).unwrap_or_default(),
            extra: extras(
                fields,
                &[
                    CLIENT_FIELDS,
                    AMOUNT_FIELDS,
                    SALE_DATE_FIELDS,
                    LINE_ITEM_FIELDS,
                    OWNER_FIELDS,
                ],
            ),
        })
    }
}

impl FromRecord for Customer {
    fn from_record(record: &Record) -> Result<Self, ValidationError> {
        let fields = &record.fields;
        Ok(Customer {
            id: record.id.clone(),
            client_identifier: first_string(fields, CLIENT_FIELDS),
            registered_at: first(fields, CUSTOMER_DATE_FIELDS).and_then(parse_timestamp),
            owner_account: first_string(fields, OWNER_FIELDS).unwrap_or_default(),
            extra: extras(fields, &[CLIENT_FIELDS, CUSTOMER_DATE_FIELDS, OWNER_FIELDS]),
        })
    }
}

impl FromRecord for Forecast {
    /// A forecast must name its client; without one it can never be matched.
    fn from_record(record: &Record) -> Result<Self, ValidationError> {
        let fields = &record.fields;
        let client = first_string(fields, CLIENT_FIELDS).ok_or_else(|| {
            ValidationError::RequiredFieldMissing {
                field: "clientIdentifier".to_string(),
            }
        })?;
        let mut forecast = Forecast::new(
            record.id.clone(),
            client,
            first_string(fields, OWNER_FIELDS).unwrap_or_default(),
            parse_line_items(fields),
        );
        if record.get_bool("fulfilled").unwrap_or(false) {
            forecast = forecast.already_fulfilled();
        }
        forecast.extra = extras(
            fields,
            &[CLIENT_FIELDS, OWNER_FIELDS, LINE_ITEM_FIELDS, &["fulfilled"]],
        );
        Ok(forecast)
    }
}

/// Decode every record, dropping (and logging) the ones that fail.
pub fn decode_all<T: FromRecord>(records: &[Record]) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| match T::from_record(record) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(record_id = %record.id, error = %e, "Skipping malformed record");
                None
            }
        })
        .collect()
}

/// Serialize a value into a document field map.
pub fn to_fields<T: Serialize>(value: &T) -> TallyResult<Fields> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::InvalidValue {
            field: "document".to_string(),
            reason: "value does not serialize to an object".to_string(),
        }
        .into()),
        Err(e) => Err(ValidationError::InvalidValue {
            field: "document".to_string(),
            reason: e.to_string(),
        }
        .into()),
    }
}
