use serde_json::Value;
use uuid::Uuid;

use crate::utils::time::parse_client_datetime;

pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// `None` when omitted, `Some(None)` when null or empty, `Some(Some(_))` otherwise.
pub fn nullable_string(body: &Value, key: &str) -> Result<Option<Option<String>>, String> {
    match classify_nullable(body.get(key)).map_err(|err| format!("{key}: {err}"))? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Ok(Some(None)),
        NullableValue::String(value) if value.trim().is_empty() => Ok(Some(None)),
        NullableValue::String(value) => Ok(Some(Some(value.trim().to_string()))),
    }
}

pub fn nullable_uuid(body: &Value, key: &str) -> Result<Option<Option<Uuid>>, String> {
    match nullable_string(body, key)? {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(raw)) => Uuid::parse_str(&raw)
            .map(|id| Some(Some(id)))
            .map_err(|_| format!("{key} must be a valid id")),
    }
}

pub fn nullable_datetime(
    body: &Value,
    key: &str,
) -> Result<Option<Option<chrono::NaiveDateTime>>, String> {
    match nullable_string(body, key)? {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(raw)) => parse_client_datetime(&raw)
            .map(|dt| Some(Some(dt)))
            .ok_or_else(|| format!("{key} must be a date")),
    }
}

/// A required-if-present string: omitted is `None`, null or blank is an error.
pub fn present_string(body: &Value, key: &str) -> Result<Option<String>, String> {
    match nullable_string(body, key)? {
        None => Ok(None),
        Some(None) => Err(format!("{key} must not be empty")),
        Some(Some(value)) => Ok(Some(value)),
    }
}

/// Trimmed, non-empty string value of `key`, if there is one.
pub fn required_string(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Accepts either a bare id or a populated object carrying `_id`.
pub fn reference_id(value: &Value) -> Option<Uuid> {
    match value {
        Value::String(raw) => Uuid::parse_str(raw.trim()).ok(),
        Value::Object(map) => map.get("_id").and_then(reference_id),
        _ => None,
    }
}

pub fn reference_ids(body: &Value, key: &str) -> Result<Option<Vec<Uuid>>, String> {
    match body.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(Vec::new())),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| reference_id(item).ok_or_else(|| format!("{key} must contain valid ids")))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(format!("{key} must be a list of ids")),
    }
}
