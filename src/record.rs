use crate::error::Error;
use serde::Deserialize;
use serde_json::{Map, Value};

const ACTIONS_FIELD: &str = "actions";

/// One row of fetched report data, as returned by the reporting source.
///
/// Scalar metrics arrive as JSON strings or numbers; the `actions` field, when
/// present, holds a list of `{"action_type": ..., "value": ...}` entries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the field rendered as a cell, or `None` if the record lacks it.
    ///
    /// A JSON `null` counts as absent. Nested values cannot be rendered as a
    /// single cell and are rejected.
    pub fn scalar(&self, field: &str) -> Result<Option<String>, Error> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(Value::Array(_)) | Some(Value::Object(_)) => Err(Error::schema(format!(
                "field '{field}' holds a nested value and cannot be written to a single column"
            ))),
        }
    }
}

/// Scans the record's `actions` list for the first entry of `action_type`
/// and returns its count.
///
/// Returns 0 when `actions` is missing or not a list, or when no entry
/// matches. An entry without a `value` counts as 0.
pub fn extract_action(record: &Record, action_type: &str) -> Result<i64, Error> {
    let Some(Value::Array(actions)) = record.get(ACTIONS_FIELD) else {
        return Ok(0);
    };

    let matched = actions
        .iter()
        .find(|action| action.get("action_type").and_then(Value::as_str) == Some(action_type));

    match matched.and_then(|action| action.get("value")) {
        None => Ok(0),
        Some(value) => parse_count(value).ok_or_else(|| {
            Error::schema(format!(
                "action '{action_type}' has a non-integer value: {value}"
            ))
        }),
    }
}

/// Extracts `primary`, substituting each fallback in turn while the result
/// is exactly zero.
pub fn extract_with_fallback(
    record: &Record,
    primary: &str,
    fallbacks: &[String],
) -> Result<i64, Error> {
    let mut value = extract_action(record, primary)?;
    for fallback in fallbacks {
        if value != 0 {
            break;
        }
        value = extract_action(record, fallback)?;
    }
    Ok(value)
}

fn parse_count(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        Value::Null => Some(0),
        _ => None,
    }
}
