//! Decoding of the margin endpoint's reply.
//!
//! The endpoint is an ASP.NET page method, so replies arrive wrapped as
//! `{"d": {"Summary": {"Count": N}, "Data": [...]}}`, where `d` may itself be a
//! JSON-encoded string. A bare top-level array is accepted too.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::scrape::types::{RawRow, ResponseError};

const WRAPPER_KEY: &str = "d";
const SUMMARY_KEY: &str = "Summary";
const COUNT_KEY: &str = "Count";
const DATA_KEY: &str = "Data";

/// `Ok(vec![])` means the backend answered with zero rows (a holiday, usually).
pub fn parse_api_response(body: &str) -> Result<Vec<RawRow>, ResponseError> {
    let value: Value = serde_json::from_str(body)?;

    match value {
        Value::Object(mut outer) if outer.contains_key(WRAPPER_KEY) => {
            let inner = match outer.remove(WRAPPER_KEY) {
                Some(Value::String(encoded)) => serde_json::from_str::<Value>(&encoded)?,
                Some(other) => other,
                None => Value::Null,
            };
            unwrap_envelope(inner)
        }
        Value::Array(items) => Ok(keep_objects(items)),
        other => Err(ResponseError::UnexpectedShape(shape_of(&other).into())),
    }
}

fn unwrap_envelope(inner: Value) -> Result<Vec<RawRow>, ResponseError> {
    let Value::Object(mut envelope) = inner else {
        return Err(ResponseError::UnexpectedShape(format!(
            "wrapper holds {}",
            shape_of(&inner)
        )));
    };

    let count = envelope
        .get(SUMMARY_KEY)
        .and_then(|s| s.get(COUNT_KEY))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    info!(count, "margin API summary");

    match envelope.remove(DATA_KEY) {
        None | Some(Value::Null) => {
            info!("margin API returned no data");
            Ok(Vec::new())
        }
        Some(Value::Array(items)) => Ok(keep_objects(items)),
        Some(other) => Err(ResponseError::UnexpectedShape(format!(
            "Data is {}",
            shape_of(&other)
        ))),
    }
}

fn keep_objects(items: Vec<Value>) -> Vec<RawRow> {
    let total = items.len();
    let rows: Vec<RawRow> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();
    if rows.len() < total {
        warn!(dropped = total - rows.len(), "dropped non-object entries from margin data");
    }
    debug!(rows = rows.len(), "decoded margin rows");
    rows
}

fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
