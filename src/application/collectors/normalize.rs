//! Cell normalisation shared by the collectors
//!
//! The source mixes JSON numbers with display strings (`$12,991`, `+29.91%`,
//! `20x`). Everything funnels through here so each collector only states
//! which fields it wants.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::domain::errors::{CollectError, CollectResult};

/// Unix timestamps above this are milliseconds
const MILLIS_THRESHOLD: u64 = 1_000_000_000_000;

pub type Row = Map<String, Value>;

/// First present, non-null value among `keys`
pub fn field<'a>(row: &'a Row, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .find(|value| !value.is_null())
}

/// Strip display decoration from a numeric cell; `None` for blank or `-`
pub fn clean_number(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '%' | ',' | '+' | 'x' | 'X'))
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        None
    } else {
        Some(cleaned)
    }
}

/// Optional decimal; a present but unreadable value is a parse error
pub fn opt_f64(row: &Row, keys: &[&str]) -> CollectResult<Option<f64>> {
    match field(row, keys) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => match clean_number(s) {
            None => Ok(None),
            Some(cleaned) => cleaned
                .parse::<f64>()
                .map(Some)
                .map_err(|_| CollectError::parse(format!("'{}' is not a number: {:?}", keys[0], s))),
        },
        Some(other) => Err(CollectError::parse(format!(
            "'{}' has unexpected type: {}",
            keys[0], other
        ))),
    }
}

pub fn req_f64(row: &Row, keys: &[&str]) -> CollectResult<f64> {
    opt_f64(row, keys)?.ok_or_else(|| CollectError::parse(format!("missing '{}'", keys[0])))
}

/// Optional integer; decimals are truncated (`20.0x` leverage)
pub fn opt_i64(row: &Row, keys: &[&str]) -> CollectResult<Option<i64>> {
    Ok(opt_f64(row, keys)?.map(|v| v.trunc() as i64))
}

pub fn opt_str<'a>(row: &'a Row, keys: &[&str]) -> Option<&'a str> {
    field(row, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "-")
}

pub fn req_str<'a>(row: &'a Row, keys: &[&str]) -> CollectResult<&'a str> {
    opt_str(row, keys).ok_or_else(|| CollectError::parse(format!("missing '{}'", keys[0])))
}

/// Parse an RFC 3339 string or unix seconds / milliseconds
pub fn parse_timestamp(value: &Value) -> CollectResult<DateTime<Utc>> {
    let from_unix = |n: i64| {
        let parsed = if n.unsigned_abs() > MILLIS_THRESHOLD {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        };
        parsed.ok_or_else(|| CollectError::parse(format!("timestamp out of range: {}", n)))
    };

    match value {
        Value::Number(n) => match n.as_i64() {
            Some(n) => from_unix(n),
            None => n
                .as_f64()
                .map(|f| f.trunc() as i64)
                .ok_or_else(|| CollectError::parse(format!("bad timestamp: {}", n)))
                .and_then(from_unix),
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return from_unix(n);
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| CollectError::parse(format!("bad timestamp {:?}: {}", s, e)))
        }
        other => Err(CollectError::parse(format!("bad timestamp: {}", other))),
    }
}

pub fn opt_timestamp(row: &Row, keys: &[&str]) -> CollectResult<Option<DateTime<Utc>>> {
    match field(row, keys) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() || s.trim() == "-" => Ok(None),
        Some(value) => parse_timestamp(value).map(Some),
    }
}

pub fn req_timestamp(row: &Row, keys: &[&str]) -> CollectResult<DateTime<Utc>> {
    opt_timestamp(row, keys)?.ok_or_else(|| CollectError::parse(format!("missing '{}'", keys[0])))
}

/// Locate the row array of a page: either the payload itself or the first
/// of `keys` holding an array
pub fn rows<'a>(payload: &'a Value, keys: &[&str]) -> CollectResult<Vec<&'a Row>> {
    let array = match payload {
        Value::Array(items) => items,
        Value::Object(map) => keys
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .ok_or_else(|| CollectError::parse(format!("missing '{}' array", keys[0])))?,
        other => {
            return Err(CollectError::parse(format!(
                "unexpected page shape: {}",
                type_name(other)
            )))
        }
    };

    array
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_object()
                .ok_or_else(|| CollectError::parse(format!("row {} is not an object", i)))
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
