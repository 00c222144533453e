use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Parse a timestamp as returned by the hosted store.
///
/// `timestamptz` columns come back as RFC 3339 with an offset; plain
/// `timestamp` columns come back without one and are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Postgres may also render the offset as "+00" without minutes
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Format used for `gte` filters and inserted timestamps.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| D::Error::custom(format!("unrecognised timestamp: {raw}")))
}

/// Relay columns are stored as booleans on newer firmware and as 0/1 or
/// "on"/"off" on older units.
pub fn deserialize_bool_like<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v == 0.0 => Ok(Some(false)),
            Some(v) if v == 1.0 => Ok(Some(true)),
            _ => Err(D::Error::custom(format!("expected 0 or 1, got {n}"))),
        },
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(Some(true)),
            "false" | "off" | "0" => Ok(Some(false)),
            _ => Err(D::Error::custom(format!("expected boolean-like string, got {s:?}"))),
        },
        Some(other) => Err(D::Error::custom(format!("expected boolean-like value, got {other}"))),
    }
}

/// Render a reading the way the dashboard prints numbers: `-0` as `0`, and
/// exponent notation below 1e-6 or from 1e21 up.
pub fn format_number(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let abs = v.abs();
    if !(1e-6..1e21).contains(&abs) {
        let s = format!("{:e}", v);
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => s,
        };
    }
    v.to_string()
}

/// Decode JSON rows one by one, reporting the row index and field path of
/// the first failure.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, String> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            serde_path_to_error::deserialize(row).map_err(|e| format!("row {index}: {e}"))
        })
        .collect()
}

/// Read an optional numeric column from a raw JSON row.
pub fn number_field(row: &Value, column: &str) -> Option<f64> {
    row.get(column).and_then(Value::as_f64)
}
