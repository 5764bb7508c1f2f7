//! Typed JSON wrappers (`__type`), operator markers (`__op`) and the
//! document-level rewrites shared by the codec and the compilers.

use crate::error::{AdapterError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

/// Timestamp literal format accepted by `TIMESTAMP(6)` columns.
pub const ENGINE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Mean Earth radius used to turn radians into meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

static AUTH_DATA_KEY_RE: OnceLock<Regex> = OnceLock::new();

fn auth_data_key_re() -> &'static Regex {
    AUTH_DATA_KEY_RE
        .get_or_init(|| Regex::new(r"^_auth_data_([a-zA-Z0-9_]+)$").expect("valid regex"))
}

/// The `__type` marker of a typed wrapper.
pub fn type_tag(value: &Value) -> Option<&str> {
    value.get("__type").and_then(Value::as_str)
}

/// The `__op` marker of an update operator.
pub fn op_tag(value: &Value) -> Option<&str> {
    value.get("__op").and_then(Value::as_str)
}

pub fn is_delete_op(value: &Value) -> bool {
    op_tag(value) == Some("Delete")
}

/// `objectId` of a `Pointer` wrapper.
pub fn pointer_id(value: &Value) -> Option<&str> {
    if type_tag(value) != Some("Pointer") {
        return None;
    }
    value.get("objectId").and_then(Value::as_str)
}

/// Provider name of an `_auth_data_<provider>` pseudo-field.
pub fn auth_data_provider(key: &str) -> Option<&str> {
    auth_data_key_re()
        .captures(key)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Move every `_auth_data_<provider>` key into the `authData` object.
pub fn fold_auth_data(object: &mut Map<String, Value>) {
    let providers: Vec<String> = object
        .keys()
        .filter(|key| auth_data_provider(key).is_some())
        .cloned()
        .collect();
    if providers.is_empty() {
        return;
    }

    for key in providers {
        let Some(value) = object.remove(&key) else {
            continue;
        };
        let provider = auth_data_provider(&key).unwrap_or_default().to_string();
        let slot = object
            .entry("authData".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(auth_data) = slot {
            auth_data.insert(provider, value);
        }
    }
}

/// Expand `a.b.c` keys into nested objects. A `{"__op": "Delete"}` leaf
/// removes the key instead of storing the marker.
pub fn expand_dotted_keys(object: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(object.len());
    for (key, value) in object {
        if !key.contains('.') {
            out.insert(key, value);
            continue;
        }
        let segments: Vec<&str> = key.split('.').collect();
        let leaf = if is_delete_op(&value) { None } else { Some(value) };
        insert_path(&mut out, &segments, leaf);
    }
    out
}

fn insert_path(target: &mut Map<String, Value>, segments: &[&str], value: Option<Value>) {
    match segments {
        [] => {}
        [last] => match value {
            Some(value) => {
                target.insert(last.to_string(), value);
            }
            None => {
                target.remove(*last);
            }
        },
        [head, rest @ ..] => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Reject keys containing `$` or `.` at any depth.
pub fn validate_keys(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                validate_keys(child)?;
                if key.contains('$') || key.contains('.') {
                    return Err(AdapterError::InvalidNestedKey(key.clone()));
                }
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(validate_keys),
        _ => Ok(()),
    }
}

/// Parse an ISO-8601 date, or the engine's own timestamp format, as UTC.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn engine_timestamp(date: &DateTime<Utc>) -> String {
    date.format(ENGINE_TIMESTAMP_FORMAT).to_string()
}

/// ISO string with millisecond precision and a `Z` suffix.
pub fn iso_string(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    engine_timestamp(&Utc::now())
}

/// Lower a date-ish value (`{"__type": "Date", "iso": ..}` or a bare ISO
/// string) to a timestamp literal. `Ok(None)` when the wrapper has no iso.
pub fn date_to_timestamp(field: &str, value: &Value) -> Result<Option<String>> {
    let iso = match value {
        Value::String(text) => Some(text.as_str()),
        Value::Object(_) if type_tag(value) == Some("Date") => {
            value.get("iso").and_then(Value::as_str)
        }
        _ => return Err(AdapterError::incorrect_type(field, "expected a Date")),
    };
    match iso {
        None => Ok(None),
        Some(iso) => parse_date(iso)
            .map(|date| Some(engine_timestamp(&date)))
            .ok_or_else(|| AdapterError::incorrect_type(field, format!("invalid date {}", iso))),
    }
}

/// `{"__type": "Date", "iso": ..}` for a stored timestamp.
pub fn date_wrapper(date: &DateTime<Utc>) -> Value {
    json!({"__type": "Date", "iso": iso_string(date)})
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Read any object with numeric `latitude` and `longitude`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let latitude = value.get("latitude")?.as_f64()?;
        let longitude = value.get("longitude")?.as_f64()?;
        Some(Self::new(latitude, longitude))
    }

    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AdapterError::InvalidQuery(format!(
                "GeoPoint latitude out of bounds: {}",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AdapterError::InvalidQuery(format!(
                "GeoPoint longitude out of bounds: {}",
                self.longitude
            )));
        }
        Ok(())
    }

    /// `lng lat`, the coordinate order of WKT.
    pub fn wkt_coordinates(&self) -> String {
        format!("{} {}", self.longitude, self.latitude)
    }

    pub fn wkt(&self) -> String {
        format!("POINT({})", self.wkt_coordinates())
    }

    pub fn to_value(&self) -> Value {
        json!({"__type": "GeoPoint", "latitude": self.latitude, "longitude": self.longitude})
    }
}
