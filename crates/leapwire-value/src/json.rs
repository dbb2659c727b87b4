//! Conversions between [`Value`] and [`serde_json::Value`].
//!
//! JSON has fewer types than LLSD, so the mapping is lossy in one direction:
//! uuids, dates and URIs become strings, binary becomes a base64 string and
//! undefined becomes `null`. Going the other way, integers that fit in `i32`
//! stay integers and every other number becomes a real.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::SecondsFormat;
use serde_json::Value as Json;

use crate::map::Map;
use crate::value::Value;

impl From<&Value> for Json {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Integer(n) => Json::from(*n),
            // Non-finite reals have no JSON spelling.
            Value::Real(r) => serde_json::Number::from_f64(*r).map_or(Json::Null, Json::Number),
            Value::String(s) | Value::Uri(s) => Json::String(s.clone()),
            Value::Uuid(u) => Json::String(u.hyphenated().to_string()),
            Value::Date(d) => Json::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Binary(bytes) => Json::String(STANDARD.encode(bytes)),
            Value::Array(items) => Json::Array(items.iter().map(Json::from).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(key, item)| (key.to_string(), Json::from(item)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        Json::from(&value)
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Undefined,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => match n.as_i64().and_then(|n| i32::try_from(n).ok()) {
                Some(n) => Value::Integer(n),
                None => Value::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(object) => {
                let mut map = Map::with_capacity(object.len());
                for (key, item) in object {
                    map.insert(key, Value::from(item));
                }
                Value::Map(map)
            }
        }
    }
}
