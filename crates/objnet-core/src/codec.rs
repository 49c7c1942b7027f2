//! Hinted encodings of value maps.
//!
//! Both encodings carry the hint in the key (`name:hint`) and use it as the
//! sole authority when decoding:
//!
//! - JSON: bytes and refs as lowercase hex, non-finite floats as the hasher's
//!   sentinel strings.
//! - CBOR: the binary wire form. Bytes and refs are CBOR byte strings.

use ciborium::value::{Integer, Value as Cbor};
use serde_json::Value as Json;

use crate::error::{CoreError, Result};
use crate::hash::float_text;
use crate::hint::{join_key, split_key, Hint, Kind};
use crate::types::Digest;
use crate::value::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// JSON
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a map as hinted JSON.
pub fn map_to_json(map: &Map) -> Result<Json> {
    let mut out = serde_json::Map::with_capacity(map.len());
    for (name, value) in map {
        let hint = value.hint()?;
        out.insert(join_key(name, hint), value_to_json(value)?);
    }
    Ok(Json::Object(out))
}

/// Decode a hinted JSON object into a map.
pub fn map_from_json(json: &Json) -> Result<Map> {
    let object = json
        .as_object()
        .ok_or_else(|| CoreError::DecodingError("expected a JSON object".into()))?;
    let mut map = Map::new();
    for (key, value) in object {
        let (name, hint) = split_key(key)?;
        map.insert(name.to_string(), json_to_value(name, hint, value)?);
    }
    Ok(map)
}

fn value_to_json(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::String(s) => Json::String(s.clone()),
        Value::Int(n) => Json::from(*n),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or_else(|| Json::String(float_text(*f))),
        Value::Bytes(b) => Json::String(hex::encode(b)),
        Value::Ref(d) => Json::String(d.to_hex()),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(m) => map_to_json(m)?,
    })
}

fn json_to_value(name: &str, hint: Hint, json: &Json) -> Result<Value> {
    if hint.is_array() {
        let items = json
            .as_array()
            .ok_or_else(|| CoreError::mismatch(name, &hint.to_string()))?;
        return items
            .iter()
            .map(|item| json_scalar(name, hint.kind(), item))
            .collect::<Result<Vec<_>>>()
            .map(Value::List);
    }
    json_scalar(name, hint.kind(), json)
}

fn json_scalar(name: &str, kind: Kind, json: &Json) -> Result<Value> {
    let mismatch = || CoreError::mismatch(name, &Hint::scalar(kind).to_string());
    match kind {
        Kind::Bool => json.as_bool().map(Value::Bool).ok_or_else(mismatch),
        Kind::String => json
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(mismatch),
        Kind::Int => json.as_i64().map(Value::Int).ok_or_else(mismatch),
        Kind::Float => match json {
            Json::Number(n) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
            Json::String(s) => parse_float_sentinel(s).map(Value::Float).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        Kind::Bytes => {
            let text = json.as_str().ok_or_else(mismatch)?;
            hex::decode(text).map(Value::Bytes).map_err(|_| mismatch())
        }
        Kind::Ref => {
            let text = json.as_str().ok_or_else(mismatch)?;
            Digest::from_hex(text).map(Value::Ref).map_err(|_| mismatch())
        }
        Kind::Map => {
            if !json.is_object() {
                return Err(mismatch());
            }
            map_from_json(json).map(Value::Map)
        }
    }
}

fn parse_float_sentinel(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "+Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CBOR
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a map to CBOR bytes.
pub fn map_to_cbor(map: &Map) -> Result<Vec<u8>> {
    let value = map_to_cbor_value(map)?;
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&value, &mut buf)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

/// Decode CBOR bytes into a map.
pub fn map_from_cbor(bytes: &[u8]) -> Result<Map> {
    let value: Cbor =
        ciborium::de::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    match value {
        Cbor::Map(entries) => map_from_cbor_entries(entries),
        _ => Err(CoreError::DecodingError("expected a CBOR map".into())),
    }
}

fn map_to_cbor_value(map: &Map) -> Result<Cbor> {
    let mut entries = Vec::with_capacity(map.len());
    for (name, value) in map {
        let hint = value.hint()?;
        entries.push((Cbor::Text(join_key(name, hint)), value_to_cbor(value)?));
    }
    Ok(Cbor::Map(entries))
}

fn value_to_cbor(value: &Value) -> Result<Cbor> {
    Ok(match value {
        Value::Bool(b) => Cbor::Bool(*b),
        Value::String(s) => Cbor::Text(s.clone()),
        Value::Int(n) => Cbor::Integer(Integer::from(*n)),
        Value::Float(f) => Cbor::Float(*f),
        Value::Bytes(b) => Cbor::Bytes(b.clone()),
        Value::Ref(d) => Cbor::Bytes(d.as_bytes().to_vec()),
        Value::List(items) => Cbor::Array(
            items
                .iter()
                .map(value_to_cbor)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(m) => map_to_cbor_value(m)?,
    })
}

fn map_from_cbor_entries(entries: Vec<(Cbor, Cbor)>) -> Result<Map> {
    let mut map = Map::new();
    for (key, value) in entries {
        let key = match key {
            Cbor::Text(k) => k,
            _ => return Err(CoreError::DecodingError("map key is not text".into())),
        };
        let (name, hint) = split_key(&key)?;
        map.insert(name.to_string(), cbor_to_value(name, hint, value)?);
    }
    Ok(map)
}

fn cbor_to_value(name: &str, hint: Hint, cbor: Cbor) -> Result<Value> {
    if hint.is_array() {
        return match cbor {
            Cbor::Array(items) => items
                .into_iter()
                .map(|item| cbor_scalar(name, hint.kind(), item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            _ => Err(CoreError::mismatch(name, &hint.to_string())),
        };
    }
    cbor_scalar(name, hint.kind(), cbor)
}

fn cbor_scalar(name: &str, kind: Kind, cbor: Cbor) -> Result<Value> {
    let mismatch = || CoreError::mismatch(name, &Hint::scalar(kind).to_string());
    match (kind, cbor) {
        (Kind::Bool, Cbor::Bool(b)) => Ok(Value::Bool(b)),
        (Kind::String, Cbor::Text(s)) => Ok(Value::String(s)),
        (Kind::Int, Cbor::Integer(n)) => i64::try_from(i128::from(n))
            .map(Value::Int)
            .map_err(|_| mismatch()),
        (Kind::Float, Cbor::Float(f)) => Ok(Value::Float(f)),
        (Kind::Float, Cbor::Integer(n)) => Ok(Value::Float(i128::from(n) as f64)),
        (Kind::Bytes, Cbor::Bytes(b)) => Ok(Value::Bytes(b)),
        (Kind::Ref, Cbor::Bytes(b)) => Digest::try_from(b.as_slice())
            .map(Value::Ref)
            .map_err(|_| mismatch()),
        (Kind::Map, Cbor::Map(entries)) => map_from_cbor_entries(entries).map(Value::Map),
        _ => Err(mismatch()),
    }
}
