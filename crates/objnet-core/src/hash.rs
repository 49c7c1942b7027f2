//! Canonical content hashing.
//!
//! The hash of a value depends only on its logical content:
//!
//! - scalars hash as `H(hint ‖ bytes)`
//! - maps hash each surviving entry as `H(H("s", "key:hint") ‖ H(value))`,
//!   concatenate the entry digests in key order, and hash that under `m`
//! - lists hash the concatenation of their element digests under the array hint
//! - a ref *is* the digest it carries
//!
//! Keys starting with `_` are never hashed, so signatures and other private
//! fields can be attached without changing the digest they cover. Ref hints are
//! hashed as map hints, which makes a ref interchangeable with the map it
//! points to.

use crate::hint::Hint;
use crate::value::{Map, Value};
use crate::types::Digest;

/// Prefix marking a key as private (excluded from hashing).
pub const PRIVATE_PREFIX: char = '_';

/// Blake3 over the hint text followed by the payload.
pub fn digest_with_hint(hint: Hint, bytes: &[u8]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(hint.to_string().as_bytes());
    hasher.update(bytes);
    Digest::from_bytes(*hasher.finalize().as_bytes())
}

/// The canonical hash of a value, or `None` for values with no hashable
/// content (empty maps, empty lists, maps with only private keys).
pub fn canonical_hash(value: &Value) -> Option<Digest> {
    match value {
        Value::Bool(b) => Some(digest_with_hint(Hint::BOOL, &[u8::from(*b)])),
        Value::String(s) => Some(digest_with_hint(Hint::STRING, s.as_bytes())),
        Value::Int(n) => Some(digest_with_hint(Hint::INT, n.to_string().as_bytes())),
        Value::Float(f) => Some(digest_with_hint(Hint::FLOAT, float_text(*f).as_bytes())),
        Value::Bytes(b) => Some(digest_with_hint(Hint::BYTES, b)),
        Value::Ref(d) => Some(*d),
        Value::Map(map) => map_digest(map),
        Value::List(items) => list_digest(value.lenient_hint().canonical(), items),
    }
}

/// The hash of a map, falling back to the hash of an empty map body when no
/// entry survives.
pub fn hash_map(map: &Map) -> Digest {
    map_digest(map).unwrap_or_else(|| digest_with_hint(Hint::MAP, &[]))
}

/// Textual float form: shortest round-trip decimal, with fixed sentinels for
/// the non-finite values.
pub fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f64::INFINITY {
        "+Inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{}", f)
    }
}

fn map_digest(map: &Map) -> Option<Digest> {
    let mut concat = Vec::with_capacity(map.len() * 32);
    for (key, value) in map {
        if key.starts_with(PRIVATE_PREFIX) {
            continue;
        }
        let Some(value_digest) = canonical_hash(value) else {
            continue;
        };
        let hinted_key = format!("{}:{}", key, value.lenient_hint().canonical());
        let key_digest = digest_with_hint(Hint::STRING, hinted_key.as_bytes());

        let mut hasher = blake3::Hasher::new();
        hasher.update(key_digest.as_bytes());
        hasher.update(value_digest.as_bytes());
        concat.extend_from_slice(hasher.finalize().as_bytes());
    }
    if concat.is_empty() {
        return None;
    }
    Some(digest_with_hint(Hint::MAP, &concat))
}

fn list_digest(hint: Hint, items: &[Value]) -> Option<Digest> {
    let mut concat = Vec::with_capacity(items.len() * 32);
    for item in items {
        if let Some(d) = canonical_hash(item) {
            concat.extend_from_slice(d.as_bytes());
        }
    }
    if concat.is_empty() {
        return None;
    }
    Some(digest_with_hint(hint, &concat))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, Value)>) -> Map {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_string_hash_is_hint_prefixed() {
        let expected = blake3::hash(b"shello");
        assert_eq!(
            canonical_hash(&Value::from("hello")).unwrap().as_bytes(),
            expected.as_bytes()
        );
    }

    #[test]
    fn test_int_hashes_decimal_text() {
        let expected = blake3::hash(b"i-42");
        assert_eq!(
            canonical_hash(&Value::from(-42i64)).unwrap().as_bytes(),
            expected.as_bytes()
        );
    }

    #[test]
    fn test_bool_hashes_single_byte() {
        let expected = blake3::hash(b"b\x01");
        assert_eq!(
            canonical_hash(&Value::from(true)).unwrap().as_bytes(),
            expected.as_bytes()
        );
    }

    #[test]
    fn test_float_sentinels() {
        assert_eq!(float_text(f64::NAN), "NaN");
        assert_eq!(float_text(f64::INFINITY), "+Inf");
        assert_eq!(float_text(f64::NEG_INFINITY), "-Inf");
        assert_eq!(float_text(1.5), "1.5");
        assert_eq!(float_text(0.1), "0.1");

        let a = canonical_hash(&Value::from(f64::NAN)).unwrap();
        let b = canonical_hash(&Value::from(f64::NAN)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_map_hash_ignores_insertion_order() {
        let mut a = Map::new();
        a.insert("x".into(), Value::from(1i64));
        a.insert("y".into(), Value::from("two"));

        let mut b = Map::new();
        b.insert("y".into(), Value::from("two"));
        b.insert("x".into(), Value::from(1i64));

        assert_eq!(hash_map(&a), hash_map(&b));
    }

    #[test]
    fn test_private_keys_are_excluded() {
        let plain = map(vec![("body", Value::from("hi"))]);
        let with_private = map(vec![
            ("body", Value::from("hi")),
            ("_signature", Value::from("anything")),
        ]);
        assert_eq!(hash_map(&plain), hash_map(&with_private));
    }

    #[test]
    fn test_empty_values_are_dropped() {
        let plain = map(vec![("body", Value::from("hi"))]);
        let with_empty = map(vec![
            ("body", Value::from("hi")),
            ("tags", Value::List(vec![])),
            ("inner", Value::Map(Map::new())),
        ]);
        assert_eq!(hash_map(&plain), hash_map(&with_empty));
        assert!(canonical_hash(&Value::Map(Map::new())).is_none());
        assert!(canonical_hash(&Value::List(vec![])).is_none());
    }

    #[test]
    fn test_ref_substitutes_for_inline_map() {
        let inner = map(vec![("name", Value::from("leaf"))]);
        let inner_digest = hash_map(&inner);

        let inline = map(vec![("child", Value::Map(inner))]);
        let by_ref = map(vec![("child", Value::Ref(inner_digest))]);
        assert_eq!(hash_map(&inline), hash_map(&by_ref));
    }

    #[test]
    fn test_ref_list_substitutes_for_map_list() {
        let a = map(vec![("n", Value::from(1i64))]);
        let b = map(vec![("n", Value::from(2i64))]);
        let refs = Value::List(vec![Value::Ref(hash_map(&a)), Value::Ref(hash_map(&b))]);
        let inline = Value::List(vec![Value::Map(a), Value::Map(b)]);
        assert_eq!(canonical_hash(&refs), canonical_hash(&inline));
    }

    #[test]
    fn test_type_changes_hash() {
        let as_string = map(vec![("n", Value::from("1"))]);
        let as_int = map(vec![("n", Value::from(1i64))]);
        assert_ne!(hash_map(&as_string), hash_map(&as_int));
    }
}
