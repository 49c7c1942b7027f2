//! Hash vectors pinning the canonical hashing rules.
//!
//! Each vector is a pair of objects and whether they must hash the same.
//! They are structural: they fix which changes move a hash, not the hash
//! bytes themselves.

use serde::Serialize;

use objnet_core::{hash_map, sign, Keypair, Map, Object, Policy, Value};

/// Whether the two sides of a vector must hash the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    Equal,
    Different,
}

/// A hash vector.
#[derive(Debug, Clone)]
pub struct HashVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub expectation: Expectation,
    pub left: Object,
    pub right: Object,
}

/// A vector as hex hashes and JSON, for comparing implementations.
#[derive(Debug, Clone, Serialize)]
pub struct VectorReport {
    pub name: String,
    pub expectation: Expectation,
    pub left_hash: String,
    pub right_hash: String,
    pub left_json: serde_json::Value,
    pub passed: bool,
}

fn seed_keypair(byte: u8) -> Keypair {
    Keypair::from_seed(&[byte; 32])
}

fn base() -> Object {
    Object::new("test/doc")
        .with_field("title", "vectors")
        .with_field("count", 3i64)
}

fn child() -> Map {
    let mut map = Map::new();
    map.insert("name".into(), Value::from("leaf"));
    map.insert("size".into(), Value::from(42i64));
    map
}

/// Get all hash vectors.
pub fn all_vectors() -> Vec<HashVector> {
    let keypair = seed_keypair(0x42);

    let mut signed = base().with_owner(keypair.public_key());
    // Signing a freshly built object cannot fail.
    let _ = sign(&keypair, &mut signed);

    let mut with_request_id = base();
    with_request_id.set_request_id("req-1");

    vec![
        HashVector {
            name: "private fields are ignored",
            expectation: Expectation::Equal,
            left: base(),
            right: with_request_id,
        },
        HashVector {
            name: "signature is ignored",
            expectation: Expectation::Equal,
            left: base().with_owner(keypair.public_key()),
            right: signed,
        },
        HashVector {
            name: "reference substitutes for the map",
            expectation: Expectation::Equal,
            left: base().with_field("child", child()),
            right: base().with_field("child", Value::Ref(hash_map(&child()))),
        },
        HashVector {
            name: "empty list counts as absent",
            expectation: Expectation::Equal,
            left: base(),
            right: base().with_field("tags", Vec::<Value>::new()),
        },
        HashVector {
            name: "type participates",
            expectation: Expectation::Different,
            left: base(),
            right: Object {
                object_type: "test/other".into(),
                ..base()
            },
        },
        HashVector {
            name: "int and float differ",
            expectation: Expectation::Different,
            left: base().with_field("n", 1i64),
            right: base().with_field("n", 1.0f64),
        },
        HashVector {
            name: "owner participates",
            expectation: Expectation::Different,
            left: base().with_owner(seed_keypair(0x01).public_key()),
            right: base().with_owner(seed_keypair(0x02).public_key()),
        },
        HashVector {
            name: "policies participate",
            expectation: Expectation::Different,
            left: base(),
            right: base().with_policy(Policy::deny().action("read")),
        },
    ]
}

impl HashVector {
    pub fn passes(&self) -> bool {
        let equal = self.left.hash() == self.right.hash();
        match self.expectation {
            Expectation::Equal => equal,
            Expectation::Different => !equal,
        }
    }

    pub fn report(&self) -> VectorReport {
        VectorReport {
            name: self.name.to_string(),
            expectation: self.expectation,
            left_hash: self.left.hash().to_hex(),
            right_hash: self.right.hash().to_hex(),
            left_json: self.left.to_json().unwrap_or(serde_json::Value::Null),
            passed: self.passes(),
        }
    }
}

/// Check every vector. Returns the names of the failing ones.
pub fn verify_all_vectors() -> Result<(), Vec<String>> {
    let failed: Vec<String> = all_vectors()
        .iter()
        .filter(|v| !v.passes())
        .map(|v| v.name.to_string())
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_pass() {
        assert_eq!(verify_all_vectors(), Ok(()));
    }

    #[test]
    fn test_vectors_are_deterministic() {
        // Generate the vectors twice, verify identical hashes
        let first = all_vectors();
        let second = all_vectors();
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(
                a.left.hash(),
                b.left.hash(),
                "Vector '{}' produced different hashes on regeneration",
                a.name
            );
        }
    }

    #[test]
    fn test_report_serializes() {
        let vector = &all_vectors()[0];
        let json = serde_json::to_value(vector.report()).unwrap();
        assert_eq!(json["expectation"], "equal");
        assert_eq!(json["passed"], true);
        assert_eq!(json["left_hash"].as_str().map(str::len), Some(64));
    }
}
