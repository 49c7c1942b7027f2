//! Object: the self-describing unit of data.
//!
//! An object is a type string, a block of metadata and a map of data fields.
//! Its generic map form puts the type under `@type` and the metadata under
//! `@metadata`, next to the data fields. The canonical hash of that map is the
//! object's content address.

use std::collections::{BTreeMap, BTreeSet};

use crate::codec;
use crate::crypto::PublicKey;
use crate::error::{CoreError, Result};
use crate::hash::hash_map;
use crate::policy::{Effect, Policy};
use crate::signature::Signature;
use crate::types::Digest;
use crate::value::{Map, Value};

/// Map key holding the object type.
pub const TYPE_KEY: &str = "@type";

/// Map key holding the metadata block.
pub const METADATA_KEY: &str = "@metadata";

/// Metadata key holding the signature. Private, so never hashed.
pub const SIGNATURE_KEY: &str = "_signature";

/// Data key carrying the exchange request id. Private, so never hashed.
pub const REQUEST_ID_KEY: &str = "_requestID";

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    /// Key of the peer that owns this object. When set, only the owner may sign it.
    pub owner: Option<PublicKey>,
    /// Labelled parent links, e.g. `"*" -> [previous]`.
    pub parents: BTreeMap<String, Vec<Digest>>,
    pub policies: Vec<Policy>,
    /// The root object of the graph this object belongs to.
    pub root: Option<Digest>,
    pub sequence: u64,
    pub signature: Option<Signature>,
    pub timestamp: Option<String>,
}

impl Metadata {
    /// Map form. Unset fields are omitted.
    pub fn to_map(&self) -> Map {
        let mut map = Map::new();
        if let Some(owner) = &self.owner {
            map.insert("owner".into(), Value::from(owner.fingerprint()));
        }
        if !self.parents.is_empty() {
            let parents = self
                .parents
                .iter()
                .map(|(label, digests)| (label.clone(), Value::list(digests.iter().copied())))
                .collect();
            map.insert("parents".into(), Value::Map(parents));
        }
        if !self.policies.is_empty() {
            map.insert(
                "policies".into(),
                Value::list(self.policies.iter().map(Policy::to_map)),
            );
        }
        if let Some(root) = self.root {
            map.insert("root".into(), Value::Ref(root));
        }
        if self.sequence > 0 {
            // Saturate rather than wrap for sequences beyond i64.
            let sequence = i64::try_from(self.sequence).unwrap_or(i64::MAX);
            map.insert("sequence".into(), Value::Int(sequence));
        }
        if let Some(signature) = &self.signature {
            map.insert(SIGNATURE_KEY.into(), Value::Map(signature.to_map()));
        }
        if let Some(timestamp) = &self.timestamp {
            map.insert("timestamp".into(), Value::from(timestamp.as_str()));
        }
        map
    }

    pub fn from_map(map: &Map) -> Result<Self> {
        let mut metadata = Metadata::default();

        if let Some(owner) = map.get("owner") {
            let owner = owner
                .as_str()
                .ok_or_else(|| CoreError::mismatch("owner", "string"))?;
            metadata.owner = Some(owner.parse()?);
        }

        if let Some(parents) = map.get("parents") {
            let parents = parents
                .as_map()
                .ok_or_else(|| CoreError::mismatch("parents", "map"))?;
            for (label, digests) in parents {
                let digests = digests
                    .as_list()
                    .ok_or_else(|| CoreError::mismatch(label, "ref array"))?
                    .iter()
                    .map(|d| d.as_digest().ok_or_else(|| CoreError::mismatch(label, "ref array")))
                    .collect::<Result<Vec<_>>>()?;
                metadata.parents.insert(label.clone(), digests);
            }
        }

        if let Some(policies) = map.get("policies") {
            metadata.policies = policies
                .as_list()
                .ok_or_else(|| CoreError::mismatch("policies", "map array"))?
                .iter()
                .map(|p| {
                    p.as_map()
                        .ok_or_else(|| CoreError::mismatch("policies", "map array"))
                        .and_then(Policy::from_map)
                })
                .collect::<Result<Vec<_>>>()?;
        }

        if let Some(root) = map.get("root") {
            metadata.root = Some(
                root.as_digest()
                    .ok_or_else(|| CoreError::mismatch("root", "ref"))?,
            );
        }

        if let Some(sequence) = map.get("sequence") {
            metadata.sequence = sequence
                .as_int()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| CoreError::mismatch("sequence", "non-negative int"))?;
        }

        if let Some(signature) = map.get(SIGNATURE_KEY) {
            let signature = signature
                .as_map()
                .ok_or_else(|| CoreError::mismatch(SIGNATURE_KEY, "map"))?;
            metadata.signature = Some(Signature::from_map(signature)?);
        }

        if let Some(timestamp) = map.get("timestamp") {
            metadata.timestamp = Some(
                timestamp
                    .as_str()
                    .ok_or_else(|| CoreError::mismatch("timestamp", "string"))?
                    .to_string(),
            );
        }

        Ok(metadata)
    }
}

/// A typed, content-addressed object.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub object_type: String,
    pub metadata: Metadata,
    pub data: Map,
}

impl Object {
    /// Create an empty object of the given type.
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            metadata: Metadata::default(),
            data: Map::new(),
        }
    }

    /// Builder-style data field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn with_owner(mut self, owner: PublicKey) -> Self {
        self.metadata.owner = Some(owner);
        self
    }

    pub fn with_parent(mut self, label: impl Into<String>, parent: Digest) -> Self {
        self.metadata
            .parents
            .entry(label.into())
            .or_default()
            .push(parent);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.metadata.policies.push(policy);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Map form and hashing
    // ─────────────────────────────────────────────────────────────────────────

    /// The generic map form of this object.
    pub fn to_map(&self) -> Map {
        let mut map = self.data.clone();
        map.insert(TYPE_KEY.into(), Value::from(self.object_type.as_str()));
        let metadata = self.metadata.to_map();
        if !metadata.is_empty() {
            map.insert(METADATA_KEY.into(), Value::Map(metadata));
        }
        map
    }

    /// Rebuild an object from its generic map form.
    pub fn from_map(mut map: Map) -> Result<Self> {
        let object_type = match map.remove(TYPE_KEY) {
            Some(Value::String(t)) => t,
            Some(_) => return Err(CoreError::mismatch(TYPE_KEY, "string")),
            None => return Err(CoreError::MalformedObject("missing @type".into())),
        };
        let metadata = match map.remove(METADATA_KEY) {
            Some(Value::Map(m)) => Metadata::from_map(&m)?,
            Some(_) => return Err(CoreError::mismatch(METADATA_KEY, "map")),
            None => Metadata::default(),
        };
        Ok(Self {
            object_type,
            metadata,
            data: map,
        })
    }

    /// The canonical hash of this object. Signatures and private fields do not
    /// contribute.
    pub fn hash(&self) -> Digest {
        hash_map(&self.to_map())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Path access
    // ─────────────────────────────────────────────────────────────────────────

    /// Read the value at a `/`-separated path.
    ///
    /// Numeric segments index into lists. Paths rooted at `@type` or
    /// `@metadata` address the envelope fields.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segments = split_path(path).ok()?;
        let (first, rest) = segments.split_first()?;
        match *first {
            TYPE_KEY if rest.is_empty() => Some(Value::from(self.object_type.as_str())),
            TYPE_KEY => None,
            METADATA_KEY => lookup(&Value::Map(self.metadata.to_map()), rest).cloned(),
            _ => lookup(self.data.get(*first)?, rest).cloned(),
        }
    }

    /// Write a value at a `/`-separated path, creating intermediate maps.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let segments = split_path(path)?;
        match segments[0] {
            TYPE_KEY => {
                if segments.len() != 1 {
                    return Err(CoreError::InvalidPath(path.to_string()));
                }
                match value {
                    Value::String(t) => {
                        self.object_type = t;
                        Ok(())
                    }
                    _ => Err(CoreError::mismatch(TYPE_KEY, "string")),
                }
            }
            METADATA_KEY => {
                let map = if segments.len() == 1 {
                    match value {
                        Value::Map(m) => m,
                        _ => return Err(CoreError::mismatch(METADATA_KEY, "map")),
                    }
                } else {
                    let mut map = self.metadata.to_map();
                    assign(&mut map, &segments[1..], value, path)?;
                    map
                };
                self.metadata = Metadata::from_map(&map)?;
                Ok(())
            }
            _ => assign(&mut self.data, &segments, value, path),
        }
    }

    /// Remove and return the value at a path.
    ///
    /// `@type` cannot be removed.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments = split_path(path).ok()?;
        match segments[0] {
            TYPE_KEY => None,
            METADATA_KEY => {
                let mut map = self.metadata.to_map();
                let removed = detach(&mut map, &segments[1..])?;
                // Leave the metadata untouched if the result no longer parses.
                let metadata = Metadata::from_map(&map).ok()?;
                self.metadata = metadata;
                Some(removed)
            }
            _ => detach(&mut self.data, &segments),
        }
    }

    /// Walk every value in the map form depth first, calling `visitor` with
    /// each value's path. Returning `false` stops the walk.
    pub fn traverse<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &Value) -> bool,
    {
        let root = Value::Map(self.to_map());
        walk("", &root, &mut visitor);
    }

    /// Every digest referenced anywhere in the object, sorted and deduplicated.
    pub fn references(&self) -> Vec<Digest> {
        let mut refs = BTreeSet::new();
        self.traverse(|_, value| {
            if let Value::Ref(d) = value {
                refs.insert(*d);
            }
            true
        });
        refs.into_iter().collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Exchange helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// The request id stamped by the exchange, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.data.get(REQUEST_ID_KEY).and_then(Value::as_str)
    }

    pub fn set_request_id(&mut self, id: impl Into<String>) {
        self.data
            .insert(REQUEST_ID_KEY.into(), Value::String(id.into()));
    }

    /// Evaluate this object's policies for a probe.
    pub fn evaluate_policies(&self, subject: &PublicKey, resource: &str, action: &str) -> Effect {
        Policy::evaluate(&self.metadata.policies, subject, resource, action)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Encodings
    // ─────────────────────────────────────────────────────────────────────────

    /// Hinted JSON: every key carries its `:hint` suffix.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        codec::map_to_json(&self.to_map())
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        Self::from_map(codec::map_from_json(json)?)
    }

    /// Binary wire form (CBOR with hinted keys).
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        codec::map_to_cbor(&self.to_map())
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        Self::from_map(codec::map_from_cbor(bytes)?)
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(CoreError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

fn lookup<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value);
    };
    let next = match value {
        Value::Map(m) => m.get(*first)?,
        Value::List(items) => items.get(first.parse::<usize>().ok()?)?,
        _ => return None,
    };
    lookup(next, rest)
}

fn assign(map: &mut Map, segments: &[&str], value: Value, path: &str) -> Result<()> {
    let (first, rest) = segments
        .split_first()
        .ok_or_else(|| CoreError::InvalidPath(path.to_string()))?;
    if rest.is_empty() {
        map.insert(first.to_string(), value);
        return Ok(());
    }
    let child = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Map(Map::new()));
    assign_into(child, rest, value, path)
}

fn assign_into(target: &mut Value, segments: &[&str], value: Value, path: &str) -> Result<()> {
    match target {
        Value::Map(m) => assign(m, segments, value, path),
        Value::List(items) => {
            let invalid = || CoreError::InvalidPath(path.to_string());
            let (first, rest) = segments.split_first().ok_or_else(invalid)?;
            let index: usize = first.parse().map_err(|_| invalid())?;
            if rest.is_empty() && index == items.len() {
                items.push(value);
                return Ok(());
            }
            let slot = items.get_mut(index).ok_or_else(invalid)?;
            if rest.is_empty() {
                *slot = value;
                Ok(())
            } else {
                assign_into(slot, rest, value, path)
            }
        }
        _ => Err(CoreError::InvalidPath(path.to_string())),
    }
}

fn detach(map: &mut Map, segments: &[&str]) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    if rest.is_empty() {
        return map.remove(*first);
    }
    detach_from(map.get_mut(*first)?, rest)
}

fn detach_from(target: &mut Value, segments: &[&str]) -> Option<Value> {
    match target {
        Value::Map(m) => detach(m, segments),
        Value::List(items) => {
            let (first, rest) = segments.split_first()?;
            let index: usize = first.parse().ok()?;
            if rest.is_empty() {
                (index < items.len()).then(|| items.remove(index))
            } else {
                detach_from(items.get_mut(index)?, rest)
            }
        }
        _ => None,
    }
}

fn walk<F>(path: &str, value: &Value, visitor: &mut F) -> bool
where
    F: FnMut(&str, &Value) -> bool,
{
    if !path.is_empty() && !visitor(path, value) {
        return false;
    }
    let child_path = |segment: &str| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", path, segment)
        }
    };
    match value {
        Value::Map(m) => m.iter().all(|(k, v)| walk(&child_path(k), v, visitor)),
        Value::List(items) => items
            .iter()
            .enumerate()
            .all(|(i, v)| walk(&child_path(&i.to_string()), v, visitor)),
        _ => true,
    }
}
