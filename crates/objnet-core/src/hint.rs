//! Type hints carried alongside every field name.
//!
//! On the wire a field key is `name:hint`, where the hint is one character
//! for a scalar, map or ref, or two characters (`a` + element) for a
//! homogeneous array. Hints are authoritative for decoding.

use std::fmt;

use crate::error::{CoreError, Result};

/// Separator between a field name and its hint.
pub const HINT_SEPARATOR: char = ':';

/// The kind of a single (non-array) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bool,
    String,
    Int,
    Float,
    Bytes,
    Map,
    Ref,
}

impl Kind {
    /// The single-character hint for this kind.
    pub const fn as_char(self) -> char {
        match self {
            Kind::Bool => 'b',
            Kind::String => 's',
            Kind::Int => 'i',
            Kind::Float => 'f',
            Kind::Bytes => 'd',
            Kind::Map => 'm',
            Kind::Ref => 'r',
        }
    }

    /// Parse a single-character hint.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'b' => Some(Kind::Bool),
            's' => Some(Kind::String),
            'i' => Some(Kind::Int),
            'f' => Some(Kind::Float),
            'd' => Some(Kind::Bytes),
            'm' => Some(Kind::Map),
            'r' => Some(Kind::Ref),
            _ => None,
        }
    }

    /// A ref stands in for the map it points to.
    pub const fn canonical(self) -> Self {
        match self {
            Kind::Ref => Kind::Map,
            other => other,
        }
    }
}

/// A field type hint: a kind, optionally wrapped in a homogeneous array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hint {
    kind: Kind,
    array: bool,
}

impl Hint {
    pub const BOOL: Hint = Hint::scalar(Kind::Bool);
    pub const STRING: Hint = Hint::scalar(Kind::String);
    pub const INT: Hint = Hint::scalar(Kind::Int);
    pub const FLOAT: Hint = Hint::scalar(Kind::Float);
    pub const BYTES: Hint = Hint::scalar(Kind::Bytes);
    pub const MAP: Hint = Hint::scalar(Kind::Map);
    pub const REF: Hint = Hint::scalar(Kind::Ref);

    /// A hint for a single value of the given kind.
    pub const fn scalar(kind: Kind) -> Self {
        Self { kind, array: false }
    }

    /// A hint for a homogeneous array of the given kind.
    pub const fn array(kind: Kind) -> Self {
        Self { kind, array: true }
    }

    /// The element kind (or the kind itself for non-arrays).
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Whether this hint describes an array.
    pub const fn is_array(&self) -> bool {
        self.array
    }

    /// The hint used when hashing: refs are hashed as the maps they replace.
    pub const fn canonical(&self) -> Self {
        Self {
            kind: self.kind.canonical(),
            array: self.array,
        }
    }

    /// Parse a textual hint such as `s` or `am`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let hint = match (chars.next(), chars.next(), chars.next()) {
            (Some('a'), Some(elem), None) => Kind::from_char(elem).map(Hint::array),
            (Some(c), None, None) => Kind::from_char(c).map(Hint::scalar),
            _ => None,
        };
        hint.ok_or_else(|| CoreError::InvalidHint(s.to_string()))
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "a{}", self.kind.as_char())
        } else {
            write!(f, "{}", self.kind.as_char())
        }
    }
}

/// Split a hinted key (`body:s`) into its bare name and hint.
pub fn split_key(key: &str) -> Result<(&str, Hint)> {
    let (name, hint) = key
        .rsplit_once(HINT_SEPARATOR)
        .ok_or_else(|| CoreError::MissingHint(key.to_string()))?;
    if name.is_empty() {
        return Err(CoreError::MissingHint(key.to_string()));
    }
    Ok((name, Hint::parse(hint)?))
}

/// Join a bare name and hint into a hinted key.
pub fn join_key(name: &str, hint: Hint) -> String {
    format!("{}{}{}", name, HINT_SEPARATOR, hint)
}
