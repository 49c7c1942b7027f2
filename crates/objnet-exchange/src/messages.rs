//! Protocol message types.
//!
//! Every protocol message travels as an ordinary object; these types give the
//! well-known object types a typed view.

use objnet_core::{CoreError, Digest, Object, PublicKey, Value};
use rand::distributions::{Alphanumeric, DistString};

pub const TYPE_SYN: &str = "handshake/syn";
pub const TYPE_SYN_ACK: &str = "handshake/syn-ack";
pub const TYPE_ACK: &str = "handshake/ack";
pub const TYPE_OBJECT_REQUEST: &str = "exchange/object.request";
pub const TYPE_OBJECT_FORWARD: &str = "exchange/object.forward";

/// Length of a handshake nonce in characters.
pub const NONCE_LENGTH: usize = 32;

/// A typed view of a protocol object.
pub trait Message: Sized {
    /// The object type this message is carried as.
    const TYPE: &'static str;

    fn to_object(&self) -> Object;

    fn from_object(object: &Object) -> Result<Self, CoreError>;
}

fn expect_type(object: &Object, expected: &str) -> Result<(), CoreError> {
    if object.object_type != expected {
        return Err(CoreError::MalformedObject(format!(
            "expected {}, got {}",
            expected, object.object_type
        )));
    }
    Ok(())
}

fn string_field<'a>(object: &'a Object, key: &str) -> Result<&'a str, CoreError> {
    object
        .data
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::TypeMismatch {
            key: key.to_string(),
            expected: "string".to_string(),
        })
}

/// A fresh random handshake nonce.
pub fn random_nonce() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), NONCE_LENGTH)
}

/// First handshake message, sent by the accepting side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syn {
    pub nonce: String,
}

/// Reply to [`Syn`], echoing its nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynAck {
    pub nonce: String,
}

/// Final handshake message, echoing the nonce again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub nonce: String,
}

impl Message for Syn {
    const TYPE: &'static str = TYPE_SYN;

    fn to_object(&self) -> Object {
        Object::new(Self::TYPE).with_field("nonce", self.nonce.as_str())
    }

    fn from_object(object: &Object) -> Result<Self, CoreError> {
        expect_type(object, Self::TYPE)?;
        Ok(Self {
            nonce: string_field(object, "nonce")?.to_string(),
        })
    }
}

impl Message for SynAck {
    const TYPE: &'static str = TYPE_SYN_ACK;

    fn to_object(&self) -> Object {
        Object::new(Self::TYPE).with_field("nonce", self.nonce.as_str())
    }

    fn from_object(object: &Object) -> Result<Self, CoreError> {
        expect_type(object, Self::TYPE)?;
        Ok(Self {
            nonce: string_field(object, "nonce")?.to_string(),
        })
    }
}

impl Message for Ack {
    const TYPE: &'static str = TYPE_ACK;

    fn to_object(&self) -> Object {
        Object::new(Self::TYPE).with_field("nonce", self.nonce.as_str())
    }

    fn from_object(object: &Object) -> Result<Self, CoreError> {
        expect_type(object, Self::TYPE)?;
        Ok(Self {
            nonce: string_field(object, "nonce")?.to_string(),
        })
    }
}

/// Ask a peer for the object stored under a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRequest {
    pub object_hash: Digest,
}

impl Message for ObjectRequest {
    const TYPE: &'static str = TYPE_OBJECT_REQUEST;

    fn to_object(&self) -> Object {
        Object::new(Self::TYPE).with_field("objectHash", self.object_hash)
    }

    fn from_object(object: &Object) -> Result<Self, CoreError> {
        expect_type(object, Self::TYPE)?;
        let object_hash = object
            .data
            .get("objectHash")
            .and_then(Value::as_digest)
            .ok_or_else(|| CoreError::TypeMismatch {
                key: "objectHash".to_string(),
                expected: "ref".to_string(),
            })?;
        Ok(Self { object_hash })
    }
}

/// Ask a relay to pass an object on to its recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectForwardRequest {
    pub recipient: PublicKey,
    pub object: Object,
}

impl Message for ObjectForwardRequest {
    const TYPE: &'static str = TYPE_OBJECT_FORWARD;

    fn to_object(&self) -> Object {
        Object::new(Self::TYPE)
            .with_field("recipient", self.recipient.fingerprint())
            .with_field("forwardedObject", self.object.to_map())
    }

    fn from_object(object: &Object) -> Result<Self, CoreError> {
        expect_type(object, Self::TYPE)?;
        let recipient = string_field(object, "recipient")?.parse()?;
        let forwarded = object
            .data
            .get("forwardedObject")
            .and_then(Value::as_map)
            .ok_or_else(|| CoreError::TypeMismatch {
                key: "forwardedObject".to_string(),
                expected: "map".to_string(),
            })?;
        Ok(Self {
            recipient,
            object: Object::from_map(forwarded.clone())?,
        })
    }
}
