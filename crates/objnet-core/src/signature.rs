//! Object signatures.
//!
//! A signature covers the canonical hash of the object. It is stored under the
//! private metadata key `_signature`, so attaching it never changes the hash it
//! signs.

use crate::crypto::{Ed25519Signature, Keypair, PublicKey};
use crate::error::{CoreError, Result};
use crate::object::Object;
use crate::value::{Map, Value};

/// The only signature algorithm currently produced or accepted.
pub const ALGORITHM_ED25519: &str = "ed25519";

/// A detached signature as stored in object metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signer: PublicKey,
    pub algorithm: String,
    pub x: Vec<u8>,
}

impl Signature {
    pub fn to_map(&self) -> Map {
        let mut map = Map::new();
        map.insert("signer".into(), Value::from(self.signer.fingerprint()));
        map.insert("alg".into(), Value::from(self.algorithm.as_str()));
        map.insert("x".into(), Value::Bytes(self.x.clone()));
        map
    }

    pub fn from_map(map: &Map) -> Result<Self> {
        let signer = map
            .get("signer")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::mismatch("signer", "string"))?
            .parse()?;
        let algorithm = map
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::mismatch("alg", "string"))?
            .to_string();
        let x = map
            .get("x")
            .and_then(Value::as_bytes)
            .ok_or_else(|| CoreError::mismatch("x", "bytes"))?
            .to_vec();
        Ok(Self {
            signer,
            algorithm,
            x,
        })
    }
}

/// Sign an object in place and return the attached signature.
///
/// Any existing signature is discarded first.
pub fn sign(keypair: &Keypair, object: &mut Object) -> Result<Signature> {
    object.metadata.signature = None;
    let digest = object.hash();
    let raw = keypair.sign(digest.as_bytes());
    let signature = Signature {
        signer: keypair.public_key(),
        algorithm: ALGORITHM_ED25519.to_string(),
        x: raw.as_bytes().to_vec(),
    };
    object.metadata.signature = Some(signature.clone());
    Ok(signature)
}

/// Verify the signature attached to an object.
///
/// If the object names an owner, the signer must be that owner.
pub fn verify(object: &Object) -> Result<()> {
    let signature = object
        .metadata
        .signature
        .as_ref()
        .ok_or(CoreError::MissingSignature)?;

    if signature.algorithm != ALGORITHM_ED25519 {
        return Err(CoreError::UnsupportedAlgorithm(signature.algorithm.clone()));
    }

    if let Some(owner) = &object.metadata.owner {
        if *owner != signature.signer {
            return Err(CoreError::OwnerMismatch {
                owner: owner.fingerprint(),
                signer: signature.signer.fingerprint(),
            });
        }
    }

    let raw = Ed25519Signature::try_from(signature.x.as_slice())?;
    let digest = object.hash();
    signature.signer.verify(digest.as_bytes(), &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Object {
        Object::new("test/msg").with_field("body", "hello")
    }

    #[test]
    fn test_sign_then_verify() {
        let keypair = Keypair::generate();
        let mut object = message();
        let before = object.hash();

        let signature = sign(&keypair, &mut object).unwrap();
        assert_eq!(signature.signer, keypair.public_key());
        assert_eq!(signature.algorithm, ALGORITHM_ED25519);
        assert_eq!(signature.x.len(), 64);

        // Signing does not change the hash.
        assert_eq!(object.hash(), before);
        verify(&object).unwrap();
        // Verification is idempotent.
        verify(&object).unwrap();
    }

    #[test]
    fn test_unsigned_object_fails() {
        assert!(matches!(verify(&message()), Err(CoreError::MissingSignature)));
    }

    #[test]
    fn test_tampered_object_fails() {
        let keypair = Keypair::generate();
        let mut object = message();
        sign(&keypair, &mut object).unwrap();

        object.data.insert("body".into(), Value::from("goodbye"));
        assert!(matches!(verify(&object), Err(CoreError::InvalidSignature)));
    }

    #[test]
    fn test_owner_must_be_signer() {
        let owner = Keypair::generate();
        let other = Keypair::generate();

        let mut object = message();
        object.metadata.owner = Some(owner.public_key());
        sign(&other, &mut object).unwrap();
        assert!(matches!(
            verify(&object),
            Err(CoreError::OwnerMismatch { .. })
        ));

        sign(&owner, &mut object).unwrap();
        verify(&object).unwrap();
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let keypair = Keypair::generate();
        let mut object = message();
        sign(&keypair, &mut object).unwrap();
        if let Some(sig) = object.metadata.signature.as_mut() {
            sig.algorithm = "rsa".into();
        }
        assert!(matches!(
            verify(&object),
            Err(CoreError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_signature_map_roundtrip() {
        let keypair = Keypair::generate();
        let mut object = message();
        let signature = sign(&keypair, &mut object).unwrap();
        assert_eq!(Signature::from_map(&signature.to_map()).unwrap(), signature);
    }
}
