//! Proptest generators for property-based testing.

use proptest::prelude::*;

use objnet_core::{Digest, Keypair, Map, Object, PublicKey, Value};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random public key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a random digest.
pub fn digest() -> impl Strategy<Value = Digest> {
    any::<[u8; 32]>().prop_map(Digest::from_bytes)
}

/// Generate an object type such as `test/msg`.
pub fn object_type() -> impl Strategy<Value = String> {
    "[a-z]{1,8}/[a-z][a-z.-]{0,11}".prop_map(String::from)
}

/// Generate a public field name (no hint, no private prefix).
pub fn field_name() -> impl Strategy<Value = String> {
    "[a-z][a-zA-Z0-9]{0,11}".prop_map(String::from)
}

/// Finite floats only: NaN never equals itself.
fn finite_float() -> impl Strategy<Value = f64> {
    -1.0e12f64..1.0e12f64
}

/// Generate a scalar value.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        "[ -~]{0,24}".prop_map(Value::String),
        any::<i64>().prop_map(Value::Int),
        finite_float().prop_map(Value::Float),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        digest().prop_map(Value::Ref),
    ]
}

/// Generate a list whose elements all share one kind.
pub fn homogeneous_list() -> impl Strategy<Value = Value> {
    let len = 1usize..5;
    prop_oneof![
        prop::collection::vec(any::<bool>().prop_map(Value::Bool), len.clone()),
        prop::collection::vec(any::<i64>().prop_map(Value::Int), len.clone()),
        prop::collection::vec("[a-z]{0,8}".prop_map(Value::String), len.clone()),
        prop::collection::vec(finite_float().prop_map(Value::Float), len),
    ]
    .prop_map(Value::List)
}

/// Generate an arbitrary value tree.
pub fn value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![scalar(), homogeneous_list()];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map(field_name(), inner, 0..4).prop_map(Value::Map)
    })
}

/// Generate an object data map.
pub fn data() -> impl Strategy<Value = Map> {
    prop::collection::btree_map(field_name(), value(), 0..6)
}

/// Generate an unsigned object.
pub fn object() -> impl Strategy<Value = Object> {
    (object_type(), data()).prop_map(|(object_type, data)| {
        let mut object = Object::new(object_type);
        object.data = data;
        object
    })
}

/// Parameters for a signed message object.
#[derive(Debug, Clone)]
pub struct MessageParams {
    pub keypair: Keypair,
    pub object_type: String,
    pub body: String,
    pub sequence: u64,
    pub attachment: Vec<u8>,
}

impl Arbitrary for MessageParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(), // seed
            object_type(),
            "[ -~]{0,64}",
            0u64..=1_000_000u64,
            prop::collection::vec(any::<u8>(), 0..256),
        )
            .prop_map(|(seed, object_type, body, sequence, attachment)| MessageParams {
                keypair: Keypair::from_seed(&seed),
                object_type,
                body,
                sequence,
                attachment,
            })
            .boxed()
    }
}

/// Build and sign a message object from parameters.
pub fn message_from_params(params: &MessageParams) -> Object {
    let mut object = Object::new(params.object_type.as_str())
        .with_owner(params.keypair.public_key())
        .with_field("body", params.body.as_str())
        .with_field("attachment", params.attachment.clone());
    object.metadata.sequence = params.sequence;
    // Signing a freshly built object cannot fail.
    let _ = objnet_core::sign(&params.keypair, &mut object);
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use objnet_core::verify;

    proptest! {
        #[test]
        fn test_message_hash_deterministic(params: MessageParams) {
            let m1 = message_from_params(&params);
            let m2 = message_from_params(&params);
            prop_assert_eq!(m1.hash(), m2.hash());
        }

        #[test]
        fn test_message_verifies(params: MessageParams) {
            let message = message_from_params(&params);
            prop_assert!(verify(&message).is_ok());
        }

        #[test]
        fn test_hash_changes_with_body(
            seed in any::<[u8; 32]>(),
            b1 in "[a-z]{1,16}",
            b2 in "[a-z]{1,16}",
        ) {
            prop_assume!(b1 != b2);
            let keypair = Keypair::from_seed(&seed);
            let m1 = Object::new("test/msg").with_owner(keypair.public_key()).with_field("body", b1);
            let m2 = Object::new("test/msg").with_owner(keypair.public_key()).with_field("body", b2);
            prop_assert_ne!(m1.hash(), m2.hash());
        }

        #[test]
        fn test_generated_values_have_hints(value in value()) {
            prop_assert!(value.hint().is_ok());
        }
    }
}
