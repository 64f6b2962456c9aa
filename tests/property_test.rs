//! Property-based tests using proptest.
//!
//! These verify invariants that must hold for any valid input: JCS
//! canonicalization is key-order invariant, envelope crypto round-trips,
//! and receipts verify for arbitrary request/output content.

use proptest::prelude::*;
use serde_json::json;

use vin_node::crypto::{
    self, commitment_hex, generate_encryption_keypair, hash_canonical, NodeSigningKey,
};
use vin_node::domain::{ActionRequest, AttestationInfo, Output, PaymentInfo};
use vin_node::infra::ReceiptEngine;

// ============================================================================
// Custom Strategies
// ============================================================================

/// Generate scalar JSON leaf values
fn arb_leaf() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-zA-Z0-9 _.:/-]{0,24}".prop_map(serde_json::Value::from),
    ]
}

/// Generate JSON objects up to two levels deep
fn arb_object() -> impl Strategy<Value = serde_json::Value> {
    let inner = prop::collection::btree_map("[a-z_]{1,8}", arb_leaf(), 0..5)
        .prop_map(|map| serde_json::to_value(map).unwrap());
    prop::collection::btree_map(
        "[a-z_]{1,8}",
        prop_oneof![arb_leaf(), inner],
        0..5,
    )
    .prop_map(|map| serde_json::to_value(map).unwrap())
}

// ============================================================================
// Canonicalization Properties
// ============================================================================

proptest! {
    #[test]
    fn canonicalization_is_deterministic(value in arb_object()) {
        let first = hash_canonical(&value).unwrap();
        let second = hash_canonical(&value).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn commitment_survives_serde_roundtrip(value in arb_object()) {
        // Round-tripping through a wire encoding must not change the
        // commitment, whatever the intermediate key order
        let wire = serde_json::to_string(&value).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&wire).unwrap();
        prop_assert_eq!(
            commitment_hex(&value).unwrap(),
            commitment_hex(&reparsed).unwrap()
        );
    }

    #[test]
    fn distinct_texts_have_distinct_hashes(a in ".{0,64}", b in ".{0,64}") {
        prop_assume!(a != b);
        prop_assert_ne!(crypto::hash_text(&a), crypto::hash_text(&b));
    }
}

// ============================================================================
// Envelope Crypto Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn seal_open_roundtrips(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
        let (secret, public) = generate_encryption_keypair();
        let envelope = crypto::seal(&plaintext, &public).unwrap();
        let opened = crypto::open(&envelope, &secret).unwrap();
        prop_assert_eq!(plaintext, opened);
    }

    #[test]
    fn open_with_wrong_key_always_fails(plaintext in prop::collection::vec(any::<u8>(), 1..128)) {
        let (_, public) = generate_encryption_keypair();
        let (wrong_secret, _) = generate_encryption_keypair();
        let envelope = crypto::seal(&plaintext, &public).unwrap();
        prop_assert!(crypto::open(&envelope, &wrong_secret).is_err());
    }
}

// ============================================================================
// Receipt Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn built_receipts_always_verify(inputs in arb_object(), text in ".{0,128}") {
        let engine = ReceiptEngine::default();
        let key = NodeSigningKey::generate();
        let request = ActionRequest {
            request_id: "req".to_string(),
            policy_id: "P2_CONFIDENTIAL_PROXY_V1".to_string(),
            action_type: "confidential_llm_call".to_string(),
            prompt: None,
            inputs,
            constraints: None,
            llm: None,
        };
        let output = Output::from_text(text);

        let receipt = engine
            .build(&request, &output, &key, AttestationInfo::none(), PaymentInfo::none())
            .unwrap();
        let outcome = engine.verify(&request, &output, &receipt);
        prop_assert!(outcome.valid, "reason: {:?}", outcome.reason);
    }

    #[test]
    fn receipts_bind_the_output(text in "[a-z]{1,64}") {
        let engine = ReceiptEngine::default();
        let key = NodeSigningKey::generate();
        let request = ActionRequest {
            request_id: "req".to_string(),
            policy_id: "p".to_string(),
            action_type: "a".to_string(),
            prompt: None,
            inputs: json!({"m": 1}),
            constraints: None,
            llm: None,
        };
        let output = Output::from_text(text.clone());
        let receipt = engine
            .build(&request, &output, &key, AttestationInfo::none(), PaymentInfo::none())
            .unwrap();

        let other = Output::from_text(format!("{text}!"));
        let fresh = ReceiptEngine::default();
        prop_assert!(!fresh.verify(&request, &other, &receipt).valid);
    }
}
