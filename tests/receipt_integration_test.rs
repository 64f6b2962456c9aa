//! Receipt engine integration tests: the full build/verify contract,
//! including cross-node verification through the wire encoding.

use serde_json::json;

use vin_node::crypto::{base64url_decode, commitment_hex, NodeSigningKey};
use vin_node::domain::{
    ActionRequest, AttestationInfo, Output, PaymentInfo, Receipt, ACTION_CONFIDENTIAL_LLM_CALL,
    POLICY_CONFIDENTIAL_PROXY,
};
use vin_node::infra::{ReceiptEngine, VerifyReason};

fn action_request(inputs: serde_json::Value) -> ActionRequest {
    ActionRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        policy_id: POLICY_CONFIDENTIAL_PROXY.to_string(),
        action_type: ACTION_CONFIDENTIAL_LLM_CALL.to_string(),
        prompt: None,
        inputs,
        constraints: None,
        llm: None,
    }
}

#[test]
fn receipt_survives_wire_roundtrip_and_verifies_on_another_engine() {
    let issuing_engine = ReceiptEngine::default();
    let verifying_engine = ReceiptEngine::default();
    let key = NodeSigningKey::generate();

    let request = action_request(json!({
        "provider_url": "https://api.anthropic.com/v1/messages",
        "model": "claude-3-haiku-20240307",
        "messages": [{"role": "user", "content": "hi"}]
    }));
    let output = Output::from_text("response text".to_string());

    let receipt = issuing_engine
        .build(
            &request,
            &output,
            &key,
            AttestationInfo::none(),
            PaymentInfo::none(),
        )
        .unwrap();

    // Serialize to the wire and back; a different engine (different replay
    // cache, different process in real life) must accept it
    let wire = serde_json::to_string(&receipt).unwrap();
    let parsed: Receipt = serde_json::from_str(&wire).unwrap();
    let outcome = verifying_engine.verify(&request, &output, &parsed);
    assert!(outcome.valid, "reason: {:?}", outcome.reason);
}

#[test]
fn every_single_byte_mutation_is_caught() {
    let engine = ReceiptEngine::default();
    let key = NodeSigningKey::generate();
    let request = action_request(json!({"model": "m", "messages": []}));
    let output = Output::from_text("out".to_string());

    let receipt = engine
        .build(
            &request,
            &output,
            &key,
            AttestationInfo::none(),
            PaymentInfo::none(),
        )
        .unwrap();

    struct Case {
        name: &'static str,
        reason: VerifyReason,
        mutate: fn(&mut ActionRequest, &mut Output, &mut Receipt),
    }

    let cases = [
        Case {
            name: "request inputs",
            reason: VerifyReason::InputsCommitmentMismatch,
            mutate: |request, _, _| request.inputs["model"] = json!("other"),
        },
        Case {
            name: "clean text",
            reason: VerifyReason::OutputCleanHashMismatch,
            mutate: |_, output, _| output.clean_text.push('x'),
        },
        Case {
            name: "transport text",
            reason: VerifyReason::OutputTransportHashMismatch,
            mutate: |_, output, _| output.text.push('x'),
        },
        Case {
            name: "signature",
            reason: VerifyReason::SignatureInvalid,
            mutate: |_, _, receipt| {
                let mut sig = base64url_decode(&receipt.sig).unwrap();
                sig[10] ^= 0x40;
                receipt.sig = vin_node::crypto::base64url_encode(&sig);
            },
        },
        Case {
            name: "payment sub-object",
            reason: VerifyReason::SignatureInvalid,
            mutate: |_, _, receipt| receipt.payment.kind = "x402".to_string(),
        },
        Case {
            name: "issue time",
            reason: VerifyReason::SignatureInvalid,
            mutate: |_, _, receipt| receipt.iat -= 1,
        },
    ];

    for case in cases {
        // Fresh engine per case so the replay cache never interferes
        let engine = ReceiptEngine::default();
        let mut request = request.clone();
        let mut output = output.clone();
        let mut receipt = receipt.clone();
        (case.mutate)(&mut request, &mut output, &mut receipt);

        let outcome = engine.verify(&request, &output, &receipt);
        assert!(!outcome.valid, "{} mutation accepted", case.name);
        assert_eq!(outcome.reason, Some(case.reason), "{}", case.name);
    }
}

#[test]
fn commitments_are_reproducible_by_third_parties() {
    // A verifier holding only the committed subset reproduces the
    // commitment without the api key
    let inputs = json!({
        "provider_url": "https://api.openai.com/v1/chat/completions",
        "model": "gpt-4o-mini",
        "messages": [{"role": "user", "content": "hello"}]
    });

    let engine = ReceiptEngine::default();
    let key = NodeSigningKey::generate();
    let receipt = engine
        .build(
            &action_request(inputs.clone()),
            &Output::from_text("t".to_string()),
            &key,
            AttestationInfo::none(),
            PaymentInfo::none(),
        )
        .unwrap();

    assert_eq!(receipt.inputs_commitment, commitment_hex(&inputs).unwrap());
    // Absent constraints and llm sections commit to the empty object
    assert_eq!(
        receipt.constraints_commitment,
        commitment_hex(&json!({})).unwrap()
    );
    assert_eq!(receipt.llm_commitment, commitment_hex(&json!({})).unwrap());
}

#[test]
fn replay_cache_capacity_is_configurable() {
    let engine = ReceiptEngine::new(std::time::Duration::from_secs(600), 2);
    let key = NodeSigningKey::generate();
    let output = Output::from_text("x".to_string());

    // Issue and verify three receipts; cache holds at most two
    for n in 0..3 {
        let request = action_request(json!({"n": n}));
        let receipt = engine
            .build(
                &request,
                &output,
                &key,
                AttestationInfo::none(),
                PaymentInfo::none(),
            )
            .unwrap();
        assert!(engine.verify(&request, &output, &receipt).valid);
    }
    assert!(engine.replay_entries() <= 2);
}

#[test]
fn attestation_and_payment_are_signed_into_the_receipt() {
    let engine = ReceiptEngine::default();
    let key = NodeSigningKey::generate();
    let request = action_request(json!({"model": "m"}));
    let output = Output::from_text("out".to_string());

    let attestation = AttestationInfo {
        kind: "sgx".to_string(),
        report_hash: Some("ab".repeat(32)),
        measurement: Some("cd".repeat(24)),
    };
    let payment = PaymentInfo {
        kind: "x402".to_string(),
        payment_ref: Some("payment-signature".to_string()),
        payment_commitment: Some("ef".repeat(32)),
    };

    let receipt = engine
        .build(&request, &output, &key, attestation, payment)
        .unwrap();
    assert!(engine.verify(&request, &output, &receipt).valid);

    // Stripping the payment evidence breaks the signature
    let mut stripped = receipt.clone();
    stripped.payment = PaymentInfo::none();
    let fresh_engine = ReceiptEngine::default();
    assert_eq!(
        fresh_engine.verify(&request, &output, &stripped).reason,
        Some(VerifyReason::SignatureInvalid)
    );
}
