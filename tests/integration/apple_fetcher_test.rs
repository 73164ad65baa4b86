use iapcore::{
    clock::SystemClock,
    models::{
        common::{CanonicalPurchaseState, PurchaseKind, Vendor},
        purchase::VerificationRequest,
    },
    ports::PurchaseVerifier,
    services::{
        apple_jws::{AppleApiTokenIssuer, AppleSignatureVerifier, JwksCache, StaticJwksSource},
        AppleTransactionFetcher,
    },
    IapError,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::{
    matchers::{header_regex, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::support::{apple_config, apple_jwks, sign_apple_jws, BUNDLE_ID};

const TRANSACTION_PATH: &str = "/inApps/v1/transactions/2000000111";

fn fetcher(production: &MockServer, sandbox: &MockServer) -> AppleTransactionFetcher {
    let config = apple_config(&production.uri(), &sandbox.uri());
    let clock = Arc::new(SystemClock);
    let jwks = JwksCache::new(Arc::new(StaticJwksSource::new(apple_jwks())), clock.clone());
    let tokens = AppleApiTokenIssuer::from_config(&config, clock).unwrap();

    AppleTransactionFetcher::new(
        &config,
        reqwest::Client::new(),
        Arc::new(tokens),
        Arc::new(AppleSignatureVerifier::new(Arc::new(jwks))),
    )
}

fn signed_transaction(transaction_id: &str, bundle_id: &str) -> serde_json::Value {
    json!({
        "signedTransactionInfo": sign_apple_jws(&json!({
            "transactionId": transaction_id,
            "originalTransactionId": "2000000100",
            "bundleId": bundle_id,
            "productId": "responses10",
            "type": "Consumable",
            "environment": "Sandbox"
        }))
    })
}

#[tokio::test]
async fn falls_back_to_sandbox_when_production_fails() {
    let production = MockServer::start().await;
    let sandbox = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(TRANSACTION_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errorCode": 4040010})))
        .expect(1)
        .mount(&production)
        .await;
    Mock::given(method("GET"))
        .and(path(TRANSACTION_PATH))
        .and(header_regex("authorization", "^Bearer .+"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(signed_transaction("2000000111", BUNDLE_ID)),
        )
        .expect(1)
        .mount(&sandbox)
        .await;

    let purchase = fetcher(&production, &sandbox)
        .verify(&VerificationRequest {
            product_id: Some("responses10".to_string()),
            token: "2000000111".to_string(),
            kind: PurchaseKind::OneTime,
        })
        .await
        .unwrap();

    assert_eq!(purchase.vendor, Vendor::Apple);
    assert_eq!(purchase.transaction_id, "2000000111");
    assert_eq!(purchase.original_transaction_id, "2000000100");
    assert_eq!(purchase.state, CanonicalPurchaseState::Purchased);
    assert!(purchase.raw_payload.split('.').count() == 3, "Raw payload is the signed JWS");
}

#[tokio::test]
async fn transaction_id_mismatch_is_rejected() {
    let production = MockServer::start().await;
    let sandbox = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(TRANSACTION_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(signed_transaction("2000000999", BUNDLE_ID)),
        )
        .mount(&production)
        .await;

    let err = fetcher(&production, &sandbox)
        .verify_transaction("2000000111")
        .await
        .unwrap_err();
    assert!(matches!(err, IapError::VerificationFailed(_)), "got {:?}", err);
}

#[tokio::test]
async fn foreign_bundle_is_rejected() {
    let production = MockServer::start().await;
    let sandbox = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(TRANSACTION_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(signed_transaction("2000000111", "com.other.app")),
        )
        .mount(&production)
        .await;

    let err = fetcher(&production, &sandbox)
        .verify_transaction("2000000111")
        .await
        .unwrap_err();
    assert!(matches!(err, IapError::VerificationFailed(_)), "got {:?}", err);
}

#[tokio::test]
async fn both_environments_failing_is_verification_failed() {
    let production = MockServer::start().await;
    let sandbox = MockServer::start().await;

    for server in [&production, &sandbox] {
        Mock::given(method("GET"))
            .and(path(TRANSACTION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(server)
            .await;
    }

    let err = fetcher(&production, &sandbox)
        .verify_transaction("2000000111")
        .await
        .unwrap_err();
    assert!(matches!(err, IapError::VerificationFailed(_)), "got {:?}", err);
}

#[tokio::test]
async fn malformed_transaction_id_never_reaches_apple() {
    let production = MockServer::start().await;
    let sandbox = MockServer::start().await;

    let err = fetcher(&production, &sandbox)
        .verify_transaction("../admin")
        .await
        .unwrap_err();
    assert!(matches!(err, IapError::VerificationFailed(_)));
    assert!(production.received_requests().await.unwrap().is_empty());
}
