use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Extension, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use iapcore::{
    clock::SystemClock,
    config::{Config, DatabaseConfig, HttpConfig},
    middleware::UserIdentity,
    routes::create_router,
    services::{
        apple_jws::{AppleSignatureVerifier, JwksCache, StaticJwksSource},
        EntitlementApplier, EntitlementTargetResolver, InMemoryReceiptStore, NotificationIngestor,
        PurchaseProcessor,
    },
    AppState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::support::{
    apple_config, apple_jwks, catalog, google_config, RecordingEntitlements, StubVerifier,
};

struct TestApp {
    router: Router,
    entitlements: Arc<RecordingEntitlements>,
}

fn app() -> TestApp {
    let config = Config {
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
        },
        apple: apple_config("http://127.0.0.1:9", "http://127.0.0.1:9"),
        google: google_config("http://127.0.0.1:9"),
        catalog: catalog(),
        http: HttpConfig::default(),
    };

    let clock = Arc::new(SystemClock);
    let receipts = Arc::new(InMemoryReceiptStore::new());
    let entitlements = Arc::new(RecordingEntitlements::default());
    let resolver = Arc::new(EntitlementTargetResolver::new(config.catalog.clone()));
    let applier = Arc::new(EntitlementApplier::new(
        entitlements.clone(),
        entitlements.clone(),
        entitlements.clone(),
    ));
    let google = Arc::new(StubVerifier::google(&[
        ("tok-1", "responses10"),
        ("tok-boost", "boost.week"),
    ]));
    let apple = Arc::new(StubVerifier {
        vendor: iapcore::models::common::Vendor::Apple,
        products: Default::default(),
    });

    let processor = Arc::new(PurchaseProcessor::new(
        receipts.clone(),
        resolver.clone(),
        applier,
        apple,
        google,
        clock.clone(),
    ));
    let jwks = JwksCache::new(Arc::new(StaticJwksSource::new(apple_jwks())), clock);
    let ingestor = Arc::new(NotificationIngestor::new(
        processor.clone(),
        receipts,
        resolver,
        Arc::new(AppleSignatureVerifier::new(Arc::new(jwks))),
        config.apple.bundle_id.clone(),
        config.google.revoke_notification_types.clone(),
    ));

    let state = AppState::from_parts(processor, ingestor, config);
    TestApp {
        router: create_router(state),
        entitlements,
    }
}

fn authenticated(router: Router, user_id: i64) -> Router {
    router.layer(Extension(UserIdentity { user_id }))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn verify_grants_once_and_reports_retries() {
    let app = app();
    let router = authenticated(app.router, 7);
    let request = || {
        post_json(
            "/iap/verify",
            json!({"vendor": "google", "productId": "responses10", "token": "tok-1"}),
        )
    };

    let (status, body) = send(router.clone(), request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["alreadyProcessed"], false);
    assert_eq!(body["data"]["entitlement"]["kind"], "responses");
    assert_eq!(body["data"]["entitlement"]["quantity"], 10);

    let (status, body) = send(router, request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alreadyProcessed"], true);
    assert_eq!(app.entitlements.balance(7), 10);
}

#[tokio::test]
async fn token_replay_from_another_account_is_409() {
    let app = app();
    let body = json!({"vendor": "google", "productId": "responses10", "token": "tok-1"});

    let (status, _) = send(
        authenticated(app.router.clone(), 7),
        post_json("/iap/verify", body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(authenticated(app.router, 8), post_json("/iap/verify", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert_eq!(app.entitlements.balance(8), 0);
}

#[tokio::test]
async fn bad_boost_target_is_400() {
    let app = app();
    let (status, body) = send(
        authenticated(app.router, 7),
        post_json(
            "/iap/verify",
            json!({
                "vendor": "google",
                "productId": "boost.week",
                "token": "tok-boost",
                "target": {"listing_type": "banana", "id": 42, "duration_days": 7}
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn verify_without_identity_is_401() {
    let app = app();
    let (status, _) = send(
        app.router,
        post_json(
            "/iap/verify",
            json!({"vendor": "google", "productId": "responses10", "token": "tok-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_acknowledges_pings_and_rejects_garbage() {
    let app = app();

    let ping = json!({
        "message": {
            "data": STANDARD.encode(json!({"version": "1.0", "testNotification": {"version": "1.0"}}).to_string()),
            "messageId": "42"
        },
        "subscription": "projects/market/subscriptions/play-rtdn"
    });
    let (status, body) = send(app.router.clone(), post_json("/webhooks/google", ping)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "ignored");

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/apple")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
