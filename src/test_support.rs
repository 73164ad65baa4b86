//! Fakes and fixtures shared by the unit tests.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, jwk::JwkSet, Algorithm, EncodingKey, Header};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use time::macros::datetime;

use crate::{
    clock::MockClock,
    config::{AppleConfig, CatalogConfig, CatalogEntry},
    error::{IapError, IapResult},
    models::{
        common::{CanonicalPurchaseState, PurchaseKind, Vendor},
        purchase::{PurchaseReceipt, StoredTarget, VerificationRequest, VerifiedPurchase},
    },
    ports::{
        BusinessService, PurchaseVerifier, ReceiptStore, SaveResult, SeatState,
        SubscriptionRepository, TopService,
    },
    services::{
        apple_jws::{AppleSignatureVerifier, JwksCache, StaticJwksSource},
        entitlement_applier::EntitlementApplier,
        notification_ingestor::NotificationIngestor,
        purchase_processor::PurchaseProcessor,
        receipt_store::InMemoryReceiptStore,
        target_resolver::EntitlementTargetResolver,
    },
};

pub const APPLE_JWS_KID: &str = "apple-test-key-1";
/// Public half of `tests/fixtures/apple_api_key.pem`
pub const APPLE_API_KEY_X: &str = "Ms39A0HeLda8S5VKqH7ZlBJQLMUFOIioIkycA77qmN0";
pub const APPLE_API_KEY_Y: &str = "ZHkn4MtlilyDDXK502IoDxwK2O3xx1ytPgDrzVaeo5w";

pub fn apple_config() -> AppleConfig {
    AppleConfig {
        issuer_id: "issuer-uuid".to_string(),
        key_id: "APIKEY1234".to_string(),
        private_key_pem: include_str!("../tests/fixtures/apple_api_key.pem").to_string(),
        bundle_id: Some("com.example.market".to_string()),
        jwks_url: "http://127.0.0.1:1/jwks".to_string(),
        production_url: "http://127.0.0.1:1".to_string(),
        sandbox_url: "http://127.0.0.1:1".to_string(),
    }
}

pub fn apple_jwks() -> JwkSet {
    serde_json::from_str(include_str!("../tests/fixtures/apple_jwks.json")).unwrap()
}

pub fn sign_apple_jws(claims: &serde_json::Value) -> String {
    sign_apple_jws_with_kid(claims, APPLE_JWS_KID)
}

pub fn sign_apple_jws_with_kid(claims: &serde_json::Value, kid: &str) -> String {
    let key = EncodingKey::from_ec_pem(include_bytes!("../tests/fixtures/apple_jws_key.pem"))
        .unwrap();
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &key).unwrap()
}

pub fn base64url(data: &str) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn catalog() -> CatalogConfig {
    CatalogConfig {
        products: HashMap::from([
            (
                "responses10".to_string(),
                CatalogEntry::Responses { quantity: 10 },
            ),
            (
                "premium.monthly".to_string(),
                CatalogEntry::Subscription {
                    plan: "premium".to_string(),
                    months: 1,
                },
            ),
            (
                "boost.week".to_string(),
                CatalogEntry::Top { duration_days: 7 },
            ),
            ("business.5".to_string(), CatalogEntry::Business { seats: 5 }),
        ]),
        top_listing_types: vec!["ad".to_string(), "service".to_string()],
    }
}

/// An active, unacknowledged one-time Google purchase keyed by `token`.
pub fn google_purchase(product_id: &str, token: &str) -> VerifiedPurchase {
    VerifiedPurchase {
        vendor: Vendor::Google,
        transaction_id: token.to_string(),
        original_transaction_id: token.to_string(),
        purchase_token: token.to_string(),
        product_id: product_id.to_string(),
        kind: PurchaseKind::OneTime,
        state: CanonicalPurchaseState::Purchased,
        acknowledged: false,
        expires_at: None,
        raw_payload: "{}".to_string(),
    }
}

/// Pub/Sub push body around a developer notification.
pub fn google_rtdn(notification: serde_json::Value) -> Vec<u8> {
    let data = base64::engine::general_purpose::STANDARD.encode(notification.to_string());
    serde_json::json!({
        "message": {"data": data, "messageId": "1"},
        "subscription": "projects/market/subscriptions/play-rtdn"
    })
    .to_string()
    .into_bytes()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeatCall {
    pub user_id: i64,
    pub seats: u32,
    pub provider_txn_id: String,
    pub state: SeatState,
}

#[derive(Default)]
struct Ledger {
    balances: HashMap<i64, u32>,
    months: HashMap<i64, u32>,
    expired: HashSet<i64>,
    tops: Vec<(String, i64, u32)>,
    seats: Vec<SeatCall>,
    fail_next: bool,
    applies: usize,
}

/// Records every entitlement command; one instance plays all three stores.
#[derive(Default)]
pub struct FakeEntitlements {
    ledger: Mutex<Ledger>,
}

impl FakeEntitlements {
    pub fn fail_next_apply(&self) {
        self.ledger.lock().unwrap().fail_next = true;
    }

    pub fn balance(&self, user_id: i64) -> u32 {
        self.ledger
            .lock()
            .unwrap()
            .balances
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn subscription_months(&self, user_id: i64) -> u32 {
        self.ledger
            .lock()
            .unwrap()
            .months
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_force_expired(&self, user_id: i64) -> bool {
        self.ledger.lock().unwrap().expired.contains(&user_id)
    }

    pub fn tops(&self) -> Vec<(String, i64, u32)> {
        self.ledger.lock().unwrap().tops.clone()
    }

    pub fn seat_calls(&self) -> Vec<SeatCall> {
        self.ledger.lock().unwrap().seats.clone()
    }

    pub fn apply_count(&self) -> usize {
        self.ledger.lock().unwrap().applies
    }

    fn grant(&self, mutate: impl FnOnce(&mut Ledger)) -> anyhow::Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        if std::mem::take(&mut ledger.fail_next) {
            anyhow::bail!("entitlement store unavailable");
        }
        mutate(&mut ledger);
        ledger.applies += 1;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for FakeEntitlements {
    async fn add_responses_balance(&self, user_id: i64, quantity: u32) -> anyhow::Result<()> {
        self.grant(|l| *l.balances.entry(user_id).or_default() += quantity)
    }

    async fn extend_subscription(
        &self,
        user_id: i64,
        _plan: &str,
        months: u32,
    ) -> anyhow::Result<()> {
        self.grant(|l| *l.months.entry(user_id).or_default() += months)
    }

    async fn force_expire_subscription(&self, user_id: i64) -> anyhow::Result<()> {
        self.ledger.lock().unwrap().expired.insert(user_id);
        Ok(())
    }
}

#[async_trait]
impl TopService for FakeEntitlements {
    async fn activate_top(
        &self,
        listing_type: &str,
        listing_id: i64,
        duration_days: u32,
    ) -> anyhow::Result<()> {
        self.grant(|l| {
            l.tops
                .push((listing_type.to_string(), listing_id, duration_days))
        })
    }
}

#[async_trait]
impl BusinessService for FakeEntitlements {
    async fn purchase_seats(
        &self,
        user_id: i64,
        seats: u32,
        _provider: Vendor,
        provider_txn_id: &str,
        state: SeatState,
    ) -> anyhow::Result<()> {
        let call = SeatCall {
            user_id,
            seats,
            provider_txn_id: provider_txn_id.to_string(),
            state,
        };
        match state {
            SeatState::Active => self.grant(|l| l.seats.push(call)),
            SeatState::Revoked => {
                self.ledger.lock().unwrap().seats.push(call);
                Ok(())
            }
        }
    }
}

/// Vendor verifier answering from a table of tokens.
#[derive(Default)]
pub struct FakeVerifier {
    purchases: Mutex<HashMap<String, VerifiedPurchase>>,
    verifies: AtomicUsize,
    acknowledged: Mutex<Vec<String>>,
    fail_acknowledge: AtomicBool,
}

impl FakeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn will_return(&self, token: &str, purchase: VerifiedPurchase) {
        self.purchases
            .lock()
            .unwrap()
            .insert(token.to_string(), purchase);
    }

    pub fn fail_acknowledge(&self) {
        self.fail_acknowledge.store(true, Ordering::SeqCst);
    }

    pub fn verify_count(&self) -> usize {
        self.verifies.load(Ordering::SeqCst)
    }

    pub fn acknowledge_attempts(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }
}

#[async_trait]
impl PurchaseVerifier for FakeVerifier {
    async fn verify(&self, request: &VerificationRequest) -> IapResult<VerifiedPurchase> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        self.purchases
            .lock()
            .unwrap()
            .get(&request.token)
            .cloned()
            .ok_or_else(|| IapError::VerificationFailed("unknown token".to_string()))
    }

    async fn acknowledge(&self, purchase: &VerifiedPurchase) -> IapResult<()> {
        self.acknowledged
            .lock()
            .unwrap()
            .push(purchase.purchase_token.clone());
        if self.fail_acknowledge.load(Ordering::SeqCst) {
            return Err(IapError::Internal(anyhow::anyhow!("acknowledge failed")));
        }
        Ok(())
    }
}

/// A store where another request always wins the insert race.
pub struct RacingReceiptStore {
    inner: InMemoryReceiptStore,
}

impl RacingReceiptStore {
    pub fn new(inner: InMemoryReceiptStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ReceiptStore for RacingReceiptStore {
    async fn get_owner_by_token(&self, vendor: Vendor, token: &str) -> IapResult<Option<i64>> {
        self.inner.get_owner_by_token(vendor, token).await
    }

    async fn is_processed(&self, _vendor: Vendor, _transaction_id: &str) -> IapResult<bool> {
        Ok(false)
    }

    async fn save(&self, receipt: &PurchaseReceipt) -> IapResult<SaveResult> {
        self.inner.save(receipt).await?;
        Ok(SaveResult::AlreadyExists)
    }

    async fn delete_by_token(&self, vendor: Vendor, transaction_id: &str) -> IapResult<()> {
        self.inner.delete_by_token(vendor, transaction_id).await
    }

    async fn find_by_original_transaction_id(
        &self,
        vendor: Vendor,
        original_transaction_id: &str,
    ) -> IapResult<Option<PurchaseReceipt>> {
        self.inner
            .find_by_original_transaction_id(vendor, original_transaction_id)
            .await
    }

    async fn find_target_by_token(
        &self,
        vendor: Vendor,
        token: &str,
    ) -> IapResult<Option<StoredTarget>> {
        self.inner.find_target_by_token(vendor, token).await
    }
}

/// Processor and ingestor wired to fakes, with a real Apple JWS verifier
/// over the fixture key set.
pub struct Harness {
    pub receipts: Arc<InMemoryReceiptStore>,
    pub entitlements: Arc<FakeEntitlements>,
    pub apple: Arc<FakeVerifier>,
    pub google: Arc<FakeVerifier>,
    pub processor: Arc<PurchaseProcessor>,
    pub ingestor: NotificationIngestor,
    pub clock: MockClock,
}

impl Harness {
    pub fn new() -> Self {
        let receipts = Arc::new(InMemoryReceiptStore::new());
        Self::build(receipts.clone(), receipts)
    }

    /// Wire the engine to `store`; `receipts` stays an unused empty ledger.
    pub fn with_store(store: Arc<dyn ReceiptStore>) -> Self {
        Self::build(Arc::new(InMemoryReceiptStore::new()), store)
    }

    fn build(receipts: Arc<InMemoryReceiptStore>, store: Arc<dyn ReceiptStore>) -> Self {
        let clock = MockClock::new(datetime!(2025-06-01 12:00 UTC));
        let entitlements = Arc::new(FakeEntitlements::default());
        let apple = Arc::new(FakeVerifier::new());
        let google = Arc::new(FakeVerifier::new());
        let resolver = Arc::new(EntitlementTargetResolver::new(catalog()));

        let applier = Arc::new(EntitlementApplier::new(
            entitlements.clone(),
            entitlements.clone(),
            entitlements.clone(),
        ));
        let processor = Arc::new(PurchaseProcessor::new(
            store.clone(),
            resolver.clone(),
            applier,
            apple.clone(),
            google.clone(),
            Arc::new(clock.clone()),
        ));

        let jwks = JwksCache::new(
            Arc::new(StaticJwksSource::new(apple_jwks())),
            Arc::new(clock.clone()),
        );
        let ingestor = NotificationIngestor::new(
            processor.clone(),
            store,
            resolver,
            Arc::new(AppleSignatureVerifier::new(Arc::new(jwks))),
            Some("com.example.market".to_string()),
            vec![3, 12, 13],
        );

        Self {
            receipts,
            entitlements,
            apple,
            google,
            processor,
            ingestor,
            clock,
        }
    }
}
