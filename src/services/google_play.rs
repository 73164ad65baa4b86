use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::Duration;
use tracing::{debug, info, instrument};

use crate::{
    clock::Clock,
    config::GoogleConfig,
    error::{IapError, IapResult},
    models::{
        common::PurchaseKind,
        google::{GooglePurchaseState, ProductPurchase, SubscriptionPurchaseV2},
        purchase::{VerificationRequest, VerifiedPurchase},
    },
    ports::PurchaseVerifier,
};

const ANDROID_PUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::hours(1);

/// The fields of a service-account JSON key the verifier needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &str) -> IapResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IapError::Config(format!("Cannot read service account key {}: {}", path, e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| IapError::Config(format!("Invalid service account key {}: {}", path, e)))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// Android Publisher API client for one-time products and v2 subscriptions.
pub struct GoogleReceiptVerifier {
    http_client: reqwest::Client,
    package_name: String,
    api_base_url: String,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    clock: Arc<dyn Clock>,
}

impl GoogleReceiptVerifier {
    pub fn new(
        config: &GoogleConfig,
        key: ServiceAccountKey,
        http_client: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> IapResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| IapError::Config(format!("Invalid service account private key: {}", e)))?;

        Ok(Self {
            http_client,
            package_name: config.package_name.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            key,
            encoding_key,
            clock,
        })
    }

    /// Exchange a signed JWT-bearer assertion for an access token.
    async fn access_token(&self) -> IapResult<String> {
        let now = self.clock.now_utc();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: ANDROID_PUBLISHER_SCOPE,
            aud: &self.key.token_uri,
            iat: now.unix_timestamp(),
            exp: (now + ASSERTION_LIFETIME).unix_timestamp(),
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| IapError::Internal(anyhow::anyhow!("Failed to sign assertion: {}", e)))?;

        let response = self
            .http_client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| IapError::VerificationFailed(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IapError::VerificationFailed(format!(
                "Token endpoint returned {}",
                response.status()
            )));
        }

        let token: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| IapError::VerificationFailed(format!("Invalid token response: {}", e)))?;
        Ok(token.access_token)
    }

    fn purchases_url(&self) -> String {
        format!(
            "{}/androidpublisher/v3/applications/{}/purchases",
            self.api_base_url, self.package_name
        )
    }

    /// GET `url` and return the body verbatim; it is stored as the raw payload.
    async fn get_raw(&self, url: &str) -> IapResult<String> {
        let access_token = self.access_token().await?;
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| IapError::VerificationFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IapError::VerificationFailed(format!("Unreadable response: {}", e)))?;

        if !status.is_success() {
            return Err(IapError::VerificationFailed(format!(
                "Google Play returned {}: {}",
                status, body
            )));
        }
        Ok(body)
    }

    async fn post_empty(&self, url: &str) -> IapResult<()> {
        let access_token = self.access_token().await?;
        let response = self
            .http_client
            .post(url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| IapError::Internal(anyhow::anyhow!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IapError::Internal(anyhow::anyhow!(
                "Google Play returned {} for {}",
                response.status(),
                url
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, token))]
    pub async fn verify_product(
        &self,
        product_id: &str,
        token: &str,
    ) -> IapResult<(GooglePurchaseState, String)> {
        check_identifier("product id", product_id)?;
        check_identifier("purchase token", token)?;

        let url = format!("{}/products/{}/tokens/{}", self.purchases_url(), product_id, token);
        let raw = self.get_raw(&url).await?;
        let purchase: ProductPurchase = serde_json::from_str(&raw)
            .map_err(|e| IapError::VerificationFailed(format!("Invalid response format: {}", e)))?;

        let state = GooglePurchaseState::from_product(&purchase, product_id, token);
        debug!(product_id = %state.product_id, status = %state.status, "Google product state");
        Ok((state, raw))
    }

    /// `product_id` may be unknown on the webhook path; Google then supplies it.
    #[instrument(skip(self, token))]
    pub async fn verify_subscription(
        &self,
        product_id: Option<&str>,
        token: &str,
    ) -> IapResult<(GooglePurchaseState, String)> {
        check_identifier("purchase token", token)?;

        let url = format!("{}/subscriptionsv2/tokens/{}", self.purchases_url(), token);
        let raw = self.get_raw(&url).await?;
        let subscription: SubscriptionPurchaseV2 = serde_json::from_str(&raw)
            .map_err(|e| IapError::VerificationFailed(format!("Invalid response format: {}", e)))?;

        let state = GooglePurchaseState::from_subscription(
            &subscription,
            product_id,
            token,
            self.clock.now_utc(),
        );
        debug!(
            product_id = %state.product_id,
            status = %state.status,
            active = state.is_active(),
            "Google subscription state"
        );
        Ok((state, raw))
    }

    pub async fn acknowledge_subscription(&self, product_id: &str, token: &str) -> IapResult<()> {
        let url = format!(
            "{}/subscriptions/{}/tokens/{}:acknowledge",
            self.purchases_url(),
            product_id,
            token
        );
        self.post_empty(&url).await
    }

    pub async fn consume_product(&self, product_id: &str, token: &str) -> IapResult<()> {
        let url = format!(
            "{}/products/{}/tokens/{}:consume",
            self.purchases_url(),
            product_id,
            token
        );
        self.post_empty(&url).await
    }
}

/// Tokens and SKUs end up in URL paths.
fn check_identifier(what: &str, value: &str) -> IapResult<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(IapError::VerificationFailed(format!("Malformed {}", what)))
    }
}

#[async_trait]
impl PurchaseVerifier for GoogleReceiptVerifier {
    async fn verify(&self, request: &VerificationRequest) -> IapResult<VerifiedPurchase> {
        let (state, raw) = match request.kind {
            PurchaseKind::Subscription => {
                self.verify_subscription(request.product_id.as_deref(), &request.token)
                    .await?
            }
            PurchaseKind::OneTime => {
                let product_id = request.product_id.as_deref().ok_or_else(|| {
                    IapError::VerificationFailed(
                        "Product id is required for one-time purchases".to_string(),
                    )
                })?;
                self.verify_product(product_id, &request.token).await?
            }
        };
        Ok(state.into_verified(raw))
    }

    async fn acknowledge(&self, purchase: &VerifiedPurchase) -> IapResult<()> {
        if purchase.acknowledged {
            debug!(product_id = %purchase.product_id, "Already acknowledged");
            return Ok(());
        }

        match purchase.kind {
            PurchaseKind::Subscription => {
                self.acknowledge_subscription(&purchase.product_id, &purchase.purchase_token)
                    .await?
            }
            PurchaseKind::OneTime => {
                self.consume_product(&purchase.product_id, &purchase.purchase_token)
                    .await?
            }
        }

        info!(
            product_id = %purchase.product_id,
            kind = ?purchase.kind,
            "Acknowledged Google purchase"
        );
        Ok(())
    }
}
