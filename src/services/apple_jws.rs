use async_trait::async_trait;
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, jwk::JwkSet, Algorithm, DecodingKey,
    EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::Clock,
    config::AppleConfig,
    error::{IapError, IapResult},
};

const JWKS_TTL: Duration = Duration::minutes(30);
/// Refetch once less than this much validity is left.
const JWKS_REFRESH_MARGIN: Duration = Duration::minutes(5);
/// An unknown kid forces a refetch at most this often.
const JWKS_MIN_FORCED_REFRESH: Duration = Duration::minutes(1);

const API_TOKEN_AUDIENCE: &str = "appstoreconnect-v1";
const API_TOKEN_LIFETIME: Duration = Duration::minutes(10);

/// Where the Apple signing keys come from.
#[async_trait]
pub trait JwksSource: Send + Sync {
    async fn fetch(&self) -> IapResult<JwkSet>;
}

pub struct HttpJwksSource {
    http_client: reqwest::Client,
    url: String,
}

impl HttpJwksSource {
    pub fn new(http_client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http_client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self) -> IapResult<JwkSet> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| IapError::Internal(anyhow::anyhow!("JWKS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IapError::Internal(anyhow::anyhow!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| IapError::Internal(anyhow::anyhow!("Invalid JWKS document: {}", e)))
    }
}

/// An in-process key set. Counts fetches so callers can observe cache
/// behavior, and can be swapped to simulate a key rotation.
pub struct StaticJwksSource {
    keys: std::sync::Mutex<JwkSet>,
    fetches: std::sync::atomic::AtomicUsize,
}

impl StaticJwksSource {
    pub fn new(keys: JwkSet) -> Self {
        Self {
            keys: std::sync::Mutex::new(keys),
            fetches: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn rotate(&self, keys: JwkSet) {
        *self.keys.lock().unwrap_or_else(|e| e.into_inner()) = keys;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl JwksSource for StaticJwksSource {
    async fn fetch(&self) -> IapResult<JwkSet> {
        self.fetches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.keys.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: OffsetDateTime,
}

/// Apple JWKS with a fixed freshness window.
///
/// Check-then-fetch: the lock is not held across the network call, so two
/// callers that both see a stale set may both refetch. The later write wins.
pub struct JwksCache {
    source: Arc<dyn JwksSource>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<CachedJwks>>,
}

impl JwksCache {
    pub fn new(source: Arc<dyn JwksSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            cached: Mutex::new(None),
        }
    }

    /// Decoding key for `kid`, fetching the key set when it is missing or
    /// close to expiry. A kid the cached set does not know triggers one
    /// early refetch, so rotated keys are picked up without waiting out the
    /// freshness window.
    pub async fn decoding_key(&self, kid: &str) -> IapResult<DecodingKey> {
        let mut keys = self.key_set().await?;
        if keys.find(kid).is_none() {
            if let Some(refreshed) = self.refetch_for_unknown_kid(kid).await? {
                keys = refreshed;
            }
        }
        let jwk = keys
            .find(kid)
            .ok_or_else(|| IapError::SignatureInvalid(format!("Unknown signing key: {}", kid)))?;

        DecodingKey::from_jwk(jwk)
            .map_err(|e| IapError::SignatureInvalid(format!("Unusable signing key {}: {}", kid, e)))
    }

    /// Returns `None` when the cached set is too recent to refetch.
    async fn refetch_for_unknown_kid(&self, kid: &str) -> IapResult<Option<JwkSet>> {
        let now = self.clock.now_utc();
        {
            let cached = self.cached.lock().await;
            if let Some(entry) = cached.as_ref() {
                if now - entry.fetched_at < JWKS_MIN_FORCED_REFRESH {
                    return Ok(None);
                }
            }
        }

        info!(kid = %kid, "Unknown JWS kid, refetching Apple JWKS");
        let keys = self.source.fetch().await?;
        let mut cached = self.cached.lock().await;
        *cached = Some(CachedJwks {
            keys: keys.clone(),
            fetched_at: now,
        });
        Ok(Some(keys))
    }

    async fn key_set(&self) -> IapResult<JwkSet> {
        let now = self.clock.now_utc();

        {
            let cached = self.cached.lock().await;
            if let Some(entry) = cached.as_ref() {
                if now - entry.fetched_at < JWKS_TTL - JWKS_REFRESH_MARGIN {
                    return Ok(entry.keys.clone());
                }
            }
        }

        debug!("Fetching Apple JWKS");
        match self.source.fetch().await {
            Ok(keys) => {
                let mut cached = self.cached.lock().await;
                *cached = Some(CachedJwks {
                    keys: keys.clone(),
                    fetched_at: now,
                });
                Ok(keys)
            }
            Err(e) => {
                // Still inside the hard TTL: keep verifying with what we have
                let cached = self.cached.lock().await;
                match cached.as_ref() {
                    Some(entry) if now - entry.fetched_at < JWKS_TTL => {
                        warn!(error = %e, "JWKS refresh failed, serving cached key set");
                        Ok(entry.keys.clone())
                    }
                    _ => Err(e),
                }
            }
        }
    }
}

/// Verifies Apple-signed compact JWS documents against the JWKS.
pub struct AppleSignatureVerifier {
    jwks: Arc<JwksCache>,
}

impl AppleSignatureVerifier {
    pub fn new(jwks: Arc<JwksCache>) -> Self {
        Self { jwks }
    }

    /// Verify `jws` and decode its payload into `T`.
    ///
    /// Signature, algorithm and key problems are `SignatureInvalid`; a valid
    /// signature over a payload that is not a `T` is `InvalidPayload`.
    #[instrument(skip(self, jws))]
    pub async fn verify_jws<T: DeserializeOwned>(&self, jws: &str) -> IapResult<T> {
        let header = decode_header(jws)
            .map_err(|e| IapError::SignatureInvalid(format!("Malformed JWS header: {}", e)))?;

        if header.alg != Algorithm::ES256 {
            return Err(IapError::SignatureInvalid(format!(
                "Unsupported JWS algorithm: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| IapError::SignatureInvalid("JWS header has no kid".to_string()))?;
        let key = self.jwks.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::ES256);
        // Apple payloads are not access tokens: no exp, no aud
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<T>(jws, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::Json(_) => {
                    IapError::InvalidPayload(format!("Unexpected JWS payload: {}", e))
                }
                _ => IapError::SignatureInvalid(e.to_string()),
            })
    }
}

#[derive(Debug, Serialize)]
struct ApiTokenClaims<'a> {
    iss: &'a str,
    iat: i64,
    exp: i64,
    aud: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bid: Option<&'a str>,
}

/// Issues short-lived App Store Server API bearer tokens.
pub struct AppleApiTokenIssuer {
    issuer_id: String,
    key_id: String,
    bundle_id: Option<String>,
    encoding_key: EncodingKey,
    clock: Arc<dyn Clock>,
}

impl AppleApiTokenIssuer {
    pub fn from_config(config: &AppleConfig, clock: Arc<dyn Clock>) -> IapResult<Self> {
        // PEMs passed through env vars usually arrive with escaped newlines
        let pem = config.private_key_pem.replace("\\n", "\n");
        let encoding_key = EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| IapError::Config(format!("Invalid Apple API private key: {}", e)))?;

        Ok(Self {
            issuer_id: config.issuer_id.clone(),
            key_id: config.key_id.clone(),
            bundle_id: config.bundle_id.clone(),
            encoding_key,
            clock,
        })
    }

    /// Fresh ES256 token, valid for ten minutes. Never cached.
    pub fn issue(&self) -> IapResult<String> {
        let iat = self.clock.now_utc();
        let claims = ApiTokenClaims {
            iss: &self.issuer_id,
            iat: iat.unix_timestamp(),
            exp: (iat + API_TOKEN_LIFETIME).unix_timestamp(),
            aud: API_TOKEN_AUDIENCE,
            bid: self.bundle_id.as_deref(),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| IapError::Internal(anyhow::anyhow!("Failed to sign API token: {}", e)))
    }
}
