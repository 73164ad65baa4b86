use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub apple: AppleConfig,
    pub google: GoogleConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppleConfig {
    /// App Store Connect issuer id (`iss` of API tokens)
    pub issuer_id: String,
    /// Key id placed in the API token `kid` header
    pub key_id: String,
    /// PKCS#8 PEM of the App Store Connect API key (ES256)
    pub private_key_pem: String,
    /// When set, transactions and notifications for other bundles are rejected
    #[serde(default)]
    pub bundle_id: Option<String>,
    #[serde(default = "default_apple_jwks_url")]
    pub jwks_url: String,
    #[serde(default = "default_apple_production_url")]
    pub production_url: String,
    #[serde(default = "default_apple_sandbox_url")]
    pub sandbox_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub package_name: String,
    pub service_account_key_path: String,
    #[serde(default = "default_google_api_base_url")]
    pub api_base_url: String,
    /// RTDN subscription notification types handled as revocations.
    #[serde(default = "default_google_revoke_notification_types")]
    pub revoke_notification_types: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Vendor product id -> entitlement granted by that product
    pub products: HashMap<String, CatalogEntry>,
    /// Listing types a boost may be bound to
    pub top_listing_types: Vec<String>,
}

/// Operator-configured catalog entry. Boost entries carry no listing: the
/// listing is bound per purchase by the client and validated at resolve time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogEntry {
    Responses { quantity: u32 },
    Subscription { plan: String, months: u32 },
    Top { duration_days: u32 },
    Business { seats: u32 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-call timeout for vendor APIs and the mounted router
    pub request_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

fn default_apple_jwks_url() -> String {
    "https://api.storekit.itunes.apple.com/inApps/v1/jwks".to_string()
}

fn default_apple_production_url() -> String {
    "https://api.storekit.itunes.apple.com".to_string()
}

fn default_apple_sandbox_url() -> String {
    "https://api.storekit-sandbox.itunes.apple.com".to_string()
}

fn default_google_api_base_url() -> String {
    "https://androidpublisher.googleapis.com".to_string()
}

fn default_google_revoke_notification_types() -> Vec<i32> {
    // SUBSCRIPTION_CANCELED, SUBSCRIPTION_REVOKED, SUBSCRIPTION_EXPIRED
    vec![3, 12, 13]
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(
                config::Environment::with_prefix("IAPCORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
