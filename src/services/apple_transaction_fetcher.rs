use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::apple_jws::{AppleApiTokenIssuer, AppleSignatureVerifier};
use crate::{
    config::AppleConfig,
    error::{IapError, IapResult},
    models::{
        apple::{AppleTransaction, TransactionInfoResponse, VerifiedTransaction},
        purchase::{VerificationRequest, VerifiedPurchase},
    },
    ports::PurchaseVerifier,
};

/// App Store Server API client for single transactions.
pub struct AppleTransactionFetcher {
    http_client: reqwest::Client,
    tokens: Arc<AppleApiTokenIssuer>,
    signatures: Arc<AppleSignatureVerifier>,
    production_url: String,
    sandbox_url: String,
    bundle_id: Option<String>,
}

impl AppleTransactionFetcher {
    pub fn new(
        config: &AppleConfig,
        http_client: reqwest::Client,
        tokens: Arc<AppleApiTokenIssuer>,
        signatures: Arc<AppleSignatureVerifier>,
    ) -> Self {
        Self {
            http_client,
            tokens,
            signatures,
            production_url: config.production_url.trim_end_matches('/').to_string(),
            sandbox_url: config.sandbox_url.trim_end_matches('/').to_string(),
            bundle_id: config.bundle_id.clone(),
        }
    }

    /// Fetch and verify a transaction. The environment is not known upfront,
    /// so production is tried first and sandbox on any production failure.
    #[instrument(skip(self))]
    pub async fn verify_transaction(&self, transaction_id: &str) -> IapResult<VerifiedTransaction> {
        if transaction_id.is_empty()
            || !transaction_id.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(IapError::VerificationFailed(format!(
                "Malformed Apple transaction id: {:?}",
                transaction_id
            )));
        }

        let verified = match self.fetch_from(&self.production_url, transaction_id).await {
            Ok(verified) => verified,
            Err(production_err) => {
                warn!(
                    transaction_id = %transaction_id,
                    error = %production_err,
                    "Production lookup failed, trying sandbox"
                );
                self.fetch_from(&self.sandbox_url, transaction_id)
                    .await
                    .map_err(|sandbox_err| {
                        IapError::VerificationFailed(format!(
                            "Transaction {} not verifiable (production: {}; sandbox: {})",
                            transaction_id, production_err, sandbox_err
                        ))
                    })?
            }
        };

        self.check_identity(transaction_id, &verified.transaction)?;

        info!(
            transaction_id = %verified.transaction.transaction_id,
            original_transaction_id = %verified.transaction.original_transaction_id,
            product_id = %verified.transaction.product_id,
            environment = ?verified.transaction.environment,
            "Verified Apple transaction"
        );

        Ok(verified)
    }

    async fn fetch_from(&self, base_url: &str, transaction_id: &str) -> IapResult<VerifiedTransaction> {
        let token = self.tokens.issue()?;
        let url = format!("{}/inApps/v1/transactions/{}", base_url, transaction_id);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IapError::VerificationFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IapError::VerificationFailed(format!(
                "App Store returned {}: {}",
                status, body
            )));
        }

        let info: TransactionInfoResponse = response
            .json()
            .await
            .map_err(|e| IapError::VerificationFailed(format!("Invalid response format: {}", e)))?;

        if info.signed_transaction_info.is_empty() {
            return Err(IapError::VerificationFailed(
                "Empty signedTransactionInfo".to_string(),
            ));
        }

        let transaction: AppleTransaction = self
            .signatures
            .verify_jws(&info.signed_transaction_info)
            .await?;

        Ok(VerifiedTransaction {
            transaction,
            signed_transaction_info: info.signed_transaction_info,
        })
    }

    fn check_identity(&self, requested_id: &str, transaction: &AppleTransaction) -> IapResult<()> {
        if transaction.transaction_id != requested_id {
            return Err(IapError::VerificationFailed(format!(
                "Transaction id mismatch: requested {}, got {}",
                requested_id, transaction.transaction_id
            )));
        }

        if let Some(expected) = &self.bundle_id {
            if transaction.bundle_id.as_deref() != Some(expected.as_str()) {
                return Err(IapError::VerificationFailed(format!(
                    "Bundle id mismatch: expected {}, got {:?}",
                    expected, transaction.bundle_id
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl PurchaseVerifier for AppleTransactionFetcher {
    async fn verify(&self, request: &VerificationRequest) -> IapResult<VerifiedPurchase> {
        let verified = self.verify_transaction(&request.token).await?;
        Ok(verified
            .transaction
            .into_verified(verified.signed_transaction_info))
    }

    async fn acknowledge(&self, _purchase: &VerifiedPurchase) -> IapResult<()> {
        // Apple finishes transactions on device
        Ok(())
    }
}
