use async_trait::async_trait;

use crate::{
    error::IapResult,
    models::purchase::{VerificationRequest, VerifiedPurchase},
};

/// A vendor that can vouch for a purchase.
#[async_trait]
pub trait PurchaseVerifier: Send + Sync {
    async fn verify(&self, request: &VerificationRequest) -> IapResult<VerifiedPurchase>;

    /// Tell the vendor the purchase was delivered. Must only be called once
    /// the entitlement is durably applied.
    async fn acknowledge(&self, purchase: &VerifiedPurchase) -> IapResult<()>;
}
