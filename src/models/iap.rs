use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{
    common::{SuccessResponse, Vendor},
    target::{ClientTarget, EntitlementTarget},
};

/// POST /iap/verify request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IapVerifyRequest {
    pub vendor: Vendor,
    #[validate(length(min = 1, max = 255))]
    pub product_id: String,
    /// Apple transaction id or Google purchase token
    #[validate(length(min = 1, max = 4096))]
    pub token: String,
    /// Listing binding, only meaningful for boost products
    #[validate(nested)]
    pub target: Option<ClientTarget>,
}

pub type IapVerifyResponse = SuccessResponse<IapVerifyData>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IapVerifyData {
    pub already_processed: bool,
    pub product_id: String,
    pub entitlement: EntitlementTarget,
}
