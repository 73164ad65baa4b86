use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use serde_json::Value;

use super::google::{
    DeveloperNotification, OneTimeProductNotification, PubSubPush, SubscriptionNotification,
    VoidedPurchaseNotification,
};
use crate::error::{IapError, IapResult};

/// Any webhook body the engine accepts, told apart by its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookNotification {
    /// App Store Server Notification V2; the JWS is still unverified.
    AppleNotification { signed_payload: String },
    GoogleSubscriptionRtdn(SubscriptionNotification),
    GoogleOneTimeRtdn(OneTimeProductNotification),
    GoogleVoidedPurchase(VoidedPurchaseNotification),
    /// Well-formed but irrelevant (test pings, unknown shapes).
    Unrecognized,
}

impl WebhookNotification {
    /// Probe the body for a known shape. Vendors never get a say in which
    /// branch is taken; only the presence of the expected fields does.
    ///
    /// Fails only when the body (or the Pub/Sub message inside it) is not
    /// parseable at all.
    pub fn decode(raw: &[u8]) -> IapResult<Self> {
        let body: Value = serde_json::from_slice(raw)
            .map_err(|e| IapError::InvalidPayload(format!("Webhook body is not JSON: {}", e)))?;

        if let Some(signed_payload) = body.get("signedPayload").and_then(Value::as_str) {
            return Ok(Self::AppleNotification {
                signed_payload: signed_payload.to_string(),
            });
        }

        let has_pubsub_data = body
            .get("message")
            .and_then(|message| message.get("data"))
            .is_some_and(Value::is_string);
        if !has_pubsub_data {
            return Ok(Self::Unrecognized);
        }

        let push: PubSubPush = serde_json::from_value(body)
            .map_err(|e| IapError::InvalidPayload(format!("Invalid Pub/Sub envelope: {}", e)))?;
        let data = decode_base64(&push.message.data)?;
        let notification: DeveloperNotification = serde_json::from_slice(&data).map_err(|e| {
            IapError::InvalidPayload(format!("Invalid developer notification: {}", e))
        })?;

        Ok(if let Some(sub) = notification.subscription_notification {
            Self::GoogleSubscriptionRtdn(sub)
        } else if let Some(one_time) = notification.one_time_product_notification {
            Self::GoogleOneTimeRtdn(one_time)
        } else if let Some(voided) = notification.voided_purchase_notification {
            Self::GoogleVoidedPurchase(voided)
        } else {
            Self::Unrecognized
        })
    }
}

fn decode_base64(data: &str) -> IapResult<Vec<u8>> {
    let data = data.trim();
    STANDARD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .map_err(|e| IapError::InvalidPayload(format!("Pub/Sub data is not base64: {}", e)))
}
