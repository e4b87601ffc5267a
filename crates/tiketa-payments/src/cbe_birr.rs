//! # CBE Birr Adapter
//!
//! Bank-transfer rail. Initiation asks the gateway for a payment URL and a
//! reference id; the asynchronous callback authenticates with the shared
//! API key (compared in constant time) plus the merchant id, there being no
//! payload signature on this rail.
//!
//! With no merchant id configured the adapter returns a mock payment URL,
//! keeping development and tests off the network.

use ring::constant_time::verify_slices_are_equal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    money_from_json, CallbackAuth, CallbackNotice, CallbackStatus, CheckoutRequest,
    CheckoutSession, PaymentError, PaymentGateway, ProviderKind,
};

const PROVIDER: &str = "cbe-birr";

/// CBE Birr merchant credentials and endpoint.
#[derive(Debug, Clone, Default)]
pub struct CbeBirrConfig {
    pub merchant_id: String,
    /// Shared secret; callbacks must present it verbatim.
    pub api_key: String,
    pub api_url: String,
}

/// The CBE Birr payment adapter.
#[derive(Debug, Clone)]
pub struct CbeBirrProvider {
    config: CbeBirrConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    status: String,
    payment_url: Option<String>,
    reference_id: Option<String>,
    message: Option<String>,
}

impl CbeBirrProvider {
    pub fn new(config: CbeBirrConfig) -> Self {
        CbeBirrProvider {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn is_configured(&self) -> bool {
        !self.config.merchant_id.is_empty() && !self.config.api_url.is_empty()
    }
}

impl PaymentGateway for CbeBirrProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CbeBirr
    }

    async fn initiate(&self, request: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        if !self.is_configured() {
            warn!("CBE Birr not configured, returning mock payment session");
            let reference = format!("CBE{}", chrono::Utc::now().timestamp_millis());
            return Ok(CheckoutSession {
                provider: ProviderKind::CbeBirr,
                checkout_url: Some(format!(
                    "https://mock-cbe.example.com/pay/{}",
                    request.order_id
                )),
                provider_ref: reference,
            });
        }

        debug!(order_id = %request.order_id, "Initiating CBE Birr payment");

        let response: InitiateResponse = self
            .client
            .post(format!("{}/payments/initiate", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "merchant_id": self.config.merchant_id,
                "order_id": request.order_id,
                "amount": request.amount.to_decimal_string(),
                "currency": "ETB",
                "description": request.description,
                "notify_url": request.notify_url,
                "return_url": request.return_url,
            }))
            .send()
            .await?
            .json()
            .await?;

        if response.status != "SUCCESS" {
            return Err(PaymentError::Provider {
                provider: PROVIDER,
                message: response
                    .message
                    .unwrap_or_else(|| "initiation rejected".to_string()),
            });
        }

        let reference_id = response.reference_id.ok_or(PaymentError::Malformed {
            provider: PROVIDER,
            reason: "success response without reference_id".to_string(),
        })?;

        Ok(CheckoutSession {
            provider: ProviderKind::CbeBirr,
            checkout_url: response.payment_url,
            provider_ref: reference_id,
        })
    }

    /// Authenticates the callback via the shared API key and merchant id,
    /// then extracts the result. Both checks fail closed.
    fn parse_callback(
        &self,
        raw_body: &[u8],
        auth: &CallbackAuth,
    ) -> Result<CallbackNotice, PaymentError> {
        if self.config.api_key.is_empty() {
            return Err(PaymentError::NotConfigured(PROVIDER));
        }

        let presented = auth.api_key.as_deref().ok_or_else(|| PaymentError::Untrusted {
            provider: PROVIDER,
            reason: "missing API key header".to_string(),
        })?;
        if verify_slices_are_equal(presented.as_bytes(), self.config.api_key.as_bytes()).is_err() {
            return Err(PaymentError::Untrusted {
                provider: PROVIDER,
                reason: "API key mismatch".to_string(),
            });
        }

        let payload: Value =
            serde_json::from_slice(raw_body).map_err(|e| PaymentError::Malformed {
                provider: PROVIDER,
                reason: e.to_string(),
            })?;

        let merchant_id = payload
            .get("merchantId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if merchant_id != self.config.merchant_id {
            return Err(PaymentError::Untrusted {
                provider: PROVIDER,
                reason: "merchant id mismatch".to_string(),
            });
        }

        let reference_id = payload
            .get("referenceId")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::Malformed {
                provider: PROVIDER,
                reason: "missing referenceId".to_string(),
            })?
            .to_string();

        let status = match payload.get("status").and_then(Value::as_str) {
            Some("SUCCESS") | Some("COMPLETED") => CallbackStatus::Success,
            Some("PENDING") => CallbackStatus::Pending,
            _ => CallbackStatus::Failed,
        };

        let external_tx_id = payload
            .get("transactionId")
            .and_then(Value::as_str)
            .unwrap_or(&reference_id)
            .to_string();

        let amount = payload.get("amount").and_then(money_from_json);

        debug!(reference_id = %reference_id, ?status, "CBE Birr callback verified");

        Ok(CallbackNotice {
            provider: ProviderKind::CbeBirr,
            provider_ref: reference_id,
            external_tx_id,
            status,
            amount,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tiketa_core::Money;

    fn provider() -> CbeBirrProvider {
        CbeBirrProvider::new(CbeBirrConfig {
            merchant_id: "MERCH-1".to_string(),
            api_key: "cbe-shared-key".to_string(),
            api_url: "https://cbe.example.et".to_string(),
        })
    }

    fn callback_body(status: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "merchantId": "MERCH-1",
            "referenceId": "CBE1700000000000",
            "amount": "2100.00",
            "status": status,
            "transactionId": "CBE-TX-42",
        }))
        .unwrap()
    }

    fn keyed_auth(key: &str) -> CallbackAuth {
        CallbackAuth {
            signature: None,
            api_key: Some(key.to_string()),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_initiate_returns_mock_session() {
        let provider = CbeBirrProvider::new(CbeBirrConfig::default());
        let session = provider
            .initiate(&CheckoutRequest {
                order_id: "o1".to_string(),
                payment_id: "pay-1".to_string(),
                amount: Money::from_birr(500),
                description: "Shop order".to_string(),
                buyer_phone: None,
                buyer_email: None,
                notify_url: "http://localhost/cb".to_string(),
                return_url: "http://localhost/done".to_string(),
            })
            .await
            .unwrap();

        assert!(session.provider_ref.starts_with("CBE"));
        assert!(session.checkout_url.unwrap().contains("mock-cbe"));
    }

    #[test]
    fn test_valid_key_parses() {
        let notice = provider()
            .parse_callback(&callback_body("SUCCESS"), &keyed_auth("cbe-shared-key"))
            .unwrap();

        assert_eq!(notice.provider_ref, "CBE1700000000000");
        assert_eq!(notice.external_tx_id, "CBE-TX-42");
        assert_eq!(notice.status, CallbackStatus::Success);
        assert_eq!(notice.amount, Some(Money::from_cents(210_000)));
    }

    #[test]
    fn test_completed_status_is_success() {
        let notice = provider()
            .parse_callback(&callback_body("COMPLETED"), &keyed_auth("cbe-shared-key"))
            .unwrap();
        assert_eq!(notice.status, CallbackStatus::Success);
    }

    #[test]
    fn test_missing_key_fails_closed() {
        let err = provider()
            .parse_callback(&callback_body("SUCCESS"), &CallbackAuth::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let err = provider()
            .parse_callback(&callback_body("SUCCESS"), &keyed_auth("wrong"))
            .unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }

    #[test]
    fn test_foreign_merchant_fails_closed() {
        let body = serde_json::to_vec(&serde_json::json!({
            "merchantId": "SOMEONE-ELSE",
            "referenceId": "CBE1",
            "status": "SUCCESS",
        }))
        .unwrap();
        let err = provider()
            .parse_callback(&body, &keyed_auth("cbe-shared-key"))
            .unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }

    #[test]
    fn test_failed_status_maps_to_failed() {
        let notice = provider()
            .parse_callback(&callback_body("FAILED"), &keyed_auth("cbe-shared-key"))
            .unwrap();
        assert_eq!(notice.status, CallbackStatus::Failed);
    }
}
