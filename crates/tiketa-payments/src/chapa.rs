//! # Chapa Adapter
//!
//! Hosted-checkout rail: one `POST /v1/transaction/initialize` returns a
//! checkout URL; the result arrives later as a webhook signed with
//! HMAC-SHA256 over the raw body (`x-chapa-signature` header).
//!
//! Chapa fronts Telebirr, CBE Birr and the banks behind a single API, so
//! this is the default rail. With no secret key configured the adapter
//! returns a mock checkout session, which keeps development and tests off
//! the network.

use ring::hmac;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    money_from_json, CallbackAuth, CallbackNotice, CallbackStatus, CheckoutRequest,
    CheckoutSession, PaymentError, PaymentGateway, ProviderKind,
};

const PROVIDER: &str = "chapa";

/// Chapa credentials and endpoints.
#[derive(Debug, Clone)]
pub struct ChapaConfig {
    /// Secret key (`CHAPA-...`). Empty means unconfigured: initiation mocks
    /// and callbacks are rejected.
    pub secret_key: String,
    pub api_url: String,
}

impl Default for ChapaConfig {
    fn default() -> Self {
        ChapaConfig {
            secret_key: String::new(),
            api_url: "https://api.chapa.co/v1".to_string(),
        }
    }
}

/// The Chapa payment adapter.
#[derive(Debug, Clone)]
pub struct ChapaProvider {
    config: ChapaConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    status: String,
    message: Option<Value>,
    data: Option<InitializeData>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    checkout_url: String,
}

impl ChapaProvider {
    pub fn new(config: ChapaConfig) -> Self {
        ChapaProvider {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn is_configured(&self) -> bool {
        !self.config.secret_key.is_empty()
    }

    /// Hex HMAC-SHA256 of `payload` under the secret key.
    fn signature_for(&self, payload: &[u8]) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, self.config.secret_key.as_bytes());
        hex::encode(hmac::sign(&key, payload).as_ref())
    }
}

impl PaymentGateway for ChapaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Chapa
    }

    async fn initiate(&self, request: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        // Our payment id doubles as Chapa's tx_ref.
        let tx_ref = request.payment_id.clone();

        if !self.is_configured() {
            warn!("Chapa not configured, returning mock checkout session");
            return Ok(CheckoutSession {
                provider: ProviderKind::Chapa,
                checkout_url: Some(format!("https://checkout.chapa.co/mock/{tx_ref}")),
                provider_ref: tx_ref,
            });
        }

        let payload = serde_json::json!({
            "amount": request.amount.to_decimal_string(),
            "currency": "ETB",
            "phone_number": request.buyer_phone.clone().unwrap_or_default(),
            "email": request.buyer_email,
            "tx_ref": tx_ref,
            "callback_url": request.notify_url,
            "return_url": request.return_url,
            "customization": {
                "title": "Tiketa Pay",
                "description": request.description,
            },
        });

        debug!(tx_ref = %tx_ref, "Initializing Chapa transaction");

        let response: InitializeResponse = self
            .client
            .post(format!("{}/transaction/initialize", self.config.api_url))
            .bearer_auth(&self.config.secret_key)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        if response.status != "success" {
            let message = response
                .message
                .map(|m| m.to_string())
                .unwrap_or_else(|| "initialization failed".to_string());
            return Err(PaymentError::Provider {
                provider: PROVIDER,
                message,
            });
        }

        let data = response.data.ok_or(PaymentError::Malformed {
            provider: PROVIDER,
            reason: "success response without data".to_string(),
        })?;

        Ok(CheckoutSession {
            provider: ProviderKind::Chapa,
            checkout_url: Some(data.checkout_url),
            provider_ref: tx_ref,
        })
    }

    /// Verifies the webhook signature over the RAW body, then extracts the
    /// result. An absent or wrong signature fails closed.
    fn parse_callback(
        &self,
        raw_body: &[u8],
        auth: &CallbackAuth,
    ) -> Result<CallbackNotice, PaymentError> {
        if !self.is_configured() {
            return Err(PaymentError::NotConfigured(PROVIDER));
        }

        let signature = auth.signature.as_deref().ok_or_else(|| PaymentError::Untrusted {
            provider: PROVIDER,
            reason: "missing x-chapa-signature header".to_string(),
        })?;

        let expected = self.signature_for(raw_body);
        let provided = hex::decode(signature.trim()).map_err(|_| PaymentError::Untrusted {
            provider: PROVIDER,
            reason: "signature is not valid hex".to_string(),
        })?;
        let expected_bytes = hex::decode(&expected).unwrap_or_default();

        if ring::constant_time::verify_slices_are_equal(&provided, &expected_bytes).is_err() {
            return Err(PaymentError::Untrusted {
                provider: PROVIDER,
                reason: "signature mismatch".to_string(),
            });
        }

        let payload: Value =
            serde_json::from_slice(raw_body).map_err(|e| PaymentError::Malformed {
                provider: PROVIDER,
                reason: e.to_string(),
            })?;

        let tx_ref = payload
            .get("tx_ref")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::Malformed {
                provider: PROVIDER,
                reason: "missing tx_ref".to_string(),
            })?
            .to_string();

        let status = match payload.get("status").and_then(Value::as_str) {
            Some("success") => CallbackStatus::Success,
            Some("pending") => CallbackStatus::Pending,
            _ => CallbackStatus::Failed,
        };

        let external_tx_id = payload
            .get("reference")
            .and_then(Value::as_str)
            .unwrap_or(&tx_ref)
            .to_string();

        let amount = payload.get("amount").and_then(money_from_json);

        debug!(tx_ref = %tx_ref, ?status, "Chapa webhook verified");

        Ok(CallbackNotice {
            provider: ProviderKind::Chapa,
            provider_ref: tx_ref,
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

    fn provider() -> ChapaProvider {
        ChapaProvider::new(ChapaConfig {
            secret_key: "CHASECK_TEST-abc123".to_string(),
            ..ChapaConfig::default()
        })
    }

    fn webhook_body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "event": "charge.success",
            "tx_ref": "pay-123",
            "status": "success",
            "amount": "2100.00",
            "currency": "ETB",
            "reference": "CHP-REF-9",
            "payment_method": "telebirr",
        }))
        .unwrap()
    }

    fn signed_auth(provider: &ChapaProvider, body: &[u8]) -> CallbackAuth {
        CallbackAuth {
            signature: Some(provider.signature_for(body)),
            api_key: None,
        }
    }

    #[tokio::test]
    async fn test_unconfigured_initiate_returns_mock_session() {
        let provider = ChapaProvider::new(ChapaConfig::default());
        let session = provider
            .initiate(&CheckoutRequest {
                order_id: "o1".to_string(),
                payment_id: "pay-1".to_string(),
                amount: Money::from_birr(100),
                description: "Tickets".to_string(),
                buyer_phone: None,
                buyer_email: None,
                notify_url: "http://localhost/cb".to_string(),
                return_url: "http://localhost/done".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.provider_ref, "pay-1");
        assert!(session.checkout_url.unwrap().contains("mock"));
    }

    #[test]
    fn test_valid_signature_parses() {
        let provider = provider();
        let body = webhook_body();
        let notice = provider
            .parse_callback(&body, &signed_auth(&provider, &body))
            .unwrap();

        assert_eq!(notice.provider_ref, "pay-123");
        assert_eq!(notice.external_tx_id, "CHP-REF-9");
        assert_eq!(notice.status, CallbackStatus::Success);
        assert_eq!(notice.amount, Some(Money::from_cents(210_000)));
    }

    #[test]
    fn test_missing_signature_fails_closed() {
        let provider = provider();
        let err = provider
            .parse_callback(&webhook_body(), &CallbackAuth::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }

    #[test]
    fn test_tampered_body_fails_closed() {
        let provider = provider();
        let body = webhook_body();
        let auth = signed_auth(&provider, &body);

        let mut tampered = webhook_body();
        let pos = tampered.windows(7).position(|w| w == b"2100.00").unwrap();
        tampered[pos] = b'9';

        let err = provider.parse_callback(&tampered, &auth).unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }

    #[test]
    fn test_failed_status_maps_to_failed() {
        let provider = provider();
        let body = serde_json::to_vec(&serde_json::json!({
            "tx_ref": "pay-123",
            "status": "failed",
        }))
        .unwrap();
        let notice = provider
            .parse_callback(&body, &signed_auth(&provider, &body))
            .unwrap();
        assert_eq!(notice.status, CallbackStatus::Failed);
        assert_eq!(notice.amount, None);
    }
}
