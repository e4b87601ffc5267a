//! # Telebirr Adapter
//!
//! Mobile-money WebCheckout rail.
//!
//! ## Checkout flow
//! ```text
//! 1. apply fabric token        POST /payment/v1/token   (X-APP-Key)
//! 2. create preorder           POST /payment/v1/merchant/preOrder
//!    signed request, trade_type "Checkout"
//! 3. build raw request         appid/merch_code/nonce/prepay_id/timestamp
//!    + signature, URL-encoded
//! 4. redirect buyer            web_checkout_url + raw request
//! 5. asynchronous notify       verified here, reconciled upstream
//! ```
//!
//! ## Signature scheme (both directions)
//! RSA-PSS with SHA-256 (the portal calls it `SHA256withRSAandMGF1`) over a
//! canonicalized string: drop `sign`/`sign_type`, flatten `biz_content`
//! into the top level, sort keys alphabetically, join as `key=value` pairs
//! with `&`. Notifications are verified against Telebirr's public key; no
//! configured key or no signature means the callback is rejected outright.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    money_from_json, CallbackAuth, CallbackNotice, CallbackStatus, CheckoutRequest,
    CheckoutSession, PaymentError, PaymentGateway, ProviderKind,
};

const PROVIDER: &str = "telebirr";

/// Fields never part of the canonical signature string.
const SIGN_EXCLUDED: &[&str] = &[
    "sign",
    "sign_type",
    "header",
    "refund_info",
    "openType",
    "raw_request",
    "biz_content",
    "wallet_reference_data",
];

/// Telebirr merchant credentials and endpoints.
#[derive(Debug, Clone)]
pub struct TelebirrConfig {
    pub merchant_app_id: String,
    pub fabric_app_id: String,
    pub app_secret: String,
    /// Merchant short code (also the payee identifier).
    pub short_code: String,
    /// Merchant private key, PEM or bare base64 body.
    pub private_key: String,
    /// Telebirr's public key for verifying notifications.
    pub public_key: String,
    pub api_url: String,
    pub web_checkout_url: String,
}

impl Default for TelebirrConfig {
    fn default() -> Self {
        TelebirrConfig {
            merchant_app_id: String::new(),
            fabric_app_id: String::new(),
            app_secret: String::new(),
            short_code: String::new(),
            private_key: String::new(),
            public_key: String::new(),
            api_url:
                "https://developerportal.ethiotelebirr.et:38443/apiaccess/payment/gateway"
                    .to_string(),
            web_checkout_url:
                "https://developerportal.ethiotelebirr.et:38443/payment/web/paygate?".to_string(),
        }
    }
}

/// The Telebirr payment adapter.
#[derive(Debug, Clone)]
pub struct TelebirrProvider {
    config: TelebirrConfig,
    client: reqwest::Client,
}

impl TelebirrProvider {
    pub fn new(config: TelebirrConfig) -> Self {
        TelebirrProvider {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn is_configured(&self) -> bool {
        !self.config.merchant_app_id.is_empty()
            && !self.config.fabric_app_id.is_empty()
            && !self.config.app_secret.is_empty()
            && !self.config.short_code.is_empty()
            && !self.config.private_key.is_empty()
    }

    /// 13-digit millisecond timestamp, the format the paygate accepts.
    fn timestamp() -> String {
        Utc::now().timestamp_millis().to_string()
    }

    /// 32-character lowercase hex nonce.
    fn nonce() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Signs the canonical string of `fields` with the merchant key.
    fn sign_fields(&self, fields: &BTreeMap<String, String>) -> Result<String, PaymentError> {
        let to_sign = canonical_string(fields);

        let pem = ensure_pem(&self.config.private_key, "PRIVATE KEY");
        let key = RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| PaymentError::Provider {
            provider: PROVIDER,
            message: format!("invalid merchant private key: {e}"),
        })?;

        let signing_key = SigningKey::<Sha256>::new(key);
        let signature = signing_key.sign_with_rng(&mut rand::thread_rng(), to_sign.as_bytes());

        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// Step 1: trade the app secret for a fabric token.
    async fn apply_fabric_token(&self) -> Result<String, PaymentError> {
        let response: Value = self
            .client
            .post(format!("{}/payment/v1/token", self.config.api_url))
            .header("X-APP-Key", &self.config.fabric_app_id)
            .json(&serde_json::json!({ "appSecret": self.config.app_secret }))
            .send()
            .await?
            .json()
            .await?;

        response
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PaymentError::Provider {
                provider: PROVIDER,
                message: response
                    .get("errorMsg")
                    .or_else(|| response.get("msg"))
                    .and_then(Value::as_str)
                    .unwrap_or("no token in response")
                    .to_string(),
            })
    }

    /// Step 2: create the preorder and obtain a prepay id.
    async fn create_preorder(
        &self,
        fabric_token: &str,
        request: &CheckoutRequest,
        merch_order_id: &str,
    ) -> Result<String, PaymentError> {
        let mut fields = BTreeMap::new();
        fields.insert("timestamp".to_string(), Self::timestamp());
        fields.insert("nonce_str".to_string(), Self::nonce());
        fields.insert("method".to_string(), "payment.preorder".to_string());
        fields.insert("version".to_string(), "1.0".to_string());

        let mut biz = BTreeMap::new();
        biz.insert("notify_url".to_string(), request.notify_url.clone());
        biz.insert("appid".to_string(), self.config.merchant_app_id.clone());
        biz.insert("merch_code".to_string(), self.config.short_code.clone());
        biz.insert("merch_order_id".to_string(), merch_order_id.to_string());
        biz.insert("trade_type".to_string(), "Checkout".to_string());
        biz.insert("title".to_string(), request.description.clone());
        biz.insert(
            "total_amount".to_string(),
            request.amount.to_decimal_string(),
        );
        biz.insert("trans_currency".to_string(), "ETB".to_string());
        biz.insert("timeout_express".to_string(), "120m".to_string());
        biz.insert("business_type".to_string(), "BuyGoods".to_string());
        biz.insert("redirect_url".to_string(), request.return_url.clone());
        biz.insert(
            "payee_identifier".to_string(),
            self.config.short_code.clone(),
        );
        biz.insert("payee_identifier_type".to_string(), "04".to_string());
        biz.insert("payee_type".to_string(), "5000".to_string());

        // The signature covers the flattened request + biz_content fields.
        let mut sign_fields = fields.clone();
        sign_fields.extend(biz.clone());
        let sign = self.sign_fields(&sign_fields)?;

        let mut body = serde_json::Map::new();
        for (k, v) in &fields {
            body.insert(k.clone(), Value::String(v.clone()));
        }
        body.insert(
            "biz_content".to_string(),
            Value::Object(
                biz.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        body.insert("sign".to_string(), Value::String(sign));
        body.insert("sign_type".to_string(), Value::String("SHA256WithRSA".to_string()));

        let response: Value = self
            .client
            .post(format!(
                "{}/payment/v1/merchant/preOrder",
                self.config.api_url
            ))
            .header("X-APP-Key", &self.config.fabric_app_id)
            .header("Authorization", fabric_token)
            .json(&Value::Object(body))
            .send()
            .await?
            .json()
            .await?;

        response
            .pointer("/biz_content/prepay_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PaymentError::Provider {
                provider: PROVIDER,
                message: response
                    .get("msg")
                    .or_else(|| response.get("errorMsg"))
                    .and_then(Value::as_str)
                    .unwrap_or("preorder rejected")
                    .to_string(),
            })
    }

    /// Steps 3-4: signed raw request, URL-encoded into the paygate URL.
    fn build_checkout_url(&self, prepay_id: &str) -> Result<String, PaymentError> {
        let mut fields = BTreeMap::new();
        fields.insert("appid".to_string(), self.config.merchant_app_id.clone());
        fields.insert("merch_code".to_string(), self.config.short_code.clone());
        fields.insert("nonce_str".to_string(), Self::nonce());
        fields.insert("prepay_id".to_string(), prepay_id.to_string());
        fields.insert("timestamp".to_string(), Self::timestamp());

        let sign = self.sign_fields(&fields)?;

        // Base64 signatures carry '+', '/' and '='; without encoding, '+'
        // decodes as a space in query strings.
        let raw_request = [
            format!("appid={}", url_encode(&fields["appid"])),
            format!("merch_code={}", url_encode(&fields["merch_code"])),
            format!("nonce_str={}", url_encode(&fields["nonce_str"])),
            format!("prepay_id={}", url_encode(&fields["prepay_id"])),
            format!("timestamp={}", url_encode(&fields["timestamp"])),
            format!("sign={}", url_encode(&sign)),
            "sign_type=SHA256WithRSA".to_string(),
        ]
        .join("&");

        Ok(format!(
            "{}{}&version=1.0&trade_type=Checkout",
            self.config.web_checkout_url, raw_request
        ))
    }
}

impl PaymentGateway for TelebirrProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Telebirr
    }

    async fn initiate(&self, request: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        if !self.is_configured() {
            return Err(PaymentError::NotConfigured(PROVIDER));
        }

        // Telebirr's order id on our side; echoed back as merch_order_id.
        let merch_order_id = format!("TK{}", Utc::now().timestamp_millis());

        debug!(merch_order_id = %merch_order_id, "Starting Telebirr WebCheckout");

        let fabric_token = self.apply_fabric_token().await?;
        let prepay_id = self
            .create_preorder(&fabric_token, request, &merch_order_id)
            .await?;
        let checkout_url = self.build_checkout_url(&prepay_id)?;

        Ok(CheckoutSession {
            provider: ProviderKind::Telebirr,
            checkout_url: Some(checkout_url),
            provider_ref: merch_order_id,
        })
    }

    /// Verifies the notification signature against Telebirr's public key,
    /// then extracts the result. No signature or no configured key fails
    /// closed.
    fn parse_callback(
        &self,
        raw_body: &[u8],
        _auth: &CallbackAuth,
    ) -> Result<CallbackNotice, PaymentError> {
        let payload: Value =
            serde_json::from_slice(raw_body).map_err(|e| PaymentError::Malformed {
                provider: PROVIDER,
                reason: e.to_string(),
            })?;
        let object = payload.as_object().ok_or_else(|| PaymentError::Malformed {
            provider: PROVIDER,
            reason: "payload is not an object".to_string(),
        })?;

        let signature = object
            .get("sign")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::Untrusted {
                provider: PROVIDER,
                reason: "missing signature".to_string(),
            })?;

        if self.config.public_key.is_empty() {
            return Err(PaymentError::Untrusted {
                provider: PROVIDER,
                reason: "no public key configured".to_string(),
            });
        }

        // Rebuild the canonical string from every scalar field the notify
        // carried, minus the signature fields.
        let mut fields = BTreeMap::new();
        for (key, value) in object {
            if SIGN_EXCLUDED.contains(&key.as_str()) {
                continue;
            }
            let text = match value {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            fields.insert(key.clone(), text);
        }
        let to_verify = canonical_string(&fields);

        let pem = ensure_pem(&self.config.public_key, "PUBLIC KEY");
        let public_key =
            RsaPublicKey::from_public_key_pem(&pem).map_err(|e| PaymentError::Untrusted {
                provider: PROVIDER,
                reason: format!("invalid public key: {e}"),
            })?;
        let verifying_key = VerifyingKey::<Sha256>::new(public_key);

        let signature_bytes =
            BASE64
                .decode(signature)
                .map_err(|_| PaymentError::Untrusted {
                    provider: PROVIDER,
                    reason: "signature is not valid base64".to_string(),
                })?;
        let signature =
            Signature::try_from(signature_bytes.as_slice()).map_err(|_| {
                PaymentError::Untrusted {
                    provider: PROVIDER,
                    reason: "signature has invalid shape".to_string(),
                }
            })?;

        if verifying_key
            .verify(to_verify.as_bytes(), &signature)
            .is_err()
        {
            warn!("Telebirr notification signature verification failed");
            return Err(PaymentError::Untrusted {
                provider: PROVIDER,
                reason: "signature verification failed".to_string(),
            });
        }

        // Both documented snake_case and legacy camelCase field sets occur
        // in the wild.
        let provider_ref = string_field(object, &["merch_order_id", "outTradeNo"])
            .ok_or_else(|| PaymentError::Malformed {
                provider: PROVIDER,
                reason: "missing merchant order id".to_string(),
            })?;
        let external_tx_id = string_field(
            object,
            &["trans_id", "transactionNo", "payment_order_id", "tradeNo"],
        )
        .unwrap_or_else(|| provider_ref.clone());

        let status_text =
            string_field(object, &["trade_status", "tradeStatus"]).unwrap_or_default();
        let status = match status_text.as_str() {
            "Completed" | "SUCCESS" | "2" => CallbackStatus::Success,
            "Paying" | "Pending" => CallbackStatus::Pending,
            _ => CallbackStatus::Failed,
        };

        let amount = object
            .get("total_amount")
            .or_else(|| object.get("totalAmount"))
            .and_then(money_from_json);

        debug!(merch_order_id = %provider_ref, ?status, "Telebirr notification verified");

        Ok(CallbackNotice {
            provider: ProviderKind::Telebirr,
            provider_ref,
            external_tx_id,
            status,
            amount,
        })
    }
}

// =============================================================================
// Canonicalization Helpers
// =============================================================================

/// Sorted `key=value` pairs joined with `&` - the string both sides sign.
fn canonical_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Wraps a bare base64 key body into PEM; passes proper PEM through.
fn ensure_pem(key: &str, label: &str) -> String {
    let key = key.trim();
    if key.contains("-----BEGIN") {
        return key.to_string();
    }

    let body = key
        .as_bytes()
        .chunks(64)
        .map(|chunk| String::from_utf8_lossy(chunk).to_string())
        .collect::<Vec<_>>()
        .join("\n");
    format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----\n")
}

fn string_field(object: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| object.get(*name).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Percent-encodes everything outside the unreserved set.
fn url_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};

    fn test_keypair() -> (String, String) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        (
            private
                .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
                .unwrap()
                .to_string(),
            public
                .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
                .unwrap()
                .to_string(),
        )
    }

    fn provider_with_keys(private: &str, public: &str) -> TelebirrProvider {
        TelebirrProvider::new(TelebirrConfig {
            merchant_app_id: "app-1".to_string(),
            fabric_app_id: "fabric-1".to_string(),
            app_secret: "secret".to_string(),
            short_code: "600123".to_string(),
            private_key: private.to_string(),
            public_key: public.to_string(),
            ..TelebirrConfig::default()
        })
    }

    /// Signs a notify payload the way Telebirr does, with the test key.
    fn signed_notify(private: &str, status: &str) -> Vec<u8> {
        let mut fields = BTreeMap::new();
        fields.insert("appid".to_string(), "app-1".to_string());
        fields.insert("merch_code".to_string(), "600123".to_string());
        fields.insert("merch_order_id".to_string(), "TK1700000000000".to_string());
        fields.insert("trans_id".to_string(), "TB-TRANS-77".to_string());
        fields.insert("total_amount".to_string(), "2100.00".to_string());
        fields.insert("trans_currency".to_string(), "ETB".to_string());
        fields.insert("trade_status".to_string(), status.to_string());

        let to_sign = canonical_string(&fields);
        let key = RsaPrivateKey::from_pkcs8_pem(private).unwrap();
        let signing_key = SigningKey::<Sha256>::new(key);
        let signature = signing_key.sign_with_rng(&mut rand::thread_rng(), to_sign.as_bytes());

        let mut payload: serde_json::Map<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        payload.insert("sign".to_string(), Value::String(BASE64.encode(signature.to_bytes())));
        payload.insert("sign_type".to_string(), Value::String("SHA256WithRSA".to_string()));

        serde_json::to_vec(&Value::Object(payload)).unwrap()
    }

    #[test]
    fn test_canonical_string_sorts_keys() {
        let mut fields = BTreeMap::new();
        fields.insert("b".to_string(), "2".to_string());
        fields.insert("a".to_string(), "1".to_string());
        fields.insert("c".to_string(), "3".to_string());
        assert_eq!(canonical_string(&fields), "a=1&b=2&c=3");
    }

    #[test]
    fn test_ensure_pem_wraps_bare_base64() {
        let wrapped = ensure_pem("QUJDREVG", "PUBLIC KEY");
        assert!(wrapped.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(wrapped.contains("QUJDREVG"));
        assert!(wrapped.trim_end().ends_with("-----END PUBLIC KEY-----"));

        let pem = "-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----";
        assert_eq!(ensure_pem(pem, "PUBLIC KEY"), pem);
    }

    #[test]
    fn test_url_encode_base64_characters() {
        assert_eq!(url_encode("a+b/c="), "a%2Bb%2Fc%3D");
        assert_eq!(url_encode("abc-_.~"), "abc-_.~");
    }

    #[test]
    fn test_verified_notify_parses() {
        let (private, public) = test_keypair();
        let provider = provider_with_keys(&private, &public);

        let body = signed_notify(&private, "Completed");
        let notice = provider
            .parse_callback(&body, &CallbackAuth::default())
            .unwrap();

        assert_eq!(notice.provider_ref, "TK1700000000000");
        assert_eq!(notice.external_tx_id, "TB-TRANS-77");
        assert_eq!(notice.status, CallbackStatus::Success);
        assert_eq!(
            notice.amount,
            Some(tiketa_core::Money::from_cents(210_000))
        );
    }

    #[test]
    fn test_legacy_numeric_status_is_success() {
        let (private, public) = test_keypair();
        let provider = provider_with_keys(&private, &public);

        let notice = provider
            .parse_callback(&signed_notify(&private, "2"), &CallbackAuth::default())
            .unwrap();
        assert_eq!(notice.status, CallbackStatus::Success);
    }

    #[test]
    fn test_unsigned_notify_fails_closed() {
        let (private, public) = test_keypair();
        let provider = provider_with_keys(&private, &public);

        let body = serde_json::to_vec(&serde_json::json!({
            "merch_order_id": "TK1700000000000",
            "trade_status": "Completed",
        }))
        .unwrap();
        let err = provider
            .parse_callback(&body, &CallbackAuth::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let (signer_private, _) = test_keypair();
        let (_, other_public) = test_keypair();
        let provider = provider_with_keys(&signer_private, &other_public);

        let err = provider
            .parse_callback(
                &signed_notify(&signer_private, "Completed"),
                &CallbackAuth::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }

    #[test]
    fn test_tampered_amount_fails_closed() {
        let (private, public) = test_keypair();
        let provider = provider_with_keys(&private, &public);

        let body = signed_notify(&private, "Completed");
        let text = String::from_utf8(body).unwrap().replace("2100.00", "1.00");

        let err = provider
            .parse_callback(text.as_bytes(), &CallbackAuth::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }

    #[test]
    fn test_missing_public_key_fails_closed() {
        let (private, _) = test_keypair();
        let provider = provider_with_keys(&private, "");

        let err = provider
            .parse_callback(
                &signed_notify(&private, "Completed"),
                &CallbackAuth::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PaymentError::Untrusted { .. }));
    }
}
