//! # tiketa-payments: Payment Rail Adapters
//!
//! One capability interface over three Ethiopian payment rails, selected by
//! an enum tag so reconciliation never branches on provider identity beyond
//! picking the right callback parser.
//!
//! ```text
//! initiate(CheckoutRequest)                parse_callback(raw, auth)
//!        |                                          |
//!   CheckoutSession                           CallbackNotice
//!   redirect URL + provider_ref               verified, typed, amount
//!        |                                          |
//!   buyer pays out of band  . . . . . . . .  reconciliation flips the
//!                                            order exactly once
//! ```
//!
//! Every adapter verifies authenticity BEFORE trusting any callback field:
//! HMAC-SHA256 (Chapa), RSA-PSS over the canonicalized payload (Telebirr),
//! shared-secret comparison (CBE Birr). A callback failing verification is
//! an [`PaymentError::Untrusted`] and never reaches reconciliation.

pub mod chapa;
pub mod cbe_birr;
pub mod telebirr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tiketa_core::{Money, PaymentMethod};

pub use chapa::{ChapaConfig, ChapaProvider};
pub use cbe_birr::{CbeBirrConfig, CbeBirrProvider};
pub use telebirr::{TelebirrConfig, TelebirrProvider};

// =============================================================================
// Provider Tag
// =============================================================================

/// Which rail handles a payment. The tag picks the adapter; nothing else in
/// the system branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Chapa,
    Telebirr,
    CbeBirr,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Chapa => "chapa",
            ProviderKind::Telebirr => "telebirr",
            ProviderKind::CbeBirr => "cbe-birr",
        }
    }

    /// The payment method recorded on orders settled through this rail.
    pub const fn method(self) -> PaymentMethod {
        match self {
            ProviderKind::Chapa => PaymentMethod::Chapa,
            ProviderKind::Telebirr => PaymentMethod::Telebirr,
            ProviderKind::CbeBirr => PaymentMethod::CbeBirr,
        }
    }
}

impl From<PaymentMethod> for ProviderKind {
    fn from(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::Chapa => ProviderKind::Chapa,
            PaymentMethod::Telebirr => ProviderKind::Telebirr,
            PaymentMethod::CbeBirr => ProviderKind::CbeBirr,
        }
    }
}

// =============================================================================
// Requests & Notices
// =============================================================================

/// Everything an adapter needs to start a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub order_id: String,
    /// Our payment record id; hosted checkout uses it as `tx_ref`.
    pub payment_id: String,
    pub amount: Money,
    /// Sanitized, human-readable purchase description.
    pub description: String,
    pub buyer_phone: Option<String>,
    pub buyer_email: Option<String>,
    /// Where the rail posts its asynchronous result.
    pub notify_url: String,
    /// Where the buyer lands after checkout.
    pub return_url: String,
}

/// A started checkout: where to send the buyer and the reference the rail
/// will echo back in its notification.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub provider: ProviderKind,
    pub checkout_url: Option<String>,
    pub provider_ref: String,
}

/// Result reported by a rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Success,
    Failed,
    /// Still in flight; reconciliation ignores these deliveries.
    Pending,
}

/// A verified, parsed provider notification. Only constructed after the
/// adapter authenticated the payload.
#[derive(Debug, Clone)]
pub struct CallbackNotice {
    pub provider: ProviderKind,
    /// Matches `Payment.provider_ref` (or the payment id for hosted
    /// checkout) - how the notice finds its order.
    pub provider_ref: String,
    /// The rail's own transaction id, stamped onto the order as
    /// `payment_ref`.
    pub external_tx_id: String,
    pub status: CallbackStatus,
    /// Amount the rail claims was paid; reconciliation matches it against
    /// the order total. `None` when the rail omits it (failures).
    pub amount: Option<Money>,
}

/// Transport-layer authentication material accompanying a callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackAuth {
    /// `x-chapa-signature` header (hex HMAC-SHA256 of the raw body).
    pub signature: Option<String>,
    /// Shared API key header (CBE Birr).
    pub api_key: Option<String>,
}

// =============================================================================
// Errors
// =============================================================================

/// Payment adapter failures.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Credentials for this rail are not configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Callback failed authenticity verification. Fails closed; the notice
    /// never reaches reconciliation.
    #[error("untrusted {provider} callback: {reason}")]
    Untrusted {
        provider: &'static str,
        reason: String,
    },

    /// Payload did not have the expected shape.
    #[error("malformed {provider} payload: {reason}")]
    Malformed {
        provider: &'static str,
        reason: String,
    },

    /// The rail rejected the request.
    #[error("{provider} rejected the request: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// Could not reach the rail.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

// =============================================================================
// Gateway Interface
// =============================================================================

/// The capability every rail adapter provides.
///
/// `initiate` is async (network); `parse_callback` is pure verification
/// over the already-received body and must not perform I/O.
pub trait PaymentGateway {
    fn kind(&self) -> ProviderKind;

    fn initiate(
        &self,
        request: &CheckoutRequest,
    ) -> impl std::future::Future<Output = Result<CheckoutSession, PaymentError>> + Send;

    fn parse_callback(
        &self,
        raw_body: &[u8],
        auth: &CallbackAuth,
    ) -> Result<CallbackNotice, PaymentError>;
}

// =============================================================================
// Registry
// =============================================================================

/// All three adapters behind the tag. Handlers and reconciliation hold one
/// of these and dispatch by [`ProviderKind`].
#[derive(Debug, Clone)]
pub struct PaymentProviders {
    chapa: ChapaProvider,
    telebirr: TelebirrProvider,
    cbe_birr: CbeBirrProvider,
}

impl PaymentProviders {
    pub fn new(chapa: ChapaConfig, telebirr: TelebirrConfig, cbe_birr: CbeBirrConfig) -> Self {
        PaymentProviders {
            chapa: ChapaProvider::new(chapa),
            telebirr: TelebirrProvider::new(telebirr),
            cbe_birr: CbeBirrProvider::new(cbe_birr),
        }
    }

    /// Starts a checkout on the tagged rail.
    pub async fn initiate(
        &self,
        kind: ProviderKind,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        match kind {
            ProviderKind::Chapa => self.chapa.initiate(request).await,
            ProviderKind::Telebirr => self.telebirr.initiate(request).await,
            ProviderKind::CbeBirr => self.cbe_birr.initiate(request).await,
        }
    }

    /// Verifies and parses a callback from the tagged rail.
    pub fn parse_callback(
        &self,
        kind: ProviderKind,
        raw_body: &[u8],
        auth: &CallbackAuth,
    ) -> Result<CallbackNotice, PaymentError> {
        match kind {
            ProviderKind::Chapa => self.chapa.parse_callback(raw_body, auth),
            ProviderKind::Telebirr => self.telebirr.parse_callback(raw_body, auth),
            ProviderKind::CbeBirr => self.cbe_birr.parse_callback(raw_body, auth),
        }
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Strips characters the rails reject from purchase descriptions (letters,
/// numbers, hyphens, underscores, spaces and dots survive).
pub fn sanitize_description(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' ' | '.'))
        .collect()
}

/// Reads a money amount out of a JSON field that rails send either as a
/// number or a decimal string.
pub(crate) fn money_from_json(value: &serde_json::Value) -> Option<Money> {
    match value {
        serde_json::Value::String(s) => Money::parse_decimal(s),
        serde_json::Value::Number(n) => Money::parse_decimal(&n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in [ProviderKind::Chapa, ProviderKind::Telebirr, ProviderKind::CbeBirr] {
            assert_eq!(ProviderKind::from(kind.method()), kind);
        }
    }

    #[test]
    fn test_sanitize_description() {
        assert_eq!(
            sanitize_description("Tickets for Meskel Eve! (VIP) @Arena"),
            "Tickets for Meskel Eve VIP Arena"
        );
        assert_eq!(sanitize_description("order_12.5 - beer"), "order_12.5 - beer");
    }

    #[test]
    fn test_money_from_json() {
        assert_eq!(
            money_from_json(&serde_json::json!("2100.00")),
            Some(Money::from_cents(210_000))
        );
        assert_eq!(
            money_from_json(&serde_json::json!(2100)),
            Some(Money::from_cents(210_000))
        );
        assert_eq!(
            money_from_json(&serde_json::json!(99.5)),
            Some(Money::from_cents(9_950))
        );
        assert_eq!(money_from_json(&serde_json::json!(null)), None);
    }
}
