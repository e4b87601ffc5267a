//! # Error Types
//!
//! Domain-specific error types for tiketa-core.
//!
//! ## Error Flow
//! ```text
//! ValidationError -> CoreError -> DbError (tiketa-db) -> ApiError (apps/api)
//! ```
//!
//! ## Design Principles
//! 1. `thiserror` derive macros, never manual impls
//! 2. Context in the error (names, counts, amounts), never bare strings
//! 3. Every variant is a recoverable, user-facing condition; infrastructure
//!    faults live in the db/api layers

use chrono::{DateTime, Utc};
use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations of the order/inventory/redemption engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Requested quantity exceeds the remaining units of a ticket type or
    /// shop item. Surfaced with what was actually left so the buyer can
    /// retry with a smaller quantity.
    #[error("Only {available} of {name} available, requested {requested}")]
    InsufficientInventory {
        name: String,
        available: i64,
        requested: i64,
    },

    /// Requested quantity exceeds the per-order cap of a ticket type.
    #[error("Maximum {max} of {name} per order, requested {requested}")]
    LimitExceeded {
        name: String,
        max: i64,
        requested: i64,
    },

    /// The item or ticket type cannot be purchased at all right now
    /// (inactive, unpublished event, past event, suspended merchant,
    /// out of stock flag).
    #[error("{name} is not available: {reason}")]
    NotAvailable { name: String, reason: String },

    /// Shop order mixing items from more than one merchant. Settlement is
    /// per-merchant, so these carts are rejected rather than silently
    /// attributed to the first merchant.
    #[error("Cart contains items from more than one merchant")]
    MixedMerchantCart,

    /// Promo code rejected for a specific reason.
    #[error("Promo code rejected: {0}")]
    PromoDenied(#[from] PromoDenied),

    /// A status transition outside the adjacency table was attempted.
    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// No order matches the given reference. Callbacks never create orders.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// A payment callback failed authenticity verification and must not
    /// reach reconciliation.
    #[error("Untrusted {provider} callback: {reason}")]
    UntrustedCallback { provider: String, reason: String },

    /// Callback amount does not match the order total.
    #[error("Callback amount {received_cents} does not match order total {expected_cents}")]
    AmountMismatch {
        expected_cents: i64,
        received_cents: i64,
    },

    /// The QR token was already consumed.
    #[error("Already redeemed")]
    AlreadyUsed { used_at: Option<DateTime<Utc>> },

    /// The order/ticket is not in a redeemable status yet.
    #[error("Not ready for redemption (current status: {current})")]
    NotReady { current: String },

    /// Input validation failure (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Promo Denial Reasons
// =============================================================================

/// Specific, user-facing reasons a promo code was rejected. Never a generic
/// "invalid".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromoDenied {
    #[error("unknown code")]
    UnknownCode,

    #[error("code is no longer active")]
    Inactive,

    #[error("code is not yet valid")]
    NotYetValid,

    #[error("code has expired")]
    Expired,

    #[error("code has reached its usage limit")]
    UsageCapReached,

    #[error("you have already used this code")]
    UserCapReached,

    #[error("code is not valid for this event")]
    WrongEvent,

    #[error("minimum purchase of {min_cents} cents required")]
    BelowMinimum { min_cents: i64 },
}

// =============================================================================
// Validation Error
// =============================================================================

/// Request-shape validation failures, caught before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_error_message() {
        let err = CoreError::InsufficientInventory {
            name: "VIP".to_string(),
            available: 1,
            requested: 2,
        };
        assert_eq!(err.to_string(), "Only 1 of VIP available, requested 2");
    }

    #[test]
    fn test_promo_denied_converts_to_core_error() {
        let core: CoreError = PromoDenied::Expired.into();
        assert!(matches!(core, CoreError::PromoDenied(PromoDenied::Expired)));
        assert_eq!(core.to_string(), "Promo code rejected: code has expired");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
