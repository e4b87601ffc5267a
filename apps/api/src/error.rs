//! # API Error Types
//!
//! Translation of domain and infrastructure errors into HTTP responses.
//!
//! Structured business rejections keep their specific message; anything
//! infrastructural is logged in full and surfaced as a generic failure
//! without internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use tiketa_core::CoreError;
use tiketa_db::DbError;
use tiketa_payments::PaymentError;

/// What the HTTP layer returns when a request cannot be served.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Business conflicts: sold-out inventory, illegal transitions,
    /// duplicate business keys.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PromoRejected(String),

    /// Payment initiation rejected by us or the rail.
    #[error("{0}")]
    PaymentRejected(String),

    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PromoRejected(_) => StatusCode::BAD_REQUEST,
            ApiError::PaymentRejected(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::PromoRejected(_) => "PROMO_REJECTED",
            ApiError::PaymentRejected(_) => "PAYMENT_REJECTED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details are logged, never exposed.
        let public_message = match &self {
            ApiError::Internal(detail) => {
                error!(detail = %detail, "Internal error");
                "An internal error occurred".to_string()
            }
            other => {
                warn!(code = other.code(), message = %other, "Request rejected");
                other.to_string()
            }
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": public_message,
            }
        }));

        (status, body).into_response()
    }
}

/// Domain rejections keep their taxonomy; store faults go generic.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::InsufficientInventory { .. } => ApiError::Conflict(err.to_string()),
            CoreError::LimitExceeded { .. }
            | CoreError::NotAvailable { .. }
            | CoreError::MixedMerchantCart
            | CoreError::Validation(_) => ApiError::Validation(err.to_string()),
            CoreError::PromoDenied(reason) => ApiError::PromoRejected(reason.to_string()),
            CoreError::OrderNotFound(_) => ApiError::NotFound(err.to_string()),
            CoreError::InvalidTransition { .. }
            | CoreError::AlreadyUsed { .. }
            | CoreError::NotReady { .. } => ApiError::Conflict(err.to_string()),
            CoreError::UntrustedCallback { .. } | CoreError::AmountMismatch { .. } => {
                ApiError::PaymentRejected(err.to_string())
            }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Domain(core) => core.into(),
            DbError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{entity} not found: {id}"))
            }
            DbError::UniqueViolation { field, .. } => {
                ApiError::Conflict(format!("duplicate {field}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::NotConfigured(_)
            | PaymentError::Provider { .. }
            | PaymentError::Malformed { .. } => ApiError::PaymentRejected(err.to_string()),
            PaymentError::Untrusted { .. } => ApiError::PaymentRejected(err.to_string()),
            PaymentError::Transport(_) => ApiError::Internal(err.to_string()),
        }
    }
}

/// Result alias for handlers and services.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_conflict_maps_to_409() {
        let err: ApiError = CoreError::InsufficientInventory {
            name: "VIP".to_string(),
            available: 0,
            requested: 1,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONFLICT");
    }

    #[test]
    fn test_promo_denial_keeps_reason() {
        let err: ApiError = CoreError::PromoDenied(tiketa_core::PromoDenied::Expired).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "code has expired");
    }

    #[test]
    fn test_store_faults_go_generic() {
        let err: ApiError = DbError::Internal("connection reset".to_string()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
