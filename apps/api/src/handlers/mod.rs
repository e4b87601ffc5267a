//! # HTTP Handlers
//!
//! Thin extraction/response shaping over the service layer. Buyer identity
//! arrives resolved from the upstream auth gateway as an `X-User-Id`
//! header; issuing and validating sessions is outside this service.

pub mod payments;
pub mod promo;
pub mod shop;
pub mod tickets;

use axum::http::HeaderMap;

use crate::error::{ApiError, ApiResult};

/// Header the auth gateway injects with the resolved buyer id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Pulls the buyer id out of the request headers.
pub fn user_id_from(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Validation("Missing or invalid X-User-Id header".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_extraction() {
        let mut headers = HeaderMap::new();
        assert!(user_id_from(&headers).is_err());

        headers.insert(USER_ID_HEADER, "u-123".parse().unwrap());
        assert_eq!(user_id_from(&headers).unwrap(), "u-123");

        headers.insert(USER_ID_HEADER, "   ".parse().unwrap());
        assert!(user_id_from(&headers).is_err());
    }
}
