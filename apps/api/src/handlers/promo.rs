//! Promo code validation endpoint (read-side, no side effects).

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use tiketa_core::validation::validate_promo_code;
use tiketa_core::{CoreError, DiscountType, Money};

use crate::error::ApiResult;
use crate::handlers::user_id_from;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidatePromoRequest {
    pub code: String,
    pub event_id: Option<String>,
    pub subtotal_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct ValidatePromoResponse {
    pub valid: bool,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_cents: i64,
    pub new_total_cents: i64,
}

/// `POST /api/promo/validate`
///
/// Pure check against the buyer's cart; applying happens inside the
/// purchase transaction. Each rejection surfaces its specific reason.
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidatePromoRequest>,
) -> ApiResult<Json<ValidatePromoResponse>> {
    let user_id = user_id_from(&headers)?;
    validate_promo_code(&request.code).map_err(CoreError::from)?;

    let (promo, discount) = state
        .db
        .promos()
        .validate(
            &request.code,
            &user_id,
            request.event_id.as_deref(),
            Money::from_cents(request.subtotal_cents),
            Utc::now(),
        )
        .await?;

    Ok(Json(ValidatePromoResponse {
        valid: true,
        code: promo.code,
        discount_type: promo.discount_type,
        discount_cents: discount.discount.cents(),
        new_total_cents: discount.new_total.cents(),
    }))
}
