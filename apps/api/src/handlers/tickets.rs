//! Ticket purchase, listing and checkpoint validation endpoints.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use tiketa_core::Ticket;

use crate::error::ApiResult;
use crate::handlers::user_id_from;
use crate::services::purchase::{PurchaseResponse, PurchaseTicketsRequest};
use crate::services::redemption::{RedeemRequest, ValidationResponse};
use crate::state::AppState;

/// `POST /api/tickets/purchase`
pub async fn purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PurchaseTicketsRequest>,
) -> ApiResult<Json<PurchaseResponse>> {
    let user_id = user_id_from(&headers)?;
    let response = state.purchases().purchase_tickets(&user_id, request).await?;
    Ok(Json(response))
}

/// `GET /api/tickets` - the buyer's tickets, newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Ticket>>> {
    let user_id = user_id_from(&headers)?;
    let tickets = state.db.tickets().list_for_user(&user_id).await?;
    Ok(Json(tickets))
}

/// `POST /api/tickets/validate` - called by the checkpoint operator's
/// device, not the buyer.
pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>,
) -> ApiResult<Json<ValidationResponse>> {
    let response = state.redemption().redeem_ticket(request).await?;
    Ok(Json(response))
}
