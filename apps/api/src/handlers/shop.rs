//! Venue-shop endpoints: catalog reads, order creation, fulfillment and
//! pickup validation.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

use tiketa_core::{state as order_state, Order, OrderStatus, PickupLocation, ShopItem};
use tiketa_db::repository::order::Transition;

use crate::error::{ApiError, ApiResult};
use crate::handlers::user_id_from;
use crate::services::purchase::{CreateShopOrderRequest, PurchaseResponse};
use crate::services::redemption::{RedeemRequest, ValidationResponse};
use crate::state::AppState;

/// `GET /api/shop/items` - purchasable items (active merchants only).
pub async fn items(State(state): State<AppState>) -> ApiResult<Json<Vec<ShopItem>>> {
    let items = state.db.catalog().list_purchasable_items().await?;
    Ok(Json(items))
}

/// `GET /api/shop/pickup-locations`
pub async fn pickup_locations(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<PickupLocation>>> {
    let locations = state.db.catalog().list_pickup_locations().await?;
    Ok(Json(locations))
}

/// `POST /api/shop/orders`
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateShopOrderRequest>,
) -> ApiResult<Json<PurchaseResponse>> {
    let user_id = user_id_from(&headers)?;
    let response = state.purchases().create_shop_order(&user_id, request).await?;
    Ok(Json(response))
}

/// `GET /api/shop/orders` - the buyer's shop orders.
pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Order>>> {
    let user_id = user_id_from(&headers)?;
    let orders = state.db.orders().list_for_user(&user_id).await?;
    Ok(Json(
        orders.into_iter().filter(|o| o.qr_code.is_some()).collect(),
    ))
}

/// `POST /api/shop/orders/:order_id/ready` - merchant-operator flow:
/// the order is packed and waiting at the counter.
pub async fn mark_ready(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Value>> {
    match state.db.orders().mark_ready_for_pickup(&order_id).await? {
        Transition::Applied => Ok(Json(json!({ "success": true }))),
        Transition::Skipped { current } => {
            // Outside the adjacency table: rejected and logged, never
            // silently ignored.
            warn!(order_id = %order_id, ?current, "Rejected fulfillment transition");
            match order_state::check_order_transition(current, OrderStatus::ReadyForPickup) {
                Err(err) => Err(ApiError::from(err)),
                // Another operator moved it to READY_FOR_PICKUP between the
                // update and the re-read.
                Ok(()) => Err(ApiError::Conflict(
                    "order was transitioned concurrently".to_string(),
                )),
            }
        }
    }
}

/// `POST /api/shop/pickup/validate` - the pickup counter's scanner.
pub async fn validate_pickup(
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>,
) -> ApiResult<Json<ValidationResponse>> {
    let response = state.redemption().redeem_pickup(request).await?;
    Ok(Json(response))
}
