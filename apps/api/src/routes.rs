//! # Route Table
//!
//! The whole HTTP surface in one place. Handlers stay thin; everything
//! interesting happens in the services.

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::handlers::{payments, promo, shop, tickets};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Tickets
        .route("/api/tickets/purchase", post(tickets::purchase))
        .route("/api/tickets", get(tickets::list))
        .route("/api/tickets/validate", post(tickets::validate))
        // Shop
        .route("/api/shop/items", get(shop::items))
        .route("/api/shop/pickup-locations", get(shop::pickup_locations))
        .route(
            "/api/shop/orders",
            post(shop::create_order).get(shop::list_orders),
        )
        .route("/api/shop/orders/:order_id/ready", post(shop::mark_ready))
        .route("/api/shop/pickup/validate", post(shop::validate_pickup))
        // Promo
        .route("/api/promo/validate", post(promo::validate))
        // Payments
        .route("/api/payments/initiate", post(payments::initiate))
        .route("/api/payments/status/:order_id", get(payments::status))
        .route("/api/payments/callback/chapa", post(payments::chapa_callback))
        .route(
            "/api/payments/callback/telebirr",
            post(payments::telebirr_callback),
        )
        .route(
            "/api/payments/callback/cbe-birr",
            post(payments::cbe_birr_callback),
        )
        // Health
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
