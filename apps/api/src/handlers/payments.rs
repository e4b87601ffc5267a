//! Payment endpoints: initiation, status polling and the three provider
//! callback receivers.
//!
//! Callback receivers ALWAYS acknowledge with 200: a non-2xx answer makes
//! the rail retry into the same failure forever. Verification and
//! reconciliation failures are logged and swallowed at this boundary; the
//! response body says whether we accepted the notice, the status code
//! never does.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};

use tiketa_payments::{CallbackAuth, ProviderKind};

use crate::error::ApiResult;
use crate::handlers::user_id_from;
use crate::services::checkout::{
    InitiatePaymentRequest, InitiatePaymentResponse, PaymentStatusResponse,
};
use crate::state::AppState;

/// `POST /api/payments/initiate`
pub async fn initiate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> ApiResult<Json<InitiatePaymentResponse>> {
    let user_id = user_id_from(&headers)?;
    let response = state.checkout().initiate(&user_id, request).await?;
    Ok(Json(response))
}

/// `GET /api/payments/status/:order_id`
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> ApiResult<Json<PaymentStatusResponse>> {
    let user_id = user_id_from(&headers)?;
    let response = state.checkout().status(&user_id, &order_id).await?;
    Ok(Json(response))
}

/// `POST /api/payments/callback/chapa` - HMAC-signed webhook.
pub async fn chapa_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let auth = CallbackAuth {
        signature: header_value(&headers, "x-chapa-signature")
            .or_else(|| header_value(&headers, "chapa-signature")),
        api_key: None,
    };
    handle_callback(&state, ProviderKind::Chapa, &body, auth).await
}

/// `POST /api/payments/callback/telebirr` - RSA-signed notification.
pub async fn telebirr_callback(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    handle_callback(&state, ProviderKind::Telebirr, &body, CallbackAuth::default()).await
}

/// `POST /api/payments/callback/cbe-birr` - shared-secret callback.
pub async fn cbe_birr_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let auth = CallbackAuth {
        signature: None,
        api_key: header_value(&headers, "x-api-key"),
    };
    handle_callback(&state, ProviderKind::CbeBirr, &body, auth).await
}

/// Verify, reconcile, acknowledge. Every branch returns 200.
async fn handle_callback(
    state: &AppState,
    kind: ProviderKind,
    body: &[u8],
    auth: CallbackAuth,
) -> Json<Value> {
    let notice = match state.providers.parse_callback(kind, body, &auth) {
        Ok(notice) => notice,
        Err(err) => {
            // Untrusted or malformed: recorded, never propagated - a 4xx/5xx
            // here only triggers provider retry storms.
            warn!(provider = kind.as_str(), error = %err, "Callback rejected");
            return Json(json!({ "success": false }));
        }
    };

    match state.reconciliation().reconcile(&notice).await {
        Ok(outcome) => {
            info!(provider = kind.as_str(), ?outcome, "Callback reconciled");
            Json(json!({ "success": true }))
        }
        Err(err) => {
            warn!(provider = kind.as_str(), error = %err, "Reconciliation rejected callback");
            Json(json!({ "success": false }))
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
