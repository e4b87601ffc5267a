//! # Checkout Service
//!
//! Payment initiation: turns a pending order into a provider checkout
//! session. One payment record per order; re-initiating (e.g. the buyer
//! switches rails) reuses it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use tiketa_core::{Money, OrderStatus, PaymentMethod, PaymentStatus};
use tiketa_db::Database;
use tiketa_payments::{
    sanitize_description, CheckoutRequest, PaymentProviders, ProviderKind,
};

use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub order_id: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub checkout_url: Option<String>,
    pub provider_ref: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub order_id: String,
    pub order_status: OrderStatus,
    pub payment: Option<tiketa_core::Payment>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Database,
    providers: Arc<PaymentProviders>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(db: Database, providers: Arc<PaymentProviders>, config: Arc<AppConfig>) -> Self {
        CheckoutService {
            db,
            providers,
            config,
        }
    }

    /// Starts a checkout on the requested rail for a pending order owned by
    /// `user_id`.
    pub async fn initiate(
        &self,
        user_id: &str,
        request: InitiatePaymentRequest,
    ) -> ApiResult<InitiatePaymentResponse> {
        let order = self
            .db
            .orders()
            .get_by_id(&request.order_id)
            .await?
            // Foreign orders read as absent, not as forbidden.
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

        if order.status != OrderStatus::Pending {
            return Err(ApiError::Conflict("Order is not pending payment".to_string()));
        }
        if let Some(payment) = self.db.payments().get_for_order(&order.id).await? {
            if payment.status == PaymentStatus::Completed {
                return Err(ApiError::Conflict("Order already paid".to_string()));
            }
        }

        let payment = self
            .db
            .payments()
            .upsert_for_order(&order.id, order.total_cents, request.method)
            .await?;

        let kind = ProviderKind::from(request.method);
        let description = self.describe_order(&order.id).await?;
        let buyer = self.db.catalog().get_user(user_id).await?;

        let is_ticket_order = order.qr_code.is_none();
        let return_url = if is_ticket_order {
            format!("{}/tickets", self.config.frontend_url)
        } else {
            format!("{}/shop/orders/{}", self.config.frontend_url, order.id)
        };

        let session = self
            .providers
            .initiate(
                kind,
                &CheckoutRequest {
                    order_id: order.id.clone(),
                    payment_id: payment.id.clone(),
                    amount: Money::from_cents(order.total_cents),
                    description,
                    buyer_phone: buyer.as_ref().and_then(|u| u.phone.clone()),
                    buyer_email: buyer.as_ref().and_then(|u| u.email.clone()),
                    notify_url: self.config.callback_url(kind.as_str()),
                    return_url,
                },
            )
            .await?;

        self.db
            .payments()
            .set_processing(&payment.id, &session.provider_ref)
            .await?;

        info!(
            order_number = %order.order_number,
            provider = kind.as_str(),
            provider_ref = %session.provider_ref,
            "Checkout initiated"
        );

        Ok(InitiatePaymentResponse {
            payment_id: payment.id,
            order_id: order.id,
            amount_cents: order.total_cents,
            method: request.method,
            checkout_url: session.checkout_url,
            provider_ref: session.provider_ref,
        })
    }

    /// Current order + payment status for the buyer's polling screen.
    pub async fn status(&self, user_id: &str, order_id: &str) -> ApiResult<PaymentStatusResponse> {
        let order = self
            .db
            .orders()
            .get_by_id(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

        let payment = self.db.payments().get_for_order(&order.id).await?;

        Ok(PaymentStatusResponse {
            order_id: order.id,
            order_status: order.status,
            payment,
        })
    }

    /// Human-readable purchase description for the checkout page, built
    /// from what the order actually contains.
    async fn describe_order(&self, order_id: &str) -> ApiResult<String> {
        let tickets = self.db.tickets().list_for_order(order_id).await?;
        if let Some(first) = tickets.first() {
            let event = self.db.catalog().get_event(&first.event_id).await?;
            let title = event.map(|e| e.title).unwrap_or_else(|| "Event".to_string());
            return Ok(sanitize_description(&format!("Tickets for {title}")));
        }

        let items = self.db.orders().items_for_order(order_id).await?;
        if !items.is_empty() {
            let names: Vec<&str> = items.iter().map(|i| i.name_snapshot.as_str()).collect();
            return Ok(sanitize_description(&format!(
                "Shop order {}",
                names.join(" and ")
            )));
        }

        Ok("Tiketa Order".to_string())
    }
}
