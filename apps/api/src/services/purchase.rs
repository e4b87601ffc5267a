//! # Purchase Service
//!
//! Orchestrates the two purchase flows. The heavy lifting - atomic
//! reservation, promo application, order/ticket creation - happens inside
//! one database transaction in the order repository; this layer supplies
//! policy (fee rates) and shapes the response.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiketa_core::money::FeeRate;
use tiketa_core::{Order, OrderItem, Ticket};
use tiketa_db::repository::order::{
    NewShopOrder, NewTicketOrder, ShopLine, TicketLine,
};
use tiketa_db::Database;

use crate::config::AppConfig;
use crate::error::ApiResult;

// =============================================================================
// Request / Response Shapes
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TicketLineRequest {
    pub ticket_type_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseTicketsRequest {
    pub event_id: String,
    pub tickets: Vec<TicketLineRequest>,
    pub promo_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShopLineRequest {
    pub shop_item_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateShopOrderRequest {
    pub pickup_location_id: String,
    pub items: Vec<ShopLineRequest>,
    pub promo_code: Option<String>,
}

/// `{order, payment_required}` plus what the purchase created.
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub order: Order,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tickets: Vec<Ticket>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItem>,
    /// Amount the buyer still owes, in cents.
    pub payment_required: i64,
}

// =============================================================================
// Service
// =============================================================================

#[derive(Clone)]
pub struct PurchaseService {
    db: Database,
    config: Arc<AppConfig>,
}

impl PurchaseService {
    pub fn new(db: Database, config: Arc<AppConfig>) -> Self {
        PurchaseService { db, config }
    }

    /// Buys tickets: everything reserves and persists atomically, or the
    /// caller gets a structured rejection and nothing changed.
    pub async fn purchase_tickets(
        &self,
        user_id: &str,
        request: PurchaseTicketsRequest,
    ) -> ApiResult<PurchaseResponse> {
        let purchase = self
            .db
            .orders()
            .create_ticket_order(NewTicketOrder {
                user_id: user_id.to_string(),
                event_id: request.event_id,
                lines: request
                    .tickets
                    .into_iter()
                    .map(|line| TicketLine {
                        ticket_type_id: line.ticket_type_id,
                        quantity: line.quantity,
                    })
                    .collect(),
                promo_code: request.promo_code,
                service_fee: FeeRate::from_bps(self.config.ticket_fee_bps),
            })
            .await?;

        let payment_required = purchase.order.total_cents;
        Ok(PurchaseResponse {
            order: purchase.order,
            tickets: purchase.tickets,
            items: Vec::new(),
            payment_required,
        })
    }

    /// Creates a shop order with a pickup QR code.
    pub async fn create_shop_order(
        &self,
        user_id: &str,
        request: CreateShopOrderRequest,
    ) -> ApiResult<PurchaseResponse> {
        let purchase = self
            .db
            .orders()
            .create_shop_order(NewShopOrder {
                user_id: user_id.to_string(),
                pickup_location_id: request.pickup_location_id,
                lines: request
                    .items
                    .into_iter()
                    .map(|line| ShopLine {
                        shop_item_id: line.shop_item_id,
                        quantity: line.quantity,
                    })
                    .collect(),
                promo_code: request.promo_code,
                service_fee: FeeRate::from_bps(self.config.shop_fee_bps),
            })
            .await?;

        let payment_required = purchase.order.total_cents;
        Ok(PurchaseResponse {
            order: purchase.order,
            tickets: Vec::new(),
            items: purchase.items,
            payment_required,
        })
    }
}
