//! # Redemption Service
//!
//! Checkpoint validation of QR tokens: ticket admission and shop pickup.
//! The one-way flip happens as a test-and-set in the repositories; this
//! layer shapes the operator-facing result - a specific reason for every
//! rejected scan, and a redacted summary (never the raw token) for every
//! accepted one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tiketa_core::validation::validate_qr_token;
use tiketa_core::CoreError;
use tiketa_db::repository::order::PickupRedemption;
use tiketa_db::repository::ticket::TicketRedemption;
use tiketa_db::{Database, RedeemOutcome};

use crate::error::ApiResult;

// =============================================================================
// Shapes
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub qr_code: String,
}

/// What the checkpoint operator's device displays.
#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<PickupSummary>,
}

#[derive(Debug, Serialize)]
pub struct TicketSummary {
    pub event: String,
    pub ticket_type: String,
    pub attendee: String,
}

#[derive(Debug, Serialize)]
pub struct PickupSummary {
    pub order_number: String,
    pub customer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_location: Option<String>,
    pub items: Vec<PickupItemSummary>,
}

#[derive(Debug, Serialize)]
pub struct PickupItemSummary {
    pub name: String,
    pub quantity: i64,
}

// =============================================================================
// Service
// =============================================================================

#[derive(Clone)]
pub struct RedemptionService {
    db: Database,
}

impl RedemptionService {
    pub fn new(db: Database) -> Self {
        RedemptionService { db }
    }

    /// Validates a ticket at the event entrance.
    pub async fn redeem_ticket(&self, request: RedeemRequest) -> ApiResult<ValidationResponse> {
        validate_qr_token(&request.qr_code).map_err(CoreError::from)?;

        let outcome = self.db.tickets().redeem(request.qr_code.trim()).await?;
        Ok(ticket_response(outcome))
    }

    /// Validates a shop pickup at the counter.
    pub async fn redeem_pickup(&self, request: RedeemRequest) -> ApiResult<ValidationResponse> {
        validate_qr_token(&request.qr_code).map_err(CoreError::from)?;

        let outcome = self.db.orders().redeem_pickup(request.qr_code.trim()).await?;
        Ok(pickup_response(outcome))
    }
}

fn ticket_response(outcome: RedeemOutcome<TicketRedemption>) -> ValidationResponse {
    match outcome {
        RedeemOutcome::Redeemed(summary) => ValidationResponse {
            valid: true,
            message: "Ticket validated successfully".to_string(),
            reason: None,
            used_at: Some(summary.used_at),
            current_status: None,
            ticket: Some(TicketSummary {
                event: summary.event_title,
                ticket_type: summary.ticket_type_name,
                attendee: summary.attendee,
            }),
            order: None,
        },
        other => rejection(other, "Ticket"),
    }
}

fn pickup_response(outcome: RedeemOutcome<PickupRedemption>) -> ValidationResponse {
    match outcome {
        RedeemOutcome::Redeemed(summary) => ValidationResponse {
            valid: true,
            message: "Order pickup confirmed".to_string(),
            reason: None,
            used_at: Some(summary.picked_up_at),
            current_status: None,
            ticket: None,
            order: Some(PickupSummary {
                order_number: summary.order_number,
                customer: summary.customer,
                pickup_location: summary.pickup_location,
                items: summary
                    .items
                    .into_iter()
                    .map(|item| PickupItemSummary {
                        name: item.name,
                        quantity: item.quantity,
                    })
                    .collect(),
            }),
        },
        other => rejection(other, "Order"),
    }
}

/// Maps a rejected scan to its wire shape. `subject` is "Ticket" or
/// "Order" for the operator message.
fn rejection<T>(outcome: RedeemOutcome<T>, subject: &str) -> ValidationResponse {
    let (message, reason, used_at, current_status) = match outcome {
        RedeemOutcome::NotFound => (format!("{subject} not found"), "not_found", None, None),
        RedeemOutcome::AlreadyUsed { used_at } => (
            format!("{subject} already used"),
            "already_used",
            used_at,
            None,
        ),
        RedeemOutcome::Cancelled => (
            format!("{subject} has been cancelled"),
            "cancelled",
            None,
            None,
        ),
        RedeemOutcome::NotReady { current } => (
            format!("{subject} is not ready for redemption"),
            "not_ready",
            None,
            Some(current),
        ),
        RedeemOutcome::Redeemed(_) => unreachable!("rejection() is only called on rejections"),
    };

    ValidationResponse {
        valid: false,
        message,
        reason: Some(reason),
        used_at,
        current_status,
        ticket: None,
        order: None,
    }
}
