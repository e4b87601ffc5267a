//! Console notifier for development and testing.
//!
//! Logs what would have been sent instead of dispatching SMS/email, so a
//! dev environment needs no messaging credentials.

use async_trait::async_trait;
use tracing::info;

use super::{Notifier, OrderConfirmation, Recipient};

/// Notifier that writes to the log instead of sending anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub const fn new() -> Self {
        ConsoleNotifier
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn order_confirmed(&self, recipient: &Recipient, confirmation: &OrderConfirmation) {
        info!(
            to_phone = recipient.phone.as_deref().unwrap_or("-"),
            to_email = recipient.email.as_deref().unwrap_or("-"),
            order_number = %confirmation.order_number,
            total_cents = confirmation.total_cents,
            ticket_count = confirmation.ticket_count,
            pickup_location = confirmation.pickup_location.as_deref().unwrap_or("-"),
            "Order confirmation (console notifier)"
        );
    }

    async fn order_cancelled(&self, recipient: &Recipient, order_number: &str) {
        info!(
            to_phone = recipient.phone.as_deref().unwrap_or("-"),
            order_number = %order_number,
            "Order cancellation notice (console notifier)"
        );
    }
}
