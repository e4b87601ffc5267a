//! # Notification Dispatch
//!
//! The SMS/email collaborator consumed by reconciliation. The core only
//! needs "tell the buyer their order is confirmed"; what that means on the
//! wire belongs to the implementation behind the trait.
//!
//! Reconciliation fires a notification exactly once per order - on the
//! delivery that actually performed the PENDING -> PAID transition - and a
//! notification failure never fails the reconciliation itself.

pub mod console;

use async_trait::async_trait;

pub use console::ConsoleNotifier;

/// Who a notification goes to.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Payment-confirmation details for the buyer.
#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub total_cents: i64,
    /// Number of tickets, for ticket orders.
    pub ticket_count: usize,
    /// Pickup location name, for shop orders.
    pub pickup_location: Option<String>,
}

/// Outbound notification channel (SMS / email / both).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifies the buyer that payment was confirmed.
    async fn order_confirmed(&self, recipient: &Recipient, confirmation: &OrderConfirmation);

    /// Notifies the buyer that their pending order was cancelled
    /// (failed payment or checkout abandoned past the TTL).
    async fn order_cancelled(&self, recipient: &Recipient, order_number: &str);
}
