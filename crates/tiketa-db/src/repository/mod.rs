//! # Repository Module
//!
//! Database repositories, one per aggregate:
//!
//! - [`inventory`] - atomic reserve/release of seats and stock
//! - [`order`] - purchase transactions, guarded transitions, pickup
//!   redemption, pending-order expiry
//! - [`ticket`] - ticket listings and single-use redemption
//! - [`promo`] - promo validation and idempotent application
//! - [`payment`] - payment attempt records per order
//! - [`catalog`] - reference data (events, items, merchants, users)

pub mod catalog;
pub mod inventory;
pub mod order;
pub mod payment;
pub mod promo;
pub mod ticket;

use chrono::{DateTime, Utc};

/// Outcome of presenting a QR token at a checkpoint.
///
/// Rejections are expected results, not errors: the checkpoint operator
/// gets a specific reason for every scan.
#[derive(Debug, Clone)]
pub enum RedeemOutcome<T> {
    /// This scan consumed the token; `T` is the redacted operator summary.
    Redeemed(T),
    /// No ticket or order carries this token.
    NotFound,
    /// The token was consumed earlier.
    AlreadyUsed { used_at: Option<DateTime<Utc>> },
    /// The underlying ticket/order was cancelled.
    Cancelled,
    /// Not yet in a redeemable status (e.g. payment still pending).
    NotReady { current: String },
}
