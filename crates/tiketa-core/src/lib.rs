//! # tiketa-core: Pure Business Logic
//!
//! This crate is the heart of the tiketa commerce engine. It contains all
//! business rules as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! HTTP handlers (apps/api)
//!        |
//! service layer: purchase / reconciliation / redemption
//!        |
//! * tiketa-core (THIS CRATE) *
//!   types . money . state . promo . validation . ids
//!   NO I/O - NO DATABASE - NO NETWORK - PURE FUNCTIONS
//!        |
//! tiketa-db (SQLite queries, migrations, repositories)
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Order, Ticket, TicketType, PromoCode, ...)
//! - [`money`] - Integer-cent money arithmetic (no floating point)
//! - [`state`] - Status transition tables, the single transition choke point
//! - [`promo`] - Promo code evaluation and discount math
//! - [`validation`] - Request-shape checks
//! - [`ids`] - Order numbers, QR tokens, entity ids
//! - [`error`] - Domain error taxonomy

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ids;
pub mod money;
pub mod promo;
pub mod state;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, PromoDenied, ValidationError};
pub use money::{FeeRate, Money};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Service fee on ticket orders, in basis points (5%).
///
/// Shop orders currently carry no fee; both are configurable at the app
/// layer and these are the defaults.
pub const DEFAULT_TICKET_FEE_BPS: u32 = 500;

/// Service fee on shop orders, in basis points.
pub const DEFAULT_SHOP_FEE_BPS: u32 = 0;

/// Maximum distinct lines in a single purchase request.
pub const MAX_ORDER_LINES: usize = 50;

/// Maximum quantity of a single line. Per-ticket-type caps
/// (`max_per_order`) are usually far lower; this bounds shop items and
/// guards against fat-fingered input.
pub const MAX_LINE_QUANTITY: i64 = 999;

/// Tolerance when matching a callback amount against the order total, in
/// cents. Providers report two-decimal amounts; anything further off is an
/// [`CoreError::AmountMismatch`].
pub const AMOUNT_TOLERANCE_CENTS: i64 = 1;
