//! # Domain Types
//!
//! Core domain types for the tiketa commerce engine.
//!
//! ## Type Hierarchy
//! ```text
//! Reference data          Transactional aggregates        Join / ledger rows
//! --------------          ------------------------        ------------------
//! Event                   Order  (root of a purchase)     OrderItem (snapshot)
//! TicketType              Ticket (one per seat)           PromoUsage
//! ShopItem                Payment (one per order)
//! Merchant                PromoCode (mutable used_count)
//! PickupLocation
//! User
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - a business key where one exists (`order_number`, `qr_code`, `code`)
//!
//! All monetary fields are integer cents; `Money` accessors are provided on
//! each struct. Statuses are closed enums - the legal transitions live in
//! [`crate::state`], and nothing else in the system compares status strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Event
// =============================================================================

/// Lifecycle of an event. Only `Published` events sell tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
}

/// An event with sellable ticket types. Reference data for the purchase path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Event {
    pub id: String,
    pub title: String,
    pub venue: String,
    pub starts_at: DateTime<Utc>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// An event sells tickets only while published and not yet started.
    pub fn is_purchasable(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Published && self.starts_at > now
    }
}

// =============================================================================
// Ticket Type
// =============================================================================

/// A sellable admission class of one event.
///
/// `sold` only moves through the reservation statement (atomic
/// check-and-increment) and the release path; `0 <= sold <= quantity` holds
/// at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct TicketType {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub price_cents: i64,
    pub quantity: i64,
    pub sold: i64,
    pub max_per_order: i64,
    pub is_active: bool,
}

impl TicketType {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Units still available for reservation.
    #[inline]
    pub fn available(&self) -> i64 {
        self.quantity - self.sold
    }
}

// =============================================================================
// Merchant / Pickup Location
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerchantStatus {
    Pending,
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Merchant {
    pub id: String,
    pub business_name: String,
    pub trade_name: Option<String>,
    pub status: MerchantStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PickupLocation {
    pub id: String,
    pub name: String,
    pub area: Option<String>,
    pub is_active: bool,
}

// =============================================================================
// Shop Item
// =============================================================================

/// A venue-shop good (drink, snack, merch).
///
/// `stock_quantity` is optional: `None` means the item is not counted and
/// sells while `in_stock` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ShopItem {
    pub id: String,
    pub merchant_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub in_stock: bool,
    pub stock_quantity: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShopItem {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Order
// =============================================================================

/// Order lifecycle. Transitions are validated by [`crate::state`]; rows are
/// never deleted, terminal states end the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    ReadyForPickup,
    Completed,
    Cancelled,
    Refunded,
}

/// The root aggregate of a purchase (ticket or shop).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    /// Human-readable business key, `TK...` for ticket orders, `PS...` for
    /// shop orders.
    pub order_number: String,
    pub user_id: String,
    pub merchant_id: Option<String>,
    pub pickup_location_id: Option<String>,
    pub subtotal_cents: i64,
    pub service_fee_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub payment_method: Option<PaymentMethod>,
    /// External transaction id, set exactly once at confirmation.
    pub payment_ref: Option<String>,
    /// Pickup QR token; present only for shop orders.
    pub qr_code: Option<String>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }

    #[inline]
    pub fn service_fee(&self) -> Money {
        Money::from_cents(self.service_fee_cents)
    }

    #[inline]
    pub fn discount(&self) -> Money {
        Money::from_cents(self.discount_cents)
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A shop order line. Item name and unit price are frozen at purchase time
/// so later catalog edits never change settled orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub shop_item_id: String,
    pub name_snapshot: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub line_total_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

// =============================================================================
// Ticket
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Valid,
    Used,
    Cancelled,
    Expired,
}

/// One admission per purchased seat. Created `Valid` inside the purchase
/// transaction; consumed exactly once at the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Ticket {
    pub id: String,
    pub order_id: Option<String>,
    pub user_id: String,
    pub event_id: String,
    pub ticket_type_id: String,
    /// Unique, immutable scan token (`TK-` prefix).
    pub qr_code: String,
    pub status: TicketStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Payment
// =============================================================================

/// The external rail an order is paid through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Chapa,
    Telebirr,
    CbeBirr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One payment attempt record per order. `provider_ref` is the reference the
/// rail echoes back in its asynchronous notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub provider_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Promo Code
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// `discount_value` is basis points (2000 = 20%).
    Percentage,
    /// `discount_value` is cents.
    Fixed,
}

/// A promotional discount code.
///
/// `used_count` is monotonic and only moves through the guarded apply
/// statement. `code` is stored upper-cased; lookups normalize first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PromoCode {
    pub id: String,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_purchase_cents: i64,
    pub max_discount_cents: Option<i64>,
    pub max_uses: Option<i64>,
    pub max_uses_per_user: i64,
    pub used_count: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only record binding one promo application to one order and user.
/// Unique on `(promo_code_id, order_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PromoUsage {
    pub id: String,
    pub promo_code_id: String,
    pub order_id: String,
    pub user_id: String,
    pub discount_cents: i64,
    pub used_at: DateTime<Utc>,
}

// =============================================================================
// User
// =============================================================================

/// Buyer identity as resolved by the upstream auth layer. Consumed for
/// confirmations and redemption summaries; never written by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Display handle for checkpoint operators: name, falling back to phone.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.phone.clone())
            .unwrap_or_else(|| self.id.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
