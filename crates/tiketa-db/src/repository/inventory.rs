//! # Inventory Ledger
//!
//! Atomic reserve/release of finite inventory: ticket-type seats and shop
//! item stock.
//!
//! ## Why a Conditional UPDATE
//! ```text
//! Two buyers, one seat left (quantity=10, sold=9):
//!
//!   read-then-write (WRONG)              check-and-increment (THIS MODULE)
//!   ---------------------                -----------------------------
//!   A: SELECT sold -> 9                  A: UPDATE ... SET sold = sold + 1
//!   B: SELECT sold -> 9                         WHERE sold + 1 <= quantity
//!   A: UPDATE sold = 10                     -> 1 row, reserved
//!   B: UPDATE sold = 10   OVERSELL!      B: same statement -> 0 rows,
//!                                           InsufficientInventory
//! ```
//!
//! The check and the increment are one statement against the store, so the
//! invariant `0 <= sold <= quantity` holds under any interleaving and any
//! number of service instances. Eligibility (active, published, future
//! event, live merchant) is checked first from the same row so failures are
//! specific, but availability is only ever decided by the guarded UPDATE.
//!
//! All functions take `&mut SqliteConnection` so callers compose them into
//! a single transaction: the whole line set of an order reserves or none of
//! it does.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use tiketa_core::{CoreError, EventStatus, MerchantStatus, Money};

use crate::error::{DbError, DbResult};

/// Outcome of a successful ticket reservation: the price snapshot taken at
/// reservation time. Later price edits never affect this order.
#[derive(Debug, Clone)]
pub struct ReservedTickets {
    pub ticket_type_id: String,
    pub event_id: String,
    pub ticket_type_name: String,
    pub event_title: String,
    pub unit_price: Money,
    pub quantity: i64,
}

/// Outcome of a successful shop stock reservation.
#[derive(Debug, Clone)]
pub struct ReservedStock {
    pub shop_item_id: String,
    pub merchant_id: Option<String>,
    pub item_name: String,
    pub unit_price: Money,
    pub quantity: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TicketTypeRow {
    id: String,
    event_id: String,
    name: String,
    price_cents: i64,
    max_per_order: i64,
    is_active: bool,
    event_status: EventStatus,
    event_title: String,
    event_starts_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ShopItemRow {
    id: String,
    merchant_id: Option<String>,
    name: String,
    price_cents: i64,
    in_stock: bool,
    stock_quantity: Option<i64>,
    merchant_status: Option<MerchantStatus>,
}

/// Reserves `quantity` seats of a ticket type.
///
/// Eligibility errors (`NotAvailable`, `LimitExceeded`) are raised before
/// touching the counter; `InsufficientInventory` is decided solely by the
/// guarded increment.
pub async fn reserve_tickets(
    conn: &mut SqliteConnection,
    ticket_type_id: &str,
    quantity: i64,
    now: DateTime<Utc>,
) -> DbResult<ReservedTickets> {
    let row = sqlx::query_as::<_, TicketTypeRow>(
        r#"
        SELECT
            tt.id,
            tt.event_id,
            tt.name,
            tt.price_cents,
            tt.max_per_order,
            tt.is_active,
            e.status AS event_status,
            e.title AS event_title,
            e.starts_at AS event_starts_at
        FROM ticket_types tt
        INNER JOIN events e ON e.id = tt.event_id
        WHERE tt.id = ?1
        "#,
    )
    .bind(ticket_type_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("TicketType", ticket_type_id))?;

    if !row.is_active {
        return Err(CoreError::NotAvailable {
            name: row.name,
            reason: "ticket type is not on sale".to_string(),
        }
        .into());
    }
    if row.event_status != EventStatus::Published {
        return Err(CoreError::NotAvailable {
            name: row.event_title,
            reason: "event is not published".to_string(),
        }
        .into());
    }
    if row.event_starts_at <= now {
        return Err(CoreError::NotAvailable {
            name: row.event_title,
            reason: "event has already started".to_string(),
        }
        .into());
    }
    if quantity > row.max_per_order {
        return Err(CoreError::LimitExceeded {
            name: row.name,
            max: row.max_per_order,
            requested: quantity,
        }
        .into());
    }

    // The atomic check-and-increment. Zero rows affected means another
    // buyer got there first.
    let result = sqlx::query(
        r#"
        UPDATE ticket_types
        SET sold = sold + ?1
        WHERE id = ?2 AND sold + ?1 <= quantity
        "#,
    )
    .bind(quantity)
    .bind(ticket_type_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let available: i64 = sqlx::query_scalar(
            "SELECT quantity - sold FROM ticket_types WHERE id = ?1",
        )
        .bind(ticket_type_id)
        .fetch_one(&mut *conn)
        .await?;

        return Err(CoreError::InsufficientInventory {
            name: row.name,
            available,
            requested: quantity,
        }
        .into());
    }

    debug!(ticket_type_id = %ticket_type_id, quantity, "Reserved tickets");

    Ok(ReservedTickets {
        ticket_type_id: row.id,
        event_id: row.event_id,
        ticket_type_name: row.name,
        event_title: row.event_title,
        unit_price: Money::from_cents(row.price_cents),
        quantity,
    })
}

/// Returns previously reserved seats to the pool (failed or expired
/// payment).
pub async fn release_tickets(
    conn: &mut SqliteConnection,
    ticket_type_id: &str,
    quantity: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE ticket_types
        SET sold = sold - ?1
        WHERE id = ?2 AND sold >= ?1
        "#,
    )
    .bind(quantity)
    .bind(ticket_type_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        // Releasing more than was ever sold points at a bookkeeping bug;
        // the guard keeps `sold` non-negative either way.
        warn!(ticket_type_id = %ticket_type_id, quantity, "Release skipped: sold counter below release quantity");
    } else {
        debug!(ticket_type_id = %ticket_type_id, quantity, "Released tickets");
    }

    Ok(())
}

/// Reserves `quantity` units of a shop item.
///
/// Uncounted items (`stock_quantity IS NULL`) sell while `in_stock` is set;
/// counted items additionally take the guarded decrement.
pub async fn reserve_stock(
    conn: &mut SqliteConnection,
    shop_item_id: &str,
    quantity: i64,
) -> DbResult<ReservedStock> {
    let row = sqlx::query_as::<_, ShopItemRow>(
        r#"
        SELECT
            si.id,
            si.merchant_id,
            si.name,
            si.price_cents,
            si.in_stock,
            si.stock_quantity,
            m.status AS merchant_status
        FROM shop_items si
        LEFT JOIN merchants m ON m.id = si.merchant_id
        WHERE si.id = ?1
        "#,
    )
    .bind(shop_item_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("ShopItem", shop_item_id))?;

    if !row.in_stock {
        return Err(CoreError::NotAvailable {
            name: row.name,
            reason: "out of stock".to_string(),
        }
        .into());
    }
    // Items from a non-active merchant are not purchasable.
    if let Some(status) = row.merchant_status {
        if status != MerchantStatus::Active {
            return Err(CoreError::NotAvailable {
                name: row.name,
                reason: "merchant is not active".to_string(),
            }
            .into());
        }
    }

    if row.stock_quantity.is_some() {
        let result = sqlx::query(
            r#"
            UPDATE shop_items
            SET stock_quantity = stock_quantity - ?1
            WHERE id = ?2 AND stock_quantity >= ?1
            "#,
        )
        .bind(quantity)
        .bind(shop_item_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let available: i64 = sqlx::query_scalar(
                "SELECT COALESCE(stock_quantity, 0) FROM shop_items WHERE id = ?1",
            )
            .bind(shop_item_id)
            .fetch_one(&mut *conn)
            .await?;

            return Err(CoreError::InsufficientInventory {
                name: row.name,
                available,
                requested: quantity,
            }
            .into());
        }
    }

    debug!(shop_item_id = %shop_item_id, quantity, "Reserved stock");

    Ok(ReservedStock {
        shop_item_id: row.id,
        merchant_id: row.merchant_id,
        item_name: row.name,
        unit_price: Money::from_cents(row.price_cents),
        quantity,
    })
}

/// Returns previously reserved stock. No-op for uncounted items.
pub async fn release_stock(
    conn: &mut SqliteConnection,
    shop_item_id: &str,
    quantity: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE shop_items
        SET stock_quantity = stock_quantity + ?1
        WHERE id = ?2 AND stock_quantity IS NOT NULL
        "#,
    )
    .bind(quantity)
    .bind(shop_item_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        debug!(shop_item_id = %shop_item_id, quantity, "Released stock");
    }

    Ok(())
}
