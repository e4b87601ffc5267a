//! # Order Repository
//!
//! The transactional purchase flows and every guarded order transition.
//!
//! ## Order Lifecycle
//! ```text
//! 1. CREATE (purchase endpoint)
//!    create_ticket_order() / create_shop_order()
//!      one transaction: reserve inventory -> apply promo -> insert order
//!      + tickets/items. Any line failing rolls the whole set back.
//!
//! 2. CONFIRM (reconciliation, exactly once)
//!    mark_paid()          PENDING -> PAID        conditional UPDATE
//!    cancel_pending()     PENDING -> CANCELLED   + inventory release
//!
//! 3. FULFILL
//!    mark_ready_for_pickup()  PAID -> READY_FOR_PICKUP
//!    redeem_pickup()          PAID/READY_FOR_PICKUP -> COMPLETED
//!                             test-and-set on the QR token
//!
//! 4. REAP
//!    expire_stale_pending()   abandoned checkouts past the TTL
//! ```
//!
//! Transitions are single conditional UPDATE statements; `rows_affected`
//! tells the caller whether this invocation performed the transition or
//! lost the race, which is what makes reconciliation and redemption
//! idempotent under duplicate delivery.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use tiketa_core::ids::{self, OrderKind};
use tiketa_core::money::FeeRate;
use tiketa_core::promo::Discount;
use tiketa_core::validation::{validate_line_count, validate_quantity};
use tiketa_core::{
    CoreError, Money, Order, OrderItem, OrderStatus, PaymentMethod, Ticket, TicketStatus,
};

use crate::error::{DbError, DbResult};
use crate::repository::inventory;
use crate::repository::promo as promo_repo;
use crate::repository::RedeemOutcome;

// =============================================================================
// Request / Result Types
// =============================================================================

/// One requested ticket line.
#[derive(Debug, Clone)]
pub struct TicketLine {
    pub ticket_type_id: String,
    pub quantity: i64,
}

/// A ticket purchase request, validated and executed as one transaction.
#[derive(Debug, Clone)]
pub struct NewTicketOrder {
    pub user_id: String,
    pub event_id: String,
    pub lines: Vec<TicketLine>,
    pub promo_code: Option<String>,
    pub service_fee: FeeRate,
}

/// One requested shop line.
#[derive(Debug, Clone)]
pub struct ShopLine {
    pub shop_item_id: String,
    pub quantity: i64,
}

/// A shop order request.
#[derive(Debug, Clone)]
pub struct NewShopOrder {
    pub user_id: String,
    pub pickup_location_id: String,
    pub lines: Vec<ShopLine>,
    pub promo_code: Option<String>,
    pub service_fee: FeeRate,
}

/// Result of a ticket purchase: the pending order and its VALID tickets.
#[derive(Debug, Clone)]
pub struct TicketPurchase {
    pub order: Order,
    pub tickets: Vec<Ticket>,
}

/// Result of a shop order: the pending order and its snapshot lines.
#[derive(Debug, Clone)]
pub struct ShopPurchase {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Whether a conditional transition ran in this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// This statement performed the transition.
    Applied,
    /// The row was not in the source status; `current` is what it held
    /// instead. Callers decide whether that is an idempotent duplicate or
    /// an illegal transition.
    Skipped { current: OrderStatus },
}

/// Redacted pickup summary shown to the checkpoint operator.
#[derive(Debug, Clone)]
pub struct PickupRedemption {
    pub order_number: String,
    pub customer: String,
    pub pickup_location: Option<String>,
    pub items: Vec<PickupItem>,
    pub picked_up_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PickupItem {
    pub name: String,
    pub quantity: i64,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Purchase
    // -------------------------------------------------------------------------

    /// Creates a ticket order: reserves every line, applies the promo,
    /// computes totals and creates the order plus one VALID ticket per
    /// seat - all in one transaction. Nothing partial is ever visible.
    pub async fn create_ticket_order(&self, req: NewTicketOrder) -> DbResult<TicketPurchase> {
        validate_line_count(req.lines.len()).map_err(CoreError::from)?;
        for line in &req.lines {
            validate_quantity(line.quantity).map_err(CoreError::from)?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Reserve every line; the first failure rolls everything back.
        let mut reserved = Vec::with_capacity(req.lines.len());
        let mut subtotal = Money::zero();
        for line in &req.lines {
            let r =
                inventory::reserve_tickets(&mut tx, &line.ticket_type_id, line.quantity, now)
                    .await?;
            if r.event_id != req.event_id {
                return Err(CoreError::NotAvailable {
                    name: r.ticket_type_name,
                    reason: "ticket type does not belong to this event".to_string(),
                }
                .into());
            }
            subtotal += r.unit_price.multiply_quantity(r.quantity);
            reserved.push(r);
        }

        // Promo is validated against the running subtotal; the usage row is
        // written once the order id exists.
        let promo = match req.promo_code.as_deref() {
            Some(code) => Some(
                promo_repo::validate_on(
                    &mut tx,
                    code,
                    &req.user_id,
                    Some(&req.event_id),
                    subtotal,
                    now,
                )
                .await?,
            ),
            None => None,
        };
        let discount = promo.as_ref().map(|(_, d)| *d).unwrap_or(Discount {
            discount: Money::zero(),
            new_total: subtotal,
        });

        let service_fee = subtotal.apply_rate(req.service_fee);
        let total = subtotal - discount.discount + service_fee;

        let order = Order {
            id: ids::new_id(),
            order_number: ids::order_number(OrderKind::Ticket),
            user_id: req.user_id.clone(),
            merchant_id: None,
            pickup_location_id: None,
            subtotal_cents: subtotal.cents(),
            service_fee_cents: service_fee.cents(),
            discount_cents: discount.discount.cents(),
            total_cents: total.cents(),
            status: OrderStatus::Pending,
            payment_method: None,
            payment_ref: None,
            qr_code: None,
            picked_up_at: None,
            created_at: now,
            updated_at: now,
        };
        insert_order(&mut tx, &order).await?;

        if let Some((code, d)) = &promo {
            promo_repo::apply_usage_on(
                &mut tx,
                &code.id,
                &order.id,
                &req.user_id,
                d.discount,
                now,
            )
            .await?;
        }

        // One ticket per seat, created VALID alongside the sold increment.
        // Payment confirmation never creates tickets, it unlocks them
        // through the order status.
        let mut tickets = Vec::new();
        for r in &reserved {
            for _ in 0..r.quantity {
                let ticket = Ticket {
                    id: ids::new_id(),
                    order_id: Some(order.id.clone()),
                    user_id: req.user_id.clone(),
                    event_id: r.event_id.clone(),
                    ticket_type_id: r.ticket_type_id.clone(),
                    qr_code: ids::qr_token(OrderKind::Ticket),
                    status: TicketStatus::Valid,
                    used_at: None,
                    created_at: now,
                };
                insert_ticket(&mut tx, &ticket).await?;
                tickets.push(ticket);
            }
        }

        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            tickets = tickets.len(),
            total_cents = order.total_cents,
            "Ticket order created"
        );

        Ok(TicketPurchase { order, tickets })
    }

    /// Creates a shop order with snapshot line items and a pickup QR code.
    ///
    /// Carts spanning more than one merchant are rejected: settlement is
    /// per-merchant. House items (no merchant) may mix with one merchant's
    /// goods.
    pub async fn create_shop_order(&self, req: NewShopOrder) -> DbResult<ShopPurchase> {
        validate_line_count(req.lines.len()).map_err(CoreError::from)?;
        for line in &req.lines {
            validate_quantity(line.quantity).map_err(CoreError::from)?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let location_active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM pickup_locations WHERE id = ?1")
                .bind(&req.pickup_location_id)
                .fetch_optional(&mut *tx)
                .await?;
        if !location_active.unwrap_or(false) {
            return Err(DbError::not_found("PickupLocation", &req.pickup_location_id));
        }

        let mut reserved = Vec::with_capacity(req.lines.len());
        let mut subtotal = Money::zero();
        let mut merchant_id: Option<String> = None;
        for line in &req.lines {
            let r = inventory::reserve_stock(&mut tx, &line.shop_item_id, line.quantity).await?;
            if let Some(m) = &r.merchant_id {
                match &merchant_id {
                    None => merchant_id = Some(m.clone()),
                    Some(existing) if existing != m => {
                        return Err(CoreError::MixedMerchantCart.into());
                    }
                    Some(_) => {}
                }
            }
            subtotal += r.unit_price.multiply_quantity(r.quantity);
            reserved.push(r);
        }

        let promo = match req.promo_code.as_deref() {
            Some(code) => Some(
                promo_repo::validate_on(&mut tx, code, &req.user_id, None, subtotal, now).await?,
            ),
            None => None,
        };
        let discount = promo.as_ref().map(|(_, d)| *d).unwrap_or(Discount {
            discount: Money::zero(),
            new_total: subtotal,
        });

        let service_fee = subtotal.apply_rate(req.service_fee);
        let total = subtotal - discount.discount + service_fee;

        let order = Order {
            id: ids::new_id(),
            order_number: ids::order_number(OrderKind::Shop),
            user_id: req.user_id.clone(),
            merchant_id,
            pickup_location_id: Some(req.pickup_location_id.clone()),
            subtotal_cents: subtotal.cents(),
            service_fee_cents: service_fee.cents(),
            discount_cents: discount.discount.cents(),
            total_cents: total.cents(),
            status: OrderStatus::Pending,
            payment_method: None,
            payment_ref: None,
            qr_code: Some(ids::qr_token(OrderKind::Shop)),
            picked_up_at: None,
            created_at: now,
            updated_at: now,
        };
        insert_order(&mut tx, &order).await?;

        if let Some((code, d)) = &promo {
            promo_repo::apply_usage_on(
                &mut tx,
                &code.id,
                &order.id,
                &req.user_id,
                d.discount,
                now,
            )
            .await?;
        }

        let mut items = Vec::new();
        for r in &reserved {
            let item = OrderItem {
                id: ids::new_id(),
                order_id: order.id.clone(),
                shop_item_id: r.shop_item_id.clone(),
                name_snapshot: r.item_name.clone(),
                unit_price_cents: r.unit_price.cents(),
                quantity: r.quantity,
                line_total_cents: r.unit_price.multiply_quantity(r.quantity).cents(),
                created_at: now,
            };
            insert_order_item(&mut tx, &item).await?;
            items.push(item);
        }

        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            items = items.len(),
            total_cents = order.total_cents,
            "Shop order created"
        );

        Ok(ShopPurchase { order, items })
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Gets an order by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&select_orders("WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Gets an order by its human-readable order number.
    pub async fn get_by_order_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&select_orders("WHERE order_number = ?1"))
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Lists a user's orders, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&select_orders(
            "WHERE user_id = ?1 ORDER BY created_at DESC",
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    /// Gets the snapshot line items of an order.
    pub async fn items_for_order(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT id, order_id, shop_item_id, name_snapshot, unit_price_cents,
                   quantity, line_total_cents, created_at
            FROM order_items
            WHERE order_id = ?1
            ORDER BY created_at
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    // -------------------------------------------------------------------------
    // Guarded Transitions
    // -------------------------------------------------------------------------

    /// PENDING -> PAID, stamping the payment method and external reference
    /// exactly once. Only reconciliation calls this.
    pub async fn mark_paid(
        &self,
        order_id: &str,
        method: PaymentMethod,
        payment_ref: &str,
    ) -> DbResult<Transition> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'PAID', payment_method = ?1, payment_ref = ?2, updated_at = ?3
            WHERE id = ?4 AND status = 'PENDING'
            "#,
        )
        .bind(method)
        .bind(payment_ref)
        .bind(now)
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(order_id = %order_id, payment_ref = %payment_ref, "Order marked paid");
            return Ok(Transition::Applied);
        }
        self.skipped(order_id).await
    }

    /// PENDING -> CANCELLED with inventory release: returns the reserved
    /// seats/stock to the pool and cancels the order's tickets, all in one
    /// transaction. Safe to call on a lost race - it reports `Skipped`.
    pub async fn cancel_pending(&self, order_id: &str) -> DbResult<Transition> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE orders SET status = 'CANCELLED', updated_at = ?1 WHERE id = ?2 AND status = 'PENDING'",
        )
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return self.skipped(order_id).await;
        }

        release_order_inventory(&mut tx, order_id).await?;
        tx.commit().await?;

        info!(order_id = %order_id, "Pending order cancelled, inventory released");
        Ok(Transition::Applied)
    }

    /// PAID -> READY_FOR_PICKUP (merchant-operator flow on shop orders).
    pub async fn mark_ready_for_pickup(&self, order_id: &str) -> DbResult<Transition> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE orders SET status = 'READY_FOR_PICKUP', updated_at = ?1 WHERE id = ?2 AND status = 'PAID'",
        )
        .bind(now)
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(order_id = %order_id, "Order ready for pickup");
            return Ok(Transition::Applied);
        }
        self.skipped(order_id).await
    }

    /// PAID -> REFUNDED (support flow; the money movement happens with the
    /// provider out of band).
    pub async fn mark_refunded(&self, order_id: &str) -> DbResult<Transition> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE orders SET status = 'REFUNDED', updated_at = ?1 WHERE id = ?2 AND status = 'PAID'",
        )
        .bind(now)
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            info!(order_id = %order_id, "Order refunded");
            return Ok(Transition::Applied);
        }
        self.skipped(order_id).await
    }

    // -------------------------------------------------------------------------
    // Pickup Redemption
    // -------------------------------------------------------------------------

    /// Redeems a shop pickup QR token: PAID/READY_FOR_PICKUP -> COMPLETED,
    /// stamping `picked_up_at` in the same statement that checks the
    /// current status. Two simultaneous scans cannot both succeed.
    pub async fn redeem_pickup(
        &self,
        qr_token: &str,
    ) -> DbResult<RedeemOutcome<PickupRedemption>> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'COMPLETED', picked_up_at = ?1, updated_at = ?1
            WHERE qr_code = ?2 AND status IN ('PAID', 'READY_FOR_PICKUP')
            "#,
        )
        .bind(now)
        .bind(qr_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Lost or never eligible: classify from the current row.
            let current = sqlx::query_as::<_, Order>(&select_orders("WHERE qr_code = ?1"))
                .bind(qr_token)
                .fetch_optional(&self.pool)
                .await?;

            return Ok(match current {
                None => RedeemOutcome::NotFound,
                Some(o) if o.status == OrderStatus::Completed => RedeemOutcome::AlreadyUsed {
                    used_at: o.picked_up_at,
                },
                Some(o) if o.status == OrderStatus::Cancelled => RedeemOutcome::Cancelled,
                Some(o) => RedeemOutcome::NotReady {
                    current: format!("{:?}", o.status),
                },
            });
        }

        // This scan won; assemble the operator summary.
        let order = sqlx::query_as::<_, Order>(&select_orders("WHERE qr_code = ?1"))
            .bind(qr_token)
            .fetch_one(&self.pool)
            .await?;

        let items = sqlx::query_as::<_, PickupItem>(
            r#"
            SELECT name_snapshot AS name, quantity
            FROM order_items
            WHERE order_id = ?1
            ORDER BY created_at
            "#,
        )
        .bind(&order.id)
        .fetch_all(&self.pool)
        .await?;

        let customer: Option<String> = sqlx::query_scalar(
            "SELECT COALESCE(name, phone, id) FROM users WHERE id = ?1",
        )
        .bind(&order.user_id)
        .fetch_optional(&self.pool)
        .await?;

        let pickup_location: Option<String> = match &order.pickup_location_id {
            Some(id) => {
                sqlx::query_scalar("SELECT name FROM pickup_locations WHERE id = ?1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };

        info!(order_number = %order.order_number, "Pickup confirmed");

        Ok(RedeemOutcome::Redeemed(PickupRedemption {
            order_number: order.order_number,
            customer: customer.unwrap_or_else(|| order.user_id.clone()),
            pickup_location,
            items,
            picked_up_at: now,
        }))
    }

    // -------------------------------------------------------------------------
    // Pending-Order Expiry
    // -------------------------------------------------------------------------

    /// Cancels Pending orders created before `cutoff` and releases their
    /// inventory. Returns how many orders this pass reaped.
    pub async fn expire_stale_pending(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let stale: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM orders WHERE status = 'PENDING' AND created_at < ?1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut reaped = 0u64;
        for order_id in stale {
            // A callback may confirm the order between the select and the
            // cancel; the conditional transition makes that race harmless.
            match self.cancel_pending(&order_id).await? {
                Transition::Applied => reaped += 1,
                Transition::Skipped { current } => {
                    debug!(order_id = %order_id, ?current, "Stale order already settled");
                }
            }
        }

        if reaped > 0 {
            info!(reaped, "Expired stale pending orders");
        }
        Ok(reaped)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Builds the `Skipped` outcome for a conditional update that affected
    /// no rows.
    async fn skipped(&self, order_id: &str) -> DbResult<Transition> {
        let current: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = ?1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            Some(status) => Ok(Transition::Skipped { current: status }),
            None => Err(CoreError::OrderNotFound(order_id.to_string()).into()),
        }
    }
}

// =============================================================================
// Transaction-Scoped Helpers
// =============================================================================

fn select_orders(clause: &str) -> String {
    format!(
        r#"
        SELECT id, order_number, user_id, merchant_id, pickup_location_id,
               subtotal_cents, service_fee_cents, discount_cents, total_cents,
               status, payment_method, payment_ref, qr_code, picked_up_at,
               created_at, updated_at
        FROM orders
        {clause}
        "#
    )
}

async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, order_number, user_id, merchant_id, pickup_location_id,
            subtotal_cents, service_fee_cents, discount_cents, total_cents,
            status, payment_method, payment_ref, qr_code, picked_up_at,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        "#,
    )
    .bind(&order.id)
    .bind(&order.order_number)
    .bind(&order.user_id)
    .bind(&order.merchant_id)
    .bind(&order.pickup_location_id)
    .bind(order.subtotal_cents)
    .bind(order.service_fee_cents)
    .bind(order.discount_cents)
    .bind(order.total_cents)
    .bind(order.status)
    .bind(order.payment_method)
    .bind(&order.payment_ref)
    .bind(&order.qr_code)
    .bind(order.picked_up_at)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_ticket(conn: &mut SqliteConnection, ticket: &Ticket) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tickets (
            id, order_id, user_id, event_id, ticket_type_id,
            qr_code, status, used_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&ticket.id)
    .bind(&ticket.order_id)
    .bind(&ticket.user_id)
    .bind(&ticket.event_id)
    .bind(&ticket.ticket_type_id)
    .bind(&ticket.qr_code)
    .bind(ticket.status)
    .bind(ticket.used_at)
    .bind(ticket.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_order_item(conn: &mut SqliteConnection, item: &OrderItem) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_items (
            id, order_id, shop_item_id, name_snapshot,
            unit_price_cents, quantity, line_total_cents, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&item.id)
    .bind(&item.order_id)
    .bind(&item.shop_item_id)
    .bind(&item.name_snapshot)
    .bind(item.unit_price_cents)
    .bind(item.quantity)
    .bind(item.line_total_cents)
    .bind(item.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Returns everything an order holds back to the pool: seat counters for
/// its tickets (which are cancelled) and counted stock for its items.
async fn release_order_inventory(conn: &mut SqliteConnection, order_id: &str) -> DbResult<()> {
    #[derive(sqlx::FromRow)]
    struct HeldSeats {
        ticket_type_id: String,
        held: i64,
    }

    let held = sqlx::query_as::<_, HeldSeats>(
        r#"
        SELECT ticket_type_id, COUNT(*) AS held
        FROM tickets
        WHERE order_id = ?1 AND status = 'VALID'
        GROUP BY ticket_type_id
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    for group in &held {
        inventory::release_tickets(conn, &group.ticket_type_id, group.held).await?;
    }

    let cancelled = sqlx::query(
        "UPDATE tickets SET status = 'CANCELLED' WHERE order_id = ?1 AND status = 'VALID'",
    )
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    if cancelled.rows_affected() > 0 {
        debug!(order_id = %order_id, tickets = cancelled.rows_affected(), "Tickets cancelled");
    }

    #[derive(sqlx::FromRow)]
    struct HeldStock {
        shop_item_id: String,
        quantity: i64,
    }

    let stock = sqlx::query_as::<_, HeldStock>(
        "SELECT shop_item_id, quantity FROM order_items WHERE order_id = ?1",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    for line in &stock {
        inventory::release_stock(conn, &line.shop_item_id, line.quantity).await?;
    }

    if held.is_empty() && stock.is_empty() {
        warn!(order_id = %order_id, "Cancelled order held no inventory");
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use chrono::Duration;
    use tiketa_core::{DiscountType, EventStatus, MerchantStatus, PromoCode};

    fn ticket_req(user: &str, event: &str, lines: Vec<(&str, i64)>) -> NewTicketOrder {
        NewTicketOrder {
            user_id: user.to_string(),
            event_id: event.to_string(),
            lines: lines
                .into_iter()
                .map(|(id, quantity)| TicketLine {
                    ticket_type_id: id.to_string(),
                    quantity,
                })
                .collect(),
            promo_code: None,
            service_fee: FeeRate::from_bps(500),
        }
    }

    fn shop_req(user: &str, location: &str, lines: Vec<(&str, i64)>) -> NewShopOrder {
        NewShopOrder {
            user_id: user.to_string(),
            pickup_location_id: location.to_string(),
            lines: lines
                .into_iter()
                .map(|(id, quantity)| ShopLine {
                    shop_item_id: id.to_string(),
                    quantity,
                })
                .collect(),
            promo_code: None,
            service_fee: FeeRate::zero(),
        }
    }

    async fn sold_count(db: &crate::Database, ticket_type_id: &str) -> i64 {
        sqlx::query_scalar("SELECT sold FROM ticket_types WHERE id = ?1")
            .bind(ticket_type_id)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ticket_purchase_happy_path() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_event(&db, "e1", EventStatus::Published, 7).await;
        seed_ticket_type(&db, "vip", "e1", 1000, 2, 2).await;

        let purchase = db
            .orders()
            .create_ticket_order(ticket_req("u1", "e1", vec![("vip", 2)]))
            .await
            .unwrap();

        // subtotal 2000.00, 5% fee 100.00, total 2100.00
        assert_eq!(purchase.order.subtotal_cents, 200_000);
        assert_eq!(purchase.order.service_fee_cents, 10_000);
        assert_eq!(purchase.order.total_cents, 210_000);
        assert_eq!(purchase.order.status, OrderStatus::Pending);
        assert!(purchase.order.order_number.starts_with("TK-"));
        assert!(purchase.order.qr_code.is_none());

        assert_eq!(purchase.tickets.len(), 2);
        for ticket in &purchase.tickets {
            assert_eq!(ticket.status, TicketStatus::Valid);
            assert!(ticket.qr_code.starts_with("TK-"));
        }
        assert_eq!(sold_count(&db, "vip").await, 2);

        // A later buyer finds the allocation gone.
        seed_user(&db, "u2", "Chaltu").await;
        let err = db
            .orders()
            .create_ticket_order(ticket_req("u2", "e1", vec![("vip", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientInventory { available: 0, requested: 1, .. })
        ));
        assert_eq!(sold_count(&db, "vip").await, 2);
    }

    #[tokio::test]
    async fn test_purchase_respects_per_order_cap() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_event(&db, "e1", EventStatus::Published, 7).await;
        seed_ticket_type(&db, "vip", "e1", 1000, 10, 2).await;

        let err = db
            .orders()
            .create_ticket_order(ticket_req("u1", "e1", vec![("vip", 3)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::LimitExceeded { max: 2, requested: 3, .. })
        ));
        assert_eq!(sold_count(&db, "vip").await, 0);
    }

    #[tokio::test]
    async fn test_purchase_rejects_unpublished_and_past_events() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_event(&db, "draft", EventStatus::Draft, 7).await;
        seed_ticket_type(&db, "t-draft", "draft", 100, 10, 5).await;
        seed_event(&db, "past", EventStatus::Published, -1).await;
        seed_ticket_type(&db, "t-past", "past", 100, 10, 5).await;

        for (event, tt) in [("draft", "t-draft"), ("past", "t-past")] {
            let err = db
                .orders()
                .create_ticket_order(ticket_req("u1", event, vec![(tt, 1)]))
                .await
                .unwrap_err();
            assert!(matches!(err, DbError::Domain(CoreError::NotAvailable { .. })));
        }
    }

    #[tokio::test]
    async fn test_failed_line_rolls_back_whole_order() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_event(&db, "e1", EventStatus::Published, 7).await;
        seed_ticket_type(&db, "vip", "e1", 1000, 10, 5).await;
        seed_ticket_type(&db, "ga", "e1", 300, 1, 5).await;

        // Second line exceeds availability; the first line's reservation
        // must not survive.
        let err = db
            .orders()
            .create_ticket_order(ticket_req("u1", "e1", vec![("vip", 2), ("ga", 2)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientInventory { .. })
        ));
        assert_eq!(sold_count(&db, "vip").await, 0);
        assert_eq!(sold_count(&db, "ga").await, 0);

        let orders = db.orders().list_for_user("u1").await.unwrap();
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_buyers_cannot_oversell() {
        let db = test_db().await;
        seed_event(&db, "e1", EventStatus::Published, 7).await;
        seed_ticket_type(&db, "vip", "e1", 1000, 3, 5).await;
        for i in 0..6 {
            seed_user(&db, &format!("u{i}"), "Buyer").await;
        }

        // Six buyers race for three seats.
        let mut handles = Vec::new();
        for i in 0..6 {
            let orders = db.orders();
            handles.push(tokio::spawn(async move {
                orders
                    .create_ticket_order(NewTicketOrder {
                        user_id: format!("u{i}"),
                        event_id: "e1".to_string(),
                        lines: vec![TicketLine {
                            ticket_type_id: "vip".to_string(),
                            quantity: 1,
                        }],
                        promo_code: None,
                        service_fee: FeeRate::from_bps(500),
                    })
                    .await
            }));
        }

        let mut successes = 0;
        let mut sold_out = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(DbError::Domain(CoreError::InsufficientInventory { .. })) => sold_out += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(successes, 3);
        assert_eq!(sold_out, 3);
        assert_eq!(sold_count(&db, "vip").await, 3);
    }

    #[tokio::test]
    async fn test_purchase_with_promo_code() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_event(&db, "e1", EventStatus::Published, 7).await;
        seed_ticket_type(&db, "ga", "e1", 500, 10, 4).await;

        let now = Utc::now();
        let promo = PromoCode {
            id: "p1".to_string(),
            code: "MESKEL20".to_string(),
            description: None,
            discount_type: DiscountType::Percentage,
            discount_value: 2000,
            min_purchase_cents: 0,
            max_discount_cents: Some(10_000),
            max_uses: None,
            max_uses_per_user: 1,
            used_count: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            is_active: true,
            event_id: None,
            created_at: now,
        };
        insert_promo(&db, &promo).await;

        let mut req = ticket_req("u1", "e1", vec![("ga", 2)]);
        req.promo_code = Some("meskel20".to_string());
        let purchase = db.orders().create_ticket_order(req).await.unwrap();

        // subtotal 1000.00, 20% capped at 100.00 off, 5% fee 50.00
        assert_eq!(purchase.order.subtotal_cents, 100_000);
        assert_eq!(purchase.order.discount_cents, 10_000);
        assert_eq!(purchase.order.service_fee_cents, 5_000);
        assert_eq!(purchase.order.total_cents, 95_000);

        let used: i64 = sqlx::query_scalar("SELECT used_count FROM promo_codes WHERE id = 'p1'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(used, 1);

        // Same user, same code again: per-user cap.
        let mut again = ticket_req("u1", "e1", vec![("ga", 1)]);
        again.promo_code = Some("MESKEL20".to_string());
        let err = db.orders().create_ticket_order(again).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::PromoDenied(
                tiketa_core::PromoDenied::UserCapReached
            ))
        ));
        // The rejected order reserved nothing.
        assert_eq!(sold_count(&db, "ga").await, 2);
    }

    #[tokio::test]
    async fn test_shop_order_happy_path() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_location(&db, "loc1").await;
        seed_merchant(&db, "m1", MerchantStatus::Active).await;
        seed_shop_item(&db, "beer", Some("m1"), 80, Some(20)).await;
        seed_shop_item(&db, "cap", None, 250, None).await;

        let purchase = db
            .orders()
            .create_shop_order(shop_req("u1", "loc1", vec![("beer", 3), ("cap", 1)]))
            .await
            .unwrap();

        assert_eq!(purchase.order.subtotal_cents, 3 * 8_000 + 25_000);
        assert_eq!(purchase.order.service_fee_cents, 0);
        assert_eq!(purchase.order.merchant_id.as_deref(), Some("m1"));
        assert!(purchase.order.order_number.starts_with("PS-"));
        assert!(purchase.order.qr_code.as_deref().unwrap().starts_with("PS-"));
        assert_eq!(purchase.items.len(), 2);

        let stock: i64 =
            sqlx::query_scalar("SELECT stock_quantity FROM shop_items WHERE id = 'beer'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(stock, 17);
    }

    #[tokio::test]
    async fn test_shop_order_rejects_mixed_merchants() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_location(&db, "loc1").await;
        seed_merchant(&db, "m1", MerchantStatus::Active).await;
        seed_merchant(&db, "m2", MerchantStatus::Active).await;
        seed_shop_item(&db, "beer", Some("m1"), 80, Some(20)).await;
        seed_shop_item(&db, "wine", Some("m2"), 300, Some(5)).await;

        let err = db
            .orders()
            .create_shop_order(shop_req("u1", "loc1", vec![("beer", 1), ("wine", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::MixedMerchantCart)));

        // Rollback returned the reserved stock.
        let stock: i64 =
            sqlx::query_scalar("SELECT stock_quantity FROM shop_items WHERE id = 'beer'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(stock, 20);
    }

    #[tokio::test]
    async fn test_shop_order_rejects_suspended_merchant() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_location(&db, "loc1").await;
        seed_merchant(&db, "m1", MerchantStatus::Suspended).await;
        seed_shop_item(&db, "beer", Some("m1"), 80, Some(20)).await;

        let err = db
            .orders()
            .create_shop_order(shop_req("u1", "loc1", vec![("beer", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::NotAvailable { .. })));
    }

    #[tokio::test]
    async fn test_mark_paid_is_exactly_once() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_event(&db, "e1", EventStatus::Published, 7).await;
        seed_ticket_type(&db, "vip", "e1", 1000, 5, 5).await;

        let purchase = db
            .orders()
            .create_ticket_order(ticket_req("u1", "e1", vec![("vip", 1)]))
            .await
            .unwrap();

        let first = db
            .orders()
            .mark_paid(&purchase.order.id, PaymentMethod::Chapa, "TX-1")
            .await
            .unwrap();
        assert_eq!(first, Transition::Applied);

        // Duplicate delivery: no second transition, reference untouched.
        let second = db
            .orders()
            .mark_paid(&purchase.order.id, PaymentMethod::Chapa, "TX-2")
            .await
            .unwrap();
        assert_eq!(
            second,
            Transition::Skipped {
                current: OrderStatus::Paid
            }
        );

        let order = db.orders().get_by_id(&purchase.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment_ref.as_deref(), Some("TX-1"));
    }

    #[tokio::test]
    async fn test_cancel_pending_releases_inventory() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_event(&db, "e1", EventStatus::Published, 7).await;
        seed_ticket_type(&db, "vip", "e1", 1000, 2, 2).await;

        let purchase = db
            .orders()
            .create_ticket_order(ticket_req("u1", "e1", vec![("vip", 2)]))
            .await
            .unwrap();
        assert_eq!(sold_count(&db, "vip").await, 2);

        let outcome = db.orders().cancel_pending(&purchase.order.id).await.unwrap();
        assert_eq!(outcome, Transition::Applied);
        assert_eq!(sold_count(&db, "vip").await, 0);

        let order = db.orders().get_by_id(&purchase.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        for ticket in db.tickets().list_for_order(&purchase.order.id).await.unwrap() {
            assert_eq!(ticket.status, TicketStatus::Cancelled);
        }

        // The released units are purchasable again.
        seed_user(&db, "u2", "Chaltu").await;
        assert!(db
            .orders()
            .create_ticket_order(ticket_req("u2", "e1", vec![("vip", 2)]))
            .await
            .is_ok());

        // Cancelling an already-cancelled order does nothing.
        let repeat = db.orders().cancel_pending(&purchase.order.id).await.unwrap();
        assert_eq!(
            repeat,
            Transition::Skipped {
                current: OrderStatus::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn test_pickup_redemption_is_single_use() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_location(&db, "loc1").await;
        seed_shop_item(&db, "beer", None, 80, Some(20)).await;

        let purchase = db
            .orders()
            .create_shop_order(shop_req("u1", "loc1", vec![("beer", 2)]))
            .await
            .unwrap();
        let qr = purchase.order.qr_code.clone().unwrap();

        // Not paid yet: not redeemable.
        match db.orders().redeem_pickup(&qr).await.unwrap() {
            RedeemOutcome::NotReady { current } => assert_eq!(current, "Pending"),
            other => panic!("expected NotReady, got {other:?}"),
        }

        db.orders()
            .mark_paid(&purchase.order.id, PaymentMethod::Telebirr, "TX-9")
            .await
            .unwrap();
        assert_eq!(
            db.orders().mark_ready_for_pickup(&purchase.order.id).await.unwrap(),
            Transition::Applied
        );

        match db.orders().redeem_pickup(&qr).await.unwrap() {
            RedeemOutcome::Redeemed(summary) => {
                assert_eq!(summary.order_number, purchase.order.order_number);
                assert_eq!(summary.customer, "Abebe");
                assert_eq!(summary.items.len(), 1);
                assert_eq!(summary.items[0].quantity, 2);
            }
            other => panic!("expected Redeemed, got {other:?}"),
        }

        let order = db.orders().get_by_id(&purchase.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.picked_up_at.is_some());

        // Re-scan: already picked up.
        match db.orders().redeem_pickup(&qr).await.unwrap() {
            RedeemOutcome::AlreadyUsed { used_at } => assert!(used_at.is_some()),
            other => panic!("expected AlreadyUsed, got {other:?}"),
        }

        // Unknown token.
        assert!(matches!(
            db.orders().redeem_pickup("PS-DOESNOTEXIST00").await.unwrap(),
            RedeemOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn test_expire_stale_pending_reaps_and_releases() {
        let db = test_db().await;
        seed_user(&db, "u1", "Abebe").await;
        seed_event(&db, "e1", EventStatus::Published, 7).await;
        seed_ticket_type(&db, "vip", "e1", 1000, 5, 5).await;

        let stale = db
            .orders()
            .create_ticket_order(ticket_req("u1", "e1", vec![("vip", 2)]))
            .await
            .unwrap();
        let paid = db
            .orders()
            .create_ticket_order(ticket_req("u1", "e1", vec![("vip", 1)]))
            .await
            .unwrap();
        db.orders()
            .mark_paid(&paid.order.id, PaymentMethod::Chapa, "TX-1")
            .await
            .unwrap();

        // Everything is older than a cutoff in the future, but only the
        // pending order is eligible.
        let reaped = db
            .orders()
            .expire_stale_pending(Utc::now() + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(reaped, 1);

        assert_eq!(sold_count(&db, "vip").await, 1);
        let order = db.orders().get_by_id(&stale.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        let untouched = db.orders().get_by_id(&paid.order.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, OrderStatus::Paid);
    }

    async fn insert_promo(db: &crate::Database, promo: &PromoCode) {
        sqlx::query(
            r#"
            INSERT INTO promo_codes (
                id, code, description, discount_type, discount_value,
                min_purchase_cents, max_discount_cents, max_uses,
                max_uses_per_user, used_count, valid_from, valid_until,
                is_active, event_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&promo.id)
        .bind(&promo.code)
        .bind(&promo.description)
        .bind(promo.discount_type)
        .bind(promo.discount_value)
        .bind(promo.min_purchase_cents)
        .bind(promo.max_discount_cents)
        .bind(promo.max_uses)
        .bind(promo.max_uses_per_user)
        .bind(promo.used_count)
        .bind(promo.valid_from)
        .bind(promo.valid_until)
        .bind(promo.is_active)
        .bind(&promo.event_id)
        .bind(promo.created_at)
        .execute(db.pool())
        .await
        .unwrap();
    }
}
