//! # Promo Repository
//!
//! Read-side validation and idempotent application of promo codes.
//!
//! Application is keyed on the unique `(promo_code_id, order_id)` pair:
//! `INSERT OR IGNORE` means a second apply for the same order records
//! nothing and does not re-increment `used_count`. The increment itself is
//! guarded by `max_uses` so the global cap cannot be overrun by concurrent
//! orders racing the last slot.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use tiketa_core::promo::{self, Discount};
use tiketa_core::{ids, CoreError, Money, PromoCode, PromoDenied};

use crate::error::{DbError, DbResult};

/// Repository for promo code operations.
#[derive(Debug, Clone)]
pub struct PromoRepository {
    pool: SqlitePool,
}

impl PromoRepository {
    /// Creates a new PromoRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PromoRepository { pool }
    }

    /// Looks up a code (case-normalized). `None` when unknown.
    pub async fn find_by_code(&self, code: &str) -> DbResult<Option<PromoCode>> {
        let mut conn = self.pool.acquire().await?;
        find_by_code_on(&mut conn, code).await
    }

    /// Number of recorded usages of one code by one user.
    pub async fn user_usage_count(&self, promo_code_id: &str, user_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        user_usage_count_on(&mut conn, promo_code_id, user_id).await
    }

    /// Read-side validation: no side effects. Returns the code row and the
    /// computed discount; every rejection carries its specific reason.
    pub async fn validate(
        &self,
        code: &str,
        user_id: &str,
        event_id: Option<&str>,
        subtotal: Money,
        now: DateTime<Utc>,
    ) -> DbResult<(PromoCode, Discount)> {
        let mut conn = self.pool.acquire().await?;
        validate_on(&mut conn, code, user_id, event_id, subtotal, now).await
    }

    /// Applies a code to an order: re-validates (client-supplied discounts
    /// are never trusted), records the usage and bumps `used_count`, all in
    /// one transaction.
    ///
    /// Idempotent per order: when a usage row for `(code, order)` already
    /// exists, the recorded discount is returned and nothing is counted
    /// again.
    pub async fn apply(
        &self,
        code: &str,
        user_id: &str,
        order_id: &str,
        event_id: Option<&str>,
        subtotal: Money,
        now: DateTime<Utc>,
    ) -> DbResult<Discount> {
        let mut tx = self.pool.begin().await?;

        let promo = find_by_code_on(&mut tx, code)
            .await?
            .ok_or(CoreError::PromoDenied(PromoDenied::UnknownCode))?;

        if let Some(recorded) = usage_for_order_on(&mut tx, &promo.id, order_id).await? {
            tx.rollback().await?;
            return Ok(Discount {
                discount: recorded,
                new_total: subtotal - recorded,
            });
        }

        let user_usages = user_usage_count_on(&mut tx, &promo.id, user_id).await?;
        let discount = promo::evaluate(&promo, user_usages, now, event_id, subtotal)
            .map_err(CoreError::PromoDenied)?;

        apply_usage_on(&mut tx, &promo.id, order_id, user_id, discount.discount, now).await?;

        tx.commit().await?;
        Ok(discount)
    }
}

// =============================================================================
// Transaction-Scoped Helpers
// =============================================================================
// The purchase flow applies promos inside the same transaction that
// reserves inventory and creates the order, so these take a raw connection.

pub(crate) async fn find_by_code_on(
    conn: &mut SqliteConnection,
    code: &str,
) -> DbResult<Option<PromoCode>> {
    let normalized = promo::normalize_code(code);

    let row = sqlx::query_as::<_, PromoCode>(
        r#"
        SELECT
            id, code, description, discount_type, discount_value,
            min_purchase_cents, max_discount_cents, max_uses,
            max_uses_per_user, used_count, valid_from, valid_until,
            is_active, event_id, created_at
        FROM promo_codes
        WHERE code = ?1
        "#,
    )
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

/// Discount already recorded for `(promo, order)`, if any.
pub(crate) async fn usage_for_order_on(
    conn: &mut SqliteConnection,
    promo_code_id: &str,
    order_id: &str,
) -> DbResult<Option<Money>> {
    let cents: Option<i64> = sqlx::query_scalar(
        "SELECT discount_cents FROM promo_usages WHERE promo_code_id = ?1 AND order_id = ?2",
    )
    .bind(promo_code_id)
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(cents.map(Money::from_cents))
}

pub(crate) async fn user_usage_count_on(
    conn: &mut SqliteConnection,
    promo_code_id: &str,
    user_id: &str,
) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM promo_usages WHERE promo_code_id = ?1 AND user_id = ?2",
    )
    .bind(promo_code_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

pub(crate) async fn validate_on(
    conn: &mut SqliteConnection,
    code: &str,
    user_id: &str,
    event_id: Option<&str>,
    subtotal: Money,
    now: DateTime<Utc>,
) -> DbResult<(PromoCode, Discount)> {
    let promo = find_by_code_on(conn, code)
        .await?
        .ok_or(CoreError::PromoDenied(PromoDenied::UnknownCode))?;

    let user_usages = user_usage_count_on(conn, &promo.id, user_id).await?;

    let discount = promo::evaluate(&promo, user_usages, now, event_id, subtotal)
        .map_err(CoreError::PromoDenied)?;

    Ok((promo, discount))
}

/// Records one usage and bumps the counter. Returns `false` when the
/// `(promo, order)` pair already existed - an idempotent re-apply that
/// changes nothing.
///
/// The increment is guarded by `max_uses`; losing that race rolls the
/// caller's transaction back with `UsageCapReached`.
pub(crate) async fn apply_usage_on(
    conn: &mut SqliteConnection,
    promo_code_id: &str,
    order_id: &str,
    user_id: &str,
    discount: Money,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO promo_usages
            (id, promo_code_id, order_id, user_id, discount_cents, used_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(ids::new_id())
    .bind(promo_code_id)
    .bind(order_id)
    .bind(user_id)
    .bind(discount.cents())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 0 {
        debug!(promo_code_id = %promo_code_id, order_id = %order_id, "Promo already applied to order");
        return Ok(false);
    }

    let bumped = sqlx::query(
        r#"
        UPDATE promo_codes
        SET used_count = used_count + 1
        WHERE id = ?1 AND (max_uses IS NULL OR used_count < max_uses)
        "#,
    )
    .bind(promo_code_id)
    .execute(&mut *conn)
    .await?;

    if bumped.rows_affected() == 0 {
        return Err(DbError::Domain(CoreError::PromoDenied(
            PromoDenied::UsageCapReached,
        )));
    }

    debug!(promo_code_id = %promo_code_id, order_id = %order_id, "Promo usage recorded");
    Ok(true)
}

// =============================================================================
// Unit Tests
// =============================================================================
