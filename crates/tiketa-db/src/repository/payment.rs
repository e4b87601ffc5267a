//! # Payment Repository
//!
//! One payment attempt record per order (`payments.order_id` is unique).
//! Initiation upserts the row; the provider's accepted reference is stored
//! so the asynchronous callback can be matched back to the order.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use tiketa_core::{ids, Payment, PaymentMethod, PaymentStatus};

use crate::error::DbResult;

/// Repository for payment records.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Creates or refreshes the payment record for an order at initiation
    /// time. Switching method before paying reuses the same row.
    pub async fn upsert_for_order(
        &self,
        order_id: &str,
        amount_cents: i64,
        method: PaymentMethod,
    ) -> DbResult<Payment> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount_cents, method, status, provider_ref, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'PENDING', NULL, ?5, ?5)
            ON CONFLICT (order_id) DO UPDATE SET
                method = excluded.method,
                status = 'PENDING',
                updated_at = excluded.updated_at
            "#,
        )
        .bind(ids::new_id())
        .bind(order_id)
        .bind(amount_cents)
        .bind(method)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let payment = self.get_for_order(order_id).await?.ok_or_else(|| {
            crate::error::DbError::Internal("payment row missing after upsert".to_string())
        })?;

        debug!(payment_id = %payment.id, order_id = %order_id, "Payment record upserted");
        Ok(payment)
    }

    /// Records the provider-accepted reference and moves the record to
    /// PROCESSING.
    pub async fn set_processing(&self, payment_id: &str, provider_ref: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE payments SET status = 'PROCESSING', provider_ref = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(provider_ref)
        .bind(Utc::now())
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks the record settled. `provider_ref` is the final external
    /// transaction id from the verified callback.
    pub async fn complete(&self, payment_id: &str, provider_ref: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE payments SET status = 'COMPLETED', provider_ref = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(provider_ref)
        .bind(Utc::now())
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks the record failed.
    pub async fn fail(&self, payment_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE payments SET status = 'FAILED', updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(payment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Gets a payment by ID (the `tx_ref` handed to hosted-checkout rails).
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&select_payments("WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// Gets the payment record of an order.
    pub async fn get_for_order(&self, order_id: &str) -> DbResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&select_payments("WHERE order_id = ?1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// Finds a payment by the reference the provider echoes in callbacks
    /// (`outTradeNo` / `referenceId`). Falls back to the payment id, which
    /// hosted checkout uses as `tx_ref`.
    pub async fn find_by_provider_ref(&self, reference: &str) -> DbResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&select_payments(
            "WHERE provider_ref = ?1 OR id = ?1",
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    /// `true` when the payment record carries the given status.
    pub async fn has_status(&self, payment_id: &str, status: PaymentStatus) -> DbResult<bool> {
        let current: Option<PaymentStatus> =
            sqlx::query_scalar("SELECT status FROM payments WHERE id = ?1")
                .bind(payment_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(current == Some(status))
    }
}

fn select_payments(clause: &str) -> String {
    format!(
        r#"
        SELECT id, order_id, amount_cents, method, status, provider_ref,
               created_at, updated_at
        FROM payments
        {clause}
        "#
    )
}
