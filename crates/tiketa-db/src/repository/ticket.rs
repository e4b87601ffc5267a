//! # Ticket Repository
//!
//! Ticket listings and the single-use redemption path.
//!
//! Redemption is a test-and-set: the status check and the flip to USED are
//! one statement, so two simultaneous scans of the same QR code cannot
//! both report success - the loser's statement affects zero rows and is
//! classified from the row it finds.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use tiketa_core::{Ticket, TicketStatus};

use crate::error::DbResult;
use crate::repository::RedeemOutcome;

/// Redacted admission summary shown to the checkpoint operator. Never
/// echoes the raw token.
#[derive(Debug, Clone)]
pub struct TicketRedemption {
    pub ticket_id: String,
    pub event_title: String,
    pub ticket_type_name: String,
    pub attendee: String,
    pub used_at: chrono::DateTime<Utc>,
}

/// Repository for ticket database operations.
#[derive(Debug, Clone)]
pub struct TicketRepository {
    pool: SqlitePool,
}

impl TicketRepository {
    /// Creates a new TicketRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TicketRepository { pool }
    }

    /// Gets a ticket by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(&select_tickets("WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ticket)
    }

    /// Gets a ticket by its QR token.
    pub async fn get_by_qr(&self, qr_token: &str) -> DbResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(&select_tickets("WHERE qr_code = ?1"))
            .bind(qr_token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ticket)
    }

    /// Lists a user's tickets, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<Ticket>> {
        let tickets = sqlx::query_as::<_, Ticket>(&select_tickets(
            "WHERE user_id = ?1 ORDER BY created_at DESC",
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    /// Lists the tickets belonging to an order.
    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<Ticket>> {
        let tickets = sqlx::query_as::<_, Ticket>(&select_tickets(
            "WHERE order_id = ?1 ORDER BY created_at",
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    /// Redeems a ticket QR token: VALID -> USED with the timestamp, in the
    /// same statement that reads the current status.
    pub async fn redeem(&self, qr_token: &str) -> DbResult<RedeemOutcome<TicketRedemption>> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET status = 'USED', used_at = ?1
            WHERE qr_code = ?2 AND status = 'VALID'
            "#,
        )
        .bind(now)
        .bind(qr_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_by_qr(qr_token).await?;

            return Ok(match current {
                None => RedeemOutcome::NotFound,
                Some(t) if t.status == TicketStatus::Used => RedeemOutcome::AlreadyUsed {
                    used_at: t.used_at,
                },
                Some(t) if t.status == TicketStatus::Cancelled => RedeemOutcome::Cancelled,
                Some(t) => RedeemOutcome::NotReady {
                    current: format!("{:?}", t.status),
                },
            });
        }

        // This scan won; assemble the operator summary.
        #[derive(sqlx::FromRow)]
        struct SummaryRow {
            ticket_id: String,
            event_title: String,
            ticket_type_name: String,
            attendee: String,
        }

        let summary = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT
                t.id AS ticket_id,
                e.title AS event_title,
                tt.name AS ticket_type_name,
                COALESCE(u.name, u.phone, u.id) AS attendee
            FROM tickets t
            INNER JOIN events e ON e.id = t.event_id
            INNER JOIN ticket_types tt ON tt.id = t.ticket_type_id
            INNER JOIN users u ON u.id = t.user_id
            WHERE t.qr_code = ?1
            "#,
        )
        .bind(qr_token)
        .fetch_one(&self.pool)
        .await?;

        info!(ticket_id = %summary.ticket_id, "Ticket redeemed");

        Ok(RedeemOutcome::Redeemed(TicketRedemption {
            ticket_id: summary.ticket_id,
            event_title: summary.event_title,
            ticket_type_name: summary.ticket_type_name,
            attendee: summary.attendee,
            used_at: now,
        }))
    }

    /// Marks a user's tickets for a finished event as expired.
    /// Housekeeping; redeeming an expired ticket reports `not_ready`.
    pub async fn expire_for_event(&self, event_id: &str) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'EXPIRED' WHERE event_id = ?1 AND status = 'VALID'",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn select_tickets(clause: &str) -> String {
    format!(
        r#"
        SELECT id, order_id, user_id, event_id, ticket_type_id,
               qr_code, status, used_at, created_at
        FROM tickets
        {clause}
        "#
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
