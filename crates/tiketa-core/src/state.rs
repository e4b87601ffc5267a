//! # Status State Machines
//!
//! The single choke point for every order and ticket status transition.
//!
//! ```text
//! Order:
//!   PENDING ──► PAID ──► READY_FOR_PICKUP ──► COMPLETED
//!      │          │              │
//!      │          ├──────────────┴──────────► COMPLETED   (ticket path skips
//!      │          │                                        READY_FOR_PICKUP)
//!      │          └──► REFUNDED
//!      └──► CANCELLED
//!
//! Ticket:
//!   VALID ──► USED
//!     ├────► CANCELLED
//!     └────► EXPIRED
//! ```
//!
//! Callers check transitions here before issuing the conditional UPDATE that
//! performs them; anything outside the adjacency set is an
//! [`InvalidTransition`](crate::error::CoreError::InvalidTransition), logged
//! and rejected rather than silently ignored.

use crate::error::CoreError;
use crate::types::{OrderStatus, TicketStatus};

/// Returns true when `from -> to` is a legal order transition.
pub fn order_transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Paid)
            | (Pending, Cancelled)
            | (Paid, ReadyForPickup)
            | (Paid, Completed)
            | (Paid, Refunded)
            | (ReadyForPickup, Completed)
    )
}

/// Returns true when `from -> to` is a legal ticket transition.
pub fn ticket_transition_allowed(from: TicketStatus, to: TicketStatus) -> bool {
    use TicketStatus::*;
    matches!(
        (from, to),
        (Valid, Used) | (Valid, Cancelled) | (Valid, Expired)
    )
}

/// Validates an order transition, producing the domain error on violation.
pub fn check_order_transition(from: OrderStatus, to: OrderStatus) -> Result<(), CoreError> {
    if order_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

/// Validates a ticket transition, producing the domain error on violation.
pub fn check_ticket_transition(from: TicketStatus, to: TicketStatus) -> Result<(), CoreError> {
    if ticket_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

/// Terminal order states: no transition ever leaves them.
pub fn order_is_terminal(status: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(status, Completed | Cancelled | Refunded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn test_order_happy_paths() {
        assert!(order_transition_allowed(Pending, Paid));
        assert!(order_transition_allowed(Paid, ReadyForPickup));
        assert!(order_transition_allowed(ReadyForPickup, Completed));
        // Ticket path completes straight from PAID.
        assert!(order_transition_allowed(Paid, Completed));
    }

    #[test]
    fn test_order_side_branches() {
        assert!(order_transition_allowed(Pending, Cancelled));
        assert!(order_transition_allowed(Paid, Refunded));
    }

    #[test]
    fn test_order_rejects_everything_else() {
        assert!(!order_transition_allowed(Pending, Completed));
        assert!(!order_transition_allowed(Pending, ReadyForPickup));
        assert!(!order_transition_allowed(Paid, Pending));
        assert!(!order_transition_allowed(Cancelled, Paid));
        assert!(!order_transition_allowed(Completed, Refunded));
        assert!(!order_transition_allowed(Refunded, Paid));

        let err = check_order_transition(Cancelled, Paid).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_no_self_transitions() {
        for s in [Pending, Paid, ReadyForPickup, Completed, Cancelled, Refunded] {
            assert!(!order_transition_allowed(s, s), "{s:?} -> {s:?} must be illegal");
        }
    }

    #[test]
    fn test_ticket_transitions() {
        use TicketStatus::*;
        assert!(ticket_transition_allowed(Valid, Used));
        assert!(ticket_transition_allowed(Valid, Cancelled));
        assert!(ticket_transition_allowed(Valid, Expired));
        assert!(!ticket_transition_allowed(Used, Valid));
        assert!(!ticket_transition_allowed(Used, Cancelled));
        assert!(!ticket_transition_allowed(Cancelled, Used));
    }

    #[test]
    fn test_terminal_states() {
        assert!(order_is_terminal(Completed));
        assert!(order_is_terminal(Cancelled));
        assert!(order_is_terminal(Refunded));
        assert!(!order_is_terminal(Pending));
        assert!(!order_is_terminal(Paid));
        assert!(!order_is_terminal(ReadyForPickup));
    }
}
