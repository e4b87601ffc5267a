//! # Reconciliation Service
//!
//! The single authority for settling orders from verified provider
//! notifications - the only code that fires PENDING -> PAID.
//!
//! ## Guarantees
//! ```text
//! at-least-once, unordered callback delivery
//!           |
//!   find payment by provider reference    (never creates an order)
//!   match amount against order total      (tolerance: one cent)
//!   conditional UPDATE ... WHERE status = 'PENDING'
//!           |
//!   Applied   -> complete payment row, notify buyer   (exactly once)
//!   Skipped   -> duplicate delivery: no-op, no second notification
//!                conflicting state: logged, never silently ignored
//! ```
//!
//! Failure callbacks cancel the pending order and release its inventory in
//! the same transaction, making the units purchasable again.

use std::sync::Arc;

use tracing::{info, warn};

use tiketa_core::{state, CoreError, Order, OrderStatus, AMOUNT_TOLERANCE_CENTS};
use tiketa_db::repository::order::Transition;
use tiketa_db::{Database, DbError, DbResult};
use tiketa_payments::{CallbackNotice, CallbackStatus};

use crate::notify::{Notifier, OrderConfirmation, Recipient};

/// What a delivery ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// This delivery confirmed the order.
    Confirmed,
    /// This delivery cancelled the order and released its inventory.
    Cancelled,
    /// The order was already settled; nothing changed (idempotent).
    Duplicate { current: OrderStatus },
    /// Non-final provider status; nothing to do yet.
    Ignored,
    /// The notice asked for a transition the state machine forbids
    /// (e.g. success for a cancelled order). Logged, nothing mutated.
    Conflict { current: OrderStatus },
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Database,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationService {
    pub fn new(db: Database, notifier: Arc<dyn Notifier>) -> Self {
        ReconciliationService { db, notifier }
    }

    /// Settles one verified notice. Safe to call any number of times with
    /// the same notice. Rejections surface as `DbError::Domain`
    /// (`OrderNotFound`, `AmountMismatch`, ...).
    pub async fn reconcile(&self, notice: &CallbackNotice) -> DbResult<ReconcileOutcome> {
        let payment = self
            .db
            .payments()
            .find_by_provider_ref(&notice.provider_ref)
            .await?
            .ok_or_else(|| {
                DbError::Domain(CoreError::OrderNotFound(notice.provider_ref.clone()))
            })?;

        let order = self
            .db
            .orders()
            .get_by_id(&payment.order_id)
            .await?
            .ok_or_else(|| DbError::Domain(CoreError::OrderNotFound(payment.order_id.clone())))?;

        match notice.status {
            CallbackStatus::Pending => {
                info!(order_number = %order.order_number, "Provider still processing, ignoring");
                Ok(ReconcileOutcome::Ignored)
            }
            CallbackStatus::Success => self.confirm(notice, &payment.id, order).await,
            CallbackStatus::Failed => self.fail(&payment.id, order).await,
        }
    }

    async fn confirm(
        &self,
        notice: &CallbackNotice,
        payment_id: &str,
        order: Order,
    ) -> DbResult<ReconcileOutcome> {
        // A success notice must carry the amount the buyer paid, and it
        // must match what the order charged. Replayed or manipulated
        // callbacks crediting a different amount die here.
        let received = notice.amount.ok_or(DbError::Domain(CoreError::AmountMismatch {
            expected_cents: order.total_cents,
            received_cents: 0,
        }))?;
        if (received.cents() - order.total_cents).abs() > AMOUNT_TOLERANCE_CENTS {
            return Err(DbError::Domain(CoreError::AmountMismatch {
                expected_cents: order.total_cents,
                received_cents: received.cents(),
            }));
        }

        let method = notice.provider.method();
        let transition = self
            .db
            .orders()
            .mark_paid(&order.id, method, &notice.external_tx_id)
            .await?;

        match transition {
            Transition::Applied => {
                self.db
                    .payments()
                    .complete(payment_id, &notice.external_tx_id)
                    .await?;

                info!(
                    order_number = %order.order_number,
                    payment_ref = %notice.external_tx_id,
                    "Order confirmed"
                );

                // Exactly once: only the delivery that won the transition
                // notifies.
                self.notify_confirmed(&order).await;

                Ok(ReconcileOutcome::Confirmed)
            }
            // An order that was never paid cannot be confirmed by a late
            // success notice; everything downstream of PAID is a duplicate.
            Transition::Skipped { current }
                if !state::order_transition_allowed(current, OrderStatus::Paid)
                    && current == OrderStatus::Cancelled =>
            {
                warn!(
                    order_number = %order.order_number,
                    ?current,
                    "Success callback for a cancelled order, rejected as an illegal transition"
                );
                Ok(ReconcileOutcome::Conflict { current })
            }
            Transition::Skipped { current } => {
                info!(order_number = %order.order_number, ?current, "Order already settled, no-op");
                Ok(ReconcileOutcome::Duplicate { current })
            }
        }
    }

    async fn fail(&self, payment_id: &str, order: Order) -> DbResult<ReconcileOutcome> {
        let transition = self.db.orders().cancel_pending(&order.id).await?;

        match transition {
            Transition::Applied => {
                self.db.payments().fail(payment_id).await?;

                info!(
                    order_number = %order.order_number,
                    "Payment failed, order cancelled and inventory released"
                );

                self.notify_cancelled(&order).await;

                Ok(ReconcileOutcome::Cancelled)
            }
            Transition::Skipped { current } if current == OrderStatus::Cancelled => {
                info!(order_number = %order.order_number, "Duplicate failure notice, no-op");
                Ok(ReconcileOutcome::Duplicate { current })
            }
            Transition::Skipped { current } => {
                // A success callback won the race. The failure notice loses;
                // the money question belongs to the provider's ledger.
                warn!(
                    order_number = %order.order_number,
                    ?current,
                    "Failure callback for an order not pending"
                );
                Ok(ReconcileOutcome::Conflict { current })
            }
        }
    }

    async fn notify_confirmed(&self, order: &Order) {
        let Some(recipient) = self.recipient_for(order).await else {
            return;
        };

        let ticket_count = self
            .db
            .tickets()
            .list_for_order(&order.id)
            .await
            .map(|tickets| tickets.len())
            .unwrap_or(0);

        let pickup_location = match &order.pickup_location_id {
            Some(_) => self
                .db
                .catalog()
                .list_pickup_locations()
                .await
                .ok()
                .and_then(|locations| {
                    locations
                        .into_iter()
                        .find(|l| Some(&l.id) == order.pickup_location_id.as_ref())
                        .map(|l| l.name)
                }),
            None => None,
        };

        self.notifier
            .order_confirmed(
                &recipient,
                &OrderConfirmation {
                    order_number: order.order_number.clone(),
                    total_cents: order.total_cents,
                    ticket_count,
                    pickup_location,
                },
            )
            .await;
    }

    async fn notify_cancelled(&self, order: &Order) {
        if let Some(recipient) = self.recipient_for(order).await {
            self.notifier
                .order_cancelled(&recipient, &order.order_number)
                .await;
        }
    }

    /// Notification failures must never fail reconciliation; an unknown
    /// buyer just means nothing to send.
    async fn recipient_for(&self, order: &Order) -> Option<Recipient> {
        match self.db.catalog().get_user(&order.user_id).await {
            Ok(Some(user)) => Some(Recipient {
                name: user.name,
                phone: user.phone,
                email: user.email,
            }),
            Ok(None) => None,
            Err(err) => {
                warn!(order_number = %order.order_number, error = %err, "Buyer lookup failed");
                None
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tiketa_core::money::FeeRate;
    use tiketa_core::{
        Event, EventStatus, Money, PaymentMethod, TicketStatus, TicketType, User,
    };
    use tiketa_db::repository::order::{NewTicketOrder, TicketLine};
    use tiketa_db::DbConfig;
    use tiketa_payments::ProviderKind;

    use crate::notify::OrderConfirmation;

    /// Counts deliveries instead of sending anything.
    #[derive(Default)]
    struct CountingNotifier {
        confirmations: AtomicUsize,
        cancellations: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn order_confirmed(&self, _: &Recipient, _: &OrderConfirmation) {
            self.confirmations.fetch_add(1, Ordering::SeqCst);
        }

        async fn order_cancelled(&self, _: &Recipient, _: &str) {
            self.cancellations.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        db: Database,
        notifier: Arc<CountingNotifier>,
        service: ReconciliationService,
        order: Order,
        provider_ref: String,
    }

    /// A pending ticket order (2 x 1000 birr + 5% fee = 2100 birr) with a
    /// processing payment record, as checkout leaves it.
    async fn fixture() -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();

        db.catalog()
            .insert_user(&User {
                id: "u1".to_string(),
                name: Some("Abebe".to_string()),
                phone: Some("+251911000000".to_string()),
                email: None,
                created_at: now,
            })
            .await
            .unwrap();
        db.catalog()
            .insert_event(&Event {
                id: "e1".to_string(),
                title: "Meskel Eve Concert".to_string(),
                venue: "Addis Arena".to_string(),
                starts_at: now + Duration::days(7),
                status: EventStatus::Published,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        db.catalog()
            .insert_ticket_type(&TicketType {
                id: "vip".to_string(),
                event_id: "e1".to_string(),
                name: "VIP".to_string(),
                price_cents: 100_000,
                quantity: 2,
                sold: 0,
                max_per_order: 2,
                is_active: true,
            })
            .await
            .unwrap();

        let purchase = db
            .orders()
            .create_ticket_order(NewTicketOrder {
                user_id: "u1".to_string(),
                event_id: "e1".to_string(),
                lines: vec![TicketLine {
                    ticket_type_id: "vip".to_string(),
                    quantity: 2,
                }],
                promo_code: None,
                service_fee: FeeRate::from_bps(500),
            })
            .await
            .unwrap();

        let payment = db
            .payments()
            .upsert_for_order(&purchase.order.id, purchase.order.total_cents, PaymentMethod::Chapa)
            .await
            .unwrap();
        let provider_ref = payment.id.clone();
        db.payments()
            .set_processing(&payment.id, &provider_ref)
            .await
            .unwrap();

        let notifier = Arc::new(CountingNotifier::default());
        let service = ReconciliationService::new(db.clone(), notifier.clone());

        Fixture {
            db,
            notifier,
            service,
            order: purchase.order,
            provider_ref,
        }
    }

    fn success_notice(provider_ref: &str, amount_cents: i64) -> CallbackNotice {
        CallbackNotice {
            provider: ProviderKind::Chapa,
            provider_ref: provider_ref.to_string(),
            external_tx_id: "CHP-REF-9".to_string(),
            status: CallbackStatus::Success,
            amount: Some(Money::from_cents(amount_cents)),
        }
    }

    async fn sold(db: &Database) -> i64 {
        db.catalog()
            .get_ticket_type("vip")
            .await
            .unwrap()
            .unwrap()
            .sold
    }

    #[tokio::test]
    async fn test_duplicate_success_confirms_exactly_once() {
        let f = fixture().await;
        let notice = success_notice(&f.provider_ref, f.order.total_cents);

        let first = f.service.reconcile(&notice).await.unwrap();
        assert_eq!(first, ReconcileOutcome::Confirmed);

        // Webhook retry: same payload, delivered again.
        let second = f.service.reconcile(&notice).await.unwrap();
        assert_eq!(
            second,
            ReconcileOutcome::Duplicate {
                current: OrderStatus::Paid
            }
        );

        let order = f.db.orders().get_by_id(&f.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment_ref.as_deref(), Some("CHP-REF-9"));
        assert_eq!(order.payment_method, Some(PaymentMethod::Chapa));

        // One confirmation sent, not two.
        assert_eq!(f.notifier.confirmations.load(Ordering::SeqCst), 1);
        assert_eq!(f.notifier.cancellations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_amount_mismatch_never_confirms() {
        let f = fixture().await;

        let err = f
            .service
            .reconcile(&success_notice(&f.provider_ref, f.order.total_cents - 50_000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::AmountMismatch { .. })
        ));

        // Missing amount on a success notice is rejected too.
        let mut no_amount = success_notice(&f.provider_ref, 0);
        no_amount.amount = None;
        let err = f.service.reconcile(&no_amount).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::AmountMismatch { .. })
        ));

        let order = f.db.orders().get_by_id(&f.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(f.notifier.confirmations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_cent_tolerance_accepted() {
        let f = fixture().await;
        let outcome = f
            .service
            .reconcile(&success_notice(&f.provider_ref, f.order.total_cents + 1))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_failure_cancels_and_releases_inventory() {
        let f = fixture().await;
        assert_eq!(sold(&f.db).await, 2);

        let notice = CallbackNotice {
            provider: ProviderKind::Chapa,
            provider_ref: f.provider_ref.clone(),
            external_tx_id: "CHP-REF-9".to_string(),
            status: CallbackStatus::Failed,
            amount: None,
        };

        let outcome = f.service.reconcile(&notice).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Cancelled);

        // The units are purchasable again and the tickets are dead.
        assert_eq!(sold(&f.db).await, 0);
        let order = f.db.orders().get_by_id(&f.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        for ticket in f.db.tickets().list_for_order(&f.order.id).await.unwrap() {
            assert_eq!(ticket.status, TicketStatus::Cancelled);
        }
        assert_eq!(f.notifier.cancellations.load(Ordering::SeqCst), 1);

        // Duplicate failure delivery: no-op.
        let again = f.service.reconcile(&notice).await.unwrap();
        assert_eq!(
            again,
            ReconcileOutcome::Duplicate {
                current: OrderStatus::Cancelled
            }
        );
        assert_eq!(f.notifier.cancellations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_cancellation_is_conflict() {
        let f = fixture().await;
        f.db.orders().cancel_pending(&f.order.id).await.unwrap();

        let outcome = f
            .service
            .reconcile(&success_notice(&f.provider_ref, f.order.total_cents))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Conflict {
                current: OrderStatus::Cancelled
            }
        );
        assert_eq!(f.notifier.confirmations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_reference_never_creates_an_order() {
        let f = fixture().await;
        let err = f
            .service
            .reconcile(&success_notice("no-such-reference", 100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_provider_status_is_ignored() {
        let f = fixture().await;
        let mut notice = success_notice(&f.provider_ref, f.order.total_cents);
        notice.status = CallbackStatus::Pending;

        let outcome = f.service.reconcile(&notice).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);

        let order = f.db.orders().get_by_id(&f.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }
}
