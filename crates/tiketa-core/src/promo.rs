//! # Promotion Evaluation
//!
//! Pure read-side evaluation of a promo code against an order subtotal and
//! its usage history. No side effects here: recording a usage and bumping
//! `used_count` is the persistence layer's job, keyed uniquely on
//! `(promo_code_id, order_id)` so application is idempotent per order.
//!
//! Checks run in a fixed order and every failure carries its specific
//! reason:
//!
//! 1. code is active
//! 2. current time within `[valid_from, valid_until]`
//! 3. global usage cap (`used_count < max_uses`, when capped)
//! 4. per-user usage cap
//! 5. event scoping (when the code is event-restricted)
//! 6. minimum purchase

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PromoDenied;
use crate::money::{FeeRate, Money};
use crate::types::{DiscountType, PromoCode};

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Discount {
    /// Amount taken off the subtotal, already capped and rounded.
    pub discount: Money,
    /// Subtotal after the discount. Never negative.
    pub new_total: Money,
}

/// Evaluates `code` for one prospective application.
///
/// `user_usage_count` is the number of prior `PromoUsage` rows for this
/// user and code; `event_id` is the event of the order's tickets, if any.
pub fn evaluate(
    code: &PromoCode,
    user_usage_count: i64,
    now: DateTime<Utc>,
    event_id: Option<&str>,
    subtotal: Money,
) -> Result<Discount, PromoDenied> {
    if !code.is_active {
        return Err(PromoDenied::Inactive);
    }

    if now < code.valid_from {
        return Err(PromoDenied::NotYetValid);
    }
    if now > code.valid_until {
        return Err(PromoDenied::Expired);
    }

    if let Some(max_uses) = code.max_uses {
        if code.used_count >= max_uses {
            return Err(PromoDenied::UsageCapReached);
        }
    }

    if user_usage_count >= code.max_uses_per_user {
        return Err(PromoDenied::UserCapReached);
    }

    if let Some(required_event) = code.event_id.as_deref() {
        if event_id != Some(required_event) {
            return Err(PromoDenied::WrongEvent);
        }
    }

    if subtotal.cents() < code.min_purchase_cents {
        return Err(PromoDenied::BelowMinimum {
            min_cents: code.min_purchase_cents,
        });
    }

    Ok(compute_discount(code, subtotal))
}

/// Discount arithmetic, applied once.
///
/// Percentage: `subtotal * bps / 10000`, rounded to the cent, capped at
/// `max_discount` when set. Fixed: the value, capped at the subtotal so the
/// total never goes negative.
fn compute_discount(code: &PromoCode, subtotal: Money) -> Discount {
    let raw = match code.discount_type {
        DiscountType::Percentage => {
            let pct = subtotal.apply_rate(FeeRate::from_bps(code.discount_value as u32));
            match code.max_discount_cents {
                Some(cap) => pct.min(Money::from_cents(cap)),
                None => pct,
            }
        }
        DiscountType::Fixed => Money::from_cents(code.discount_value),
    };

    let discount = raw.min(subtotal);
    Discount {
        discount,
        new_total: subtotal - discount,
    }
}

/// Normalizes a user-entered code for lookup (codes are stored upper-cased).
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_code(discount_type: DiscountType, discount_value: i64) -> PromoCode {
        let now = Utc::now();
        PromoCode {
            id: "p1".into(),
            code: "MESKEL20".into(),
            description: None,
            discount_type,
            discount_value,
            min_purchase_cents: 0,
            max_discount_cents: None,
            max_uses: None,
            max_uses_per_user: 1,
            used_count: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            is_active: true,
            event_id: None,
            created_at: now,
        }
    }

    #[test]
    fn test_percentage_capped_at_max_discount() {
        // 20% of 1000.00 birr = 200.00, capped at 100.00 -> new total 900.00
        let mut code = base_code(DiscountType::Percentage, 2000);
        code.max_discount_cents = Some(10_000);

        let result = evaluate(&code, 0, Utc::now(), None, Money::from_birr(1000)).unwrap();
        assert_eq!(result.discount, Money::from_birr(100));
        assert_eq!(result.new_total, Money::from_birr(900));
    }

    #[test]
    fn test_fixed_capped_at_subtotal() {
        // Fixed 50.00 birr on a 30.00 birr subtotal -> 30.00 off, 0 total
        let code = base_code(DiscountType::Fixed, 5_000);

        let result = evaluate(&code, 0, Utc::now(), None, Money::from_birr(30)).unwrap();
        assert_eq!(result.discount, Money::from_birr(30));
        assert_eq!(result.new_total, Money::zero());
    }

    #[test]
    fn test_percentage_rounding() {
        // 15% of 9.99 birr = 1.4985 -> rounds to 1.50
        let code = base_code(DiscountType::Percentage, 1500);
        let result = evaluate(&code, 0, Utc::now(), None, Money::from_cents(999)).unwrap();
        assert_eq!(result.discount, Money::from_cents(150));
    }

    #[test]
    fn test_inactive() {
        let mut code = base_code(DiscountType::Fixed, 100);
        code.is_active = false;
        let err = evaluate(&code, 0, Utc::now(), None, Money::from_birr(10)).unwrap_err();
        assert_eq!(err, PromoDenied::Inactive);
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let mut code = base_code(DiscountType::Fixed, 100);

        code.valid_from = now + Duration::hours(1);
        code.valid_until = now + Duration::days(1);
        assert_eq!(
            evaluate(&code, 0, now, None, Money::from_birr(10)).unwrap_err(),
            PromoDenied::NotYetValid
        );

        code.valid_from = now - Duration::days(2);
        code.valid_until = now - Duration::days(1);
        assert_eq!(
            evaluate(&code, 0, now, None, Money::from_birr(10)).unwrap_err(),
            PromoDenied::Expired
        );
    }

    #[test]
    fn test_global_usage_cap() {
        let mut code = base_code(DiscountType::Fixed, 100);
        code.max_uses = Some(5);
        code.used_count = 5;
        assert_eq!(
            evaluate(&code, 0, Utc::now(), None, Money::from_birr(10)).unwrap_err(),
            PromoDenied::UsageCapReached
        );
    }

    #[test]
    fn test_per_user_cap() {
        let code = base_code(DiscountType::Fixed, 100);
        assert_eq!(
            evaluate(&code, 1, Utc::now(), None, Money::from_birr(10)).unwrap_err(),
            PromoDenied::UserCapReached
        );
    }

    #[test]
    fn test_event_scoping() {
        let mut code = base_code(DiscountType::Fixed, 100);
        code.event_id = Some("e1".into());

        assert_eq!(
            evaluate(&code, 0, Utc::now(), Some("e2"), Money::from_birr(10)).unwrap_err(),
            PromoDenied::WrongEvent
        );
        // Shop orders carry no event; event-scoped codes do not apply.
        assert_eq!(
            evaluate(&code, 0, Utc::now(), None, Money::from_birr(10)).unwrap_err(),
            PromoDenied::WrongEvent
        );
        assert!(evaluate(&code, 0, Utc::now(), Some("e1"), Money::from_birr(10)).is_ok());
    }

    #[test]
    fn test_minimum_purchase() {
        let mut code = base_code(DiscountType::Fixed, 100);
        code.min_purchase_cents = 50_000;
        let err = evaluate(&code, 0, Utc::now(), None, Money::from_birr(100)).unwrap_err();
        assert_eq!(err, PromoDenied::BelowMinimum { min_cents: 50_000 });
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  meskel20 "), "MESKEL20");
    }
}
