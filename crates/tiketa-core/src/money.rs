//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! In floating point:
//!   0.1 + 0.2 = 0.30000000000000004   WRONG
//!
//! Our solution: integer cents (santim for ETB)
//!   100000 cents = 1000.00 birr
//!   Every amount in the system - prices, fees, discounts, callback
//!   amounts - flows through this type. Only the provider wire format
//!   converts to a decimal string, and only at the boundary.
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents of a birr).
///
/// - `i64` (signed): allows negative values for refunds and adjustments
/// - single-field tuple struct: zero-cost abstraction over i64
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole birr.
    #[inline]
    pub const fn from_birr(birr: i64) -> Self {
        Money(birr * 100)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole-birr portion.
    #[inline]
    pub const fn birr(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the cents portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the smaller of two amounts.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    /// Applies a rate in basis points with standard rounding.
    ///
    /// Formula: `(cents * bps + 5000) / 10000` - the `+5000` rounds the
    /// half-cent boundary up. i128 intermediate prevents overflow on large
    /// amounts.
    ///
    /// ```
    /// use tiketa_core::money::{Money, FeeRate};
    ///
    /// // 5% service fee on 2000.00 birr = 100.00 birr
    /// let subtotal = Money::from_birr(2000);
    /// assert_eq!(subtotal.apply_rate(FeeRate::from_bps(500)), Money::from_birr(100));
    /// ```
    pub fn apply_rate(&self, rate: FeeRate) -> Money {
        let cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money::from_cents(cents as i64)
    }

    /// Multiplies by a quantity (line totals).
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Formats as a plain two-decimal string for provider payloads
    /// (`210000` cents -> `"2100.00"`).
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, self.birr().abs(), self.cents_part())
    }

    /// Parses a provider decimal string (`"2100.00"`, `"2100.5"`, `"2100"`)
    /// into cents. Rejects anything that is not a plain decimal number.
    pub fn parse_decimal(s: &str) -> Option<Money> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if digits.is_empty() {
            return None;
        }

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        // Take two fractional digits, round on the third.
        let frac_cents = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().ok()? * 10,
            _ => {
                let two: i64 = frac[..2].parse().ok()?;
                let round_up = frac.as_bytes().get(2).is_some_and(|d| *d >= b'5');
                two + i64::from(round_up)
            }
        };

        let cents = whole.checked_mul(100)?.checked_add(frac_cents)?;
        Some(Money(if negative { -cents } else { cents }))
    }
}

// =============================================================================
// Fee Rate
// =============================================================================

/// A rate in basis points (1 bps = 0.01%).
///
/// 500 bps = the 5% ticket service fee; 2000 bps = a 20% promo discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate(u32);

impl FeeRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        FeeRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        FeeRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        FeeRate::zero()
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-friendly display. API responses serialize cents; provider payloads
/// use [`Money::to_decimal_string`].
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}ETB {}.{:02}", sign, self.birr().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
