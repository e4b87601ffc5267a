//! # Validation Module
//!
//! Request-shape validation for purchase and redemption inputs. Runs before
//! any business logic or database work; the persistence layer's constraints
//! are the last line of defense behind these checks.

use crate::error::ValidationError;
use crate::{MAX_LINE_QUANTITY, MAX_ORDER_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a requested line quantity.
///
/// ```
/// use tiketa_core::validation::validate_quantity;
///
/// assert!(validate_quantity(2).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-1).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

/// Validates the number of lines in a purchase request.
pub fn validate_line_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }
    if count > MAX_ORDER_LINES {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_ORDER_LINES as i64,
        });
    }
    Ok(())
}

/// Validates a user-entered promo code before lookup.
pub fn validate_promo_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }
    if code.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: 50,
        });
    }
    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }
    Ok(())
}

/// Validates a presented QR token shape before the database lookup.
pub fn validate_qr_token(token: &str) -> ValidationResult<()> {
    let token = token.trim();

    if token.is_empty() {
        return Err(ValidationError::Required {
            field: "qr_token".to_string(),
        });
    }
    if token.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "qr_token".to_string(),
            max: 64,
        });
    }
    Ok(())
}
