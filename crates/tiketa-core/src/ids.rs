//! # Identifier Generation
//!
//! Entity ids, human-readable order numbers and QR scan tokens.
//!
//! Order numbers combine a kind prefix, a base-36 timestamp and a random
//! suffix - readable enough for support calls, and uniqueness does not ride
//! on the clock. QR tokens are opaque: a prefix plus 16 uppercase hex
//! characters from a v4 UUID, matching nothing else in the system.

use chrono::Utc;
use uuid::Uuid;

/// Which purchase flow an order belongs to; decides its number and QR
/// prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Ticket,
    Shop,
}

impl OrderKind {
    fn number_prefix(self) -> &'static str {
        match self {
            OrderKind::Ticket => "TK",
            OrderKind::Shop => "PS",
        }
    }

    fn qr_prefix(self) -> &'static str {
        match self {
            OrderKind::Ticket => "TK-",
            OrderKind::Shop => "PS-",
        }
    }
}

/// Generates a new entity id (UUID v4 string).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a human-readable order number, e.g. `TK-LX2M3A9F-7B3C`.
pub fn order_number(kind: OrderKind) -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix = random_hex(4);
    format!("{}-{}-{}", kind.number_prefix(), to_base36(millis), suffix)
}

/// Generates a unique QR scan token, e.g. `PS-9F86D081884C7D65`.
pub fn qr_token(kind: OrderKind) -> String {
    format!("{}{}", kind.qr_prefix(), random_hex(16))
}

/// Uppercase hex from a fresh UUID, truncated to `len` characters.
fn random_hex(len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    hex[..len.min(hex.len())].to_string()
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize] as char);
        value /= 36;
    }
    out.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_order_number_prefixes() {
        assert!(order_number(OrderKind::Ticket).starts_with("TK-"));
        assert!(order_number(OrderKind::Shop).starts_with("PS-"));
    }

    #[test]
    fn test_qr_token_shape() {
        let token = qr_token(OrderKind::Shop);
        assert!(token.starts_with("PS-"));
        assert_eq!(token.len(), 3 + 16);
        assert!(token[3..].chars().all(|c| c.is_ascii_hexdigit()));

        let ticket = qr_token(OrderKind::Ticket);
        assert!(ticket.starts_with("TK-"));
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| qr_token(OrderKind::Ticket)).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(36 * 36 + 1), "101");
    }
}
