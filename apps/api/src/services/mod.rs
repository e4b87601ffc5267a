//! # Service Layer
//!
//! Business orchestration between the thin HTTP handlers and the
//! repositories:
//!
//! - [`purchase`] - ticket purchases and shop orders
//! - [`checkout`] - payment initiation against the rails
//! - [`reconciliation`] - exactly-once settlement from verified callbacks
//! - [`redemption`] - checkpoint validation of QR tokens
//! - [`expiry`] - the pending-order TTL reaper

pub mod checkout;
pub mod expiry;
pub mod purchase;
pub mod reconciliation;
pub mod redemption;
