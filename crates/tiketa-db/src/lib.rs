//! # tiketa-db: Database Layer
//!
//! SQLite persistence for the tiketa commerce engine.
//!
//! ## Architecture Position
//! ```text
//! apps/api services
//!        |
//! * tiketa-db (THIS CRATE) *
//!   pool . migrations . repositories
//!        |
//! SQLite (WAL mode, foreign keys on)
//! ```
//!
//! Every correctness-critical mutation is either a conditional UPDATE
//! checked through `rows_affected()` or a multi-statement transaction, so
//! the oversell, exactly-once-confirmation and single-use-redemption
//! guarantees hold across any number of service instances.

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::RedeemOutcome;

// =============================================================================
// Test Support
// =============================================================================
