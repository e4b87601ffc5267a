//! # tiketa-api: HTTP API Server
//!
//! The thin HTTP surface over the tiketa commerce core.
//!
//! ```text
//! axum handlers (extraction + response shaping)
//!        |
//! services: purchase . checkout . reconciliation . redemption . expiry
//!        |
//! tiketa-db transactions          tiketa-payments adapters
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod routes;
pub mod services;
pub mod state;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use routes::build_router;
pub use state::AppState;
