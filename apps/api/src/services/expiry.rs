//! # Pending-Order Expiry
//!
//! Abandoned checkouts hold reserved inventory hostage. This background
//! task sweeps orders still PENDING past the configured TTL, cancelling
//! them and releasing their seats/stock through the same guarded
//! transition reconciliation uses - so a payment callback racing the
//! reaper is harmless: whichever side wins the conditional update decides
//! the order's fate.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use tiketa_db::Database;

/// Spawns the reaper loop. The handle can be aborted on shutdown; the loop
/// itself runs until then.
pub fn spawn_expiry_task(db: Database, ttl: Duration, sweep_interval: Duration) -> JoinHandle<()> {
    info!(
        ttl_secs = ttl.as_secs(),
        sweep_secs = sweep_interval.as_secs(),
        "Starting pending-order expiry task"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // The first tick fires immediately; skip it so a restart doesn't
        // race application startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let cutoff = Utc::now()
                - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(30));

            match db.orders().expire_stale_pending(cutoff).await {
                Ok(0) => {}
                Ok(reaped) => info!(reaped, "Expiry sweep cancelled stale pending orders"),
                Err(err) => error!(error = %err, "Expiry sweep failed"),
            }
        }
    })
}
