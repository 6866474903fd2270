//! Periodic removal of presence records nobody refreshed for two hours.

use std::time::Duration;

use chrono::Utc;
use kingz_core::presence::{stale_cutoff, STALE_PRESENCE_HOURS};
use kingz_db::repositories::PresenceRepo;
use kingz_db::DbPool;
use tokio_util::sync::CancellationToken;

/// Run the stale presence sweep until `cancel` is triggered.
pub async fn run(pool: DbPool, every: Duration, cancel: CancellationToken) {
    tracing::info!(
        threshold_hours = STALE_PRESENCE_HOURS,
        interval_secs = every.as_secs(),
        "Presence sweep started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Presence sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let cutoff = stale_cutoff(Utc::now(), STALE_PRESENCE_HOURS);
                match PresenceRepo::sweep_stale(&pool, cutoff).await {
                    Ok(0) => tracing::debug!("Presence sweep: nothing stale"),
                    Ok(removed) => tracing::info!(removed, "Presence sweep: removed stale check-ins"),
                    Err(e) => tracing::error!(error = %e, "Presence sweep failed"),
                }
            }
        }
    }
}
