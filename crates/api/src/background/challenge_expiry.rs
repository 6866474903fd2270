//! Periodic cancellation of pending challenges nobody answered in time.

use std::time::Duration;

use kingz_db::repositories::MatchRepo;
use kingz_db::DbPool;
use tokio_util::sync::CancellationToken;

/// Run the challenge expiry sweep until `cancel` is triggered.
pub async fn run(pool: DbPool, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Challenge expiry sweep started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Challenge expiry sweep stopping");
                break;
            }
            _ = interval.tick() => {
                match MatchRepo::expire_pending(&pool).await {
                    Ok(0) => {}
                    Ok(expired) => tracing::info!(expired, "Expired unanswered challenges"),
                    Err(e) => tracing::error!(error = %e, "Challenge expiry sweep failed"),
                }
            }
        }
    }
}
