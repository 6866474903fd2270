//! Periodic release of upload reservations whose request never settled them.

use std::time::Duration;

use kingz_db::repositories::MatchRepo;
use kingz_db::DbPool;
use tokio_util::sync::CancellationToken;

/// Run the upload reclaim sweep until `cancel` is triggered.
///
/// Matches left in `uploading` for longer than `max_age` go back to
/// `in_progress` so the recorder can upload again.
pub async fn run(pool: DbPool, every: Duration, max_age: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = every.as_secs(),
        max_age_secs = max_age.as_secs(),
        "Upload reclaim sweep started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Upload reclaim sweep stopping");
                break;
            }
            _ = interval.tick() => {
                match MatchRepo::release_stale_uploads(&pool, max_age).await {
                    Ok(0) => {}
                    Ok(released) => tracing::warn!(released, "Released abandoned upload reservations"),
                    Err(e) => tracing::error!(error = %e, "Upload reclaim sweep failed"),
                }
            }
        }
    }
}
