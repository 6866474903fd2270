use std::sync::Arc;

use kingz_cloud::signing::LinkSigner;
use kingz_cloud::storage::BlobStore;
use tokio::sync::Notify;

use crate::auth::jwt::SessionKeys;
use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: kingz_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Verifies the Bearer tokens on every authenticated request.
    pub session_keys: Arc<SessionKeys>,
    /// Match videos and analysis audit records.
    pub blob_store: Arc<dyn BlobStore>,
    /// Checks the tokens on `/media` links.
    pub link_signer: Arc<LinkSigner>,
    /// Wakes the analysis dispatcher as soon as a job is queued.
    pub analysis_wakeup: Arc<Notify>,
}
