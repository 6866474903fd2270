use axum::routing::get;
use axum::Router;

use crate::handlers::media;
use crate::state::AppState;

/// Mount signed media links (root-level, NOT under `/api/v1`).
///
/// ```text
/// GET /media/{*key}?token=   locally stored video or audit record
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/media/{*key}", get(media::serve_media))
}
