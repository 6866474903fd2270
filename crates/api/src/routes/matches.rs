//! Route definitions for the `/matches` resource.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use kingz_core::match_lifecycle::MAX_VIDEO_BYTES;

use crate::handlers::matches;
use crate::state::AppState;

/// Multipart framing allowance on top of the video itself.
const UPLOAD_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Routes mounted at `/matches`.
///
/// ```text
/// GET    /                         -> list_matches (?status=&limit=&offset=)
/// POST   /                         -> create_match
/// GET    /{id}                     -> get_match
/// POST   /{id}/respond             -> respond
/// POST   /{id}/start               -> start_match
/// POST   /{id}/cancel-recording    -> cancel_recording
/// POST   /{id}/upload              -> upload_video
/// GET    /{id}/results             -> get_results
/// POST   /{id}/agree               -> agree
/// POST   /{id}/dispute             -> dispute
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(matches::list_matches).post(matches::create_match))
        .route("/{id}", get(matches::get_match))
        .route("/{id}/respond", post(matches::respond))
        .route("/{id}/start", post(matches::start_match))
        .route("/{id}/cancel-recording", post(matches::cancel_recording))
        .route(
            "/{id}/upload",
            post(matches::upload_video)
                .layer(DefaultBodyLimit::max(MAX_VIDEO_BYTES + UPLOAD_OVERHEAD_BYTES)),
        )
        .route("/{id}/results", get(matches::get_results))
        .route("/{id}/agree", post(matches::agree))
        .route("/{id}/dispute", post(matches::dispute))
}
