//! Route definitions for the `/venues` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::venues;
use crate::state::AppState;

/// Routes mounted at `/venues`.
///
/// ```text
/// GET    /active               -> active_venues (?lat=&lng=&limit=&offset=&sport_id=&exclude_user_id=)
/// POST   /{id}/check-in        -> check_in
/// GET    /{id}/check-in        -> check_in_status
/// PUT    /{id}/check-in        -> heartbeat
/// DELETE /{id}/check-in        -> check_out
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/active", get(venues::active_venues))
        .route(
            "/{id}/check-in",
            get(venues::check_in_status)
                .post(venues::check_in)
                .put(venues::heartbeat)
                .delete(venues::check_out),
        )
}
