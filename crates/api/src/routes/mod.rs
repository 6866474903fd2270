pub mod health;
pub mod matches;
pub mod media;
pub mod venues;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /matches                                 list, create challenge
/// /matches/{id}                            participant snapshot
/// /matches/{id}/respond                    accept / decline / withdraw (POST)
/// /matches/{id}/start                      take recording lock (POST)
/// /matches/{id}/cancel-recording           release recording lock (POST)
/// /matches/{id}/upload                     multipart video upload (POST)
/// /matches/{id}/results                    analysis-aware result
/// /matches/{id}/agree                      confirm or reject result (POST)
/// /matches/{id}/dispute                    dispute result (POST)
///
/// /venues/active                           nearby venues with players present
/// /venues/{id}/check-in                    check in (POST), status (GET),
///                                          heartbeat (PUT), check out (DELETE)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/matches", matches::router())
        .nest("/venues", venues::router())
}
