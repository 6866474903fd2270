//! Handlers for the `/venues` resource: discovery and check-in.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use kingz_core::discovery::{self, ActiveVenuesPage};
use kingz_core::error::CoreError;
use kingz_core::presence::{self, STALE_PRESENCE_HOURS};
use kingz_core::types::DbId;
use kingz_db::models::presence::{ActiveVenuesQuery, CheckInRequest};
use kingz_db::repositories::{PresenceRepo, VenueRepo};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/venues/active?lat=&lng=&limit=&offset=&sport_id=&exclude_user_id=
///
/// Venues near the caller where at least one other player is checked in,
/// nearest first. The caller is excluded unless another id is given.
pub async fn active_venues(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<ActiveVenuesQuery>,
) -> AppResult<Json<DataResponse<ActiveVenuesPage>>> {
    presence::validate_coordinates(params.lat, params.lng)?;

    let fresh_since = presence::stale_cutoff(Utc::now(), STALE_PRESENCE_HOURS);
    let (venues, players) = tokio::try_join!(
        PresenceRepo::active_venues(&state.pool, fresh_since),
        PresenceRepo::active_players(&state.pool, fresh_since, params.sport_id),
    )?;

    let page = discovery::aggregate_active_venues(
        venues.into_iter().map(Into::into).collect(),
        players.into_iter().map(Into::into).collect(),
        (params.lat, params.lng),
        Some(params.exclude_user_id.unwrap_or(auth.user_id)),
        discovery::clamp_offset(params.offset),
        discovery::clamp_limit(params.limit),
    );

    tracing::debug!(
        user_id = auth.user_id,
        returned = page.venues.len(),
        total = page.total_active_venues,
        "Active venues listed"
    );
    Ok(Json(DataResponse { data: page }))
}

/// POST /api/v1/venues/{id}/check-in
///
/// Check in within 0.5 km of the venue. Any presence the caller holds at
/// another venue is replaced.
pub async fn check_in(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(venue_id): Path<DbId>,
    Json(input): Json<CheckInRequest>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    presence::validate_coordinates(input.latitude, input.longitude)?;

    let venue = VenueRepo::find_by_id(&state.pool, venue_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Venue",
            id: venue_id,
        }))?;

    let distance_km =
        presence::check_in_distance(venue.coordinates(), input.latitude, input.longitude)
            .inspect_err(|rejection| {
                tracing::info!(user_id = auth.user_id, venue_id, %rejection, "Check-in refused");
            })?;

    let stale_before = presence::stale_cutoff(Utc::now(), STALE_PRESENCE_HOURS);
    let checked_in = PresenceRepo::check_in(
        &state.pool,
        auth.user_id,
        venue_id,
        input.latitude,
        input.longitude,
        stale_before,
    )
    .await?;

    tracing::info!(
        user_id = auth.user_id,
        venue_id,
        ?distance_km,
        stale_removed = checked_in.stale_removed,
        moved = checked_in.moved_from_other_venue,
        "Checked in"
    );

    Ok(Json(DataResponse {
        data: json!({
            "success": true,
            "message": presence::check_in_message(&venue.name),
            "venue_id": venue_id,
            "distance_km": distance_km,
            "distance_label": distance_km.map(presence::format_distance),
            "last_seen_at": checked_in.presence.last_seen_at,
        }),
    }))
}

/// GET /api/v1/venues/{id}/check-in
///
/// Whether the caller currently counts as present at this venue.
pub async fn check_in_status(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(venue_id): Path<DbId>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let record = PresenceRepo::get_status(&state.pool, auth.user_id, venue_id).await?;
    let now = Utc::now();
    let is_checked_in = record
        .as_ref()
        .is_some_and(|p| !presence::is_stale(p.last_seen_at, now, STALE_PRESENCE_HOURS));

    Ok(Json(DataResponse {
        data: json!({
            "is_checked_in": is_checked_in,
            "last_seen_at": record.map(|p| p.last_seen_at),
        }),
    }))
}

/// PUT /api/v1/venues/{id}/check-in
///
/// Heartbeat: refresh `last_seen_at` and the caller's position. Returns
/// `success: false` when the caller is not checked in here.
pub async fn heartbeat(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(venue_id): Path<DbId>,
    Json(input): Json<CheckInRequest>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    presence::validate_coordinates(input.latitude, input.longitude)?;

    let refreshed = PresenceRepo::heartbeat(
        &state.pool,
        auth.user_id,
        venue_id,
        input.latitude,
        input.longitude,
    )
    .await?;

    Ok(Json(DataResponse {
        data: json!({
            "success": refreshed.is_some(),
            "last_seen_at": refreshed.map(|p| p.last_seen_at),
        }),
    }))
}

/// DELETE /api/v1/venues/{id}/check-in
///
/// Check out. Succeeds whether or not a record existed.
pub async fn check_out(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(venue_id): Path<DbId>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let removed = PresenceRepo::check_out(&state.pool, auth.user_id, venue_id).await?;
    if removed {
        tracing::info!(user_id = auth.user_id, venue_id, "Checked out");
    }

    Ok(Json(DataResponse {
        data: json!({ "success": true, "was_checked_in": removed }),
    }))
}
