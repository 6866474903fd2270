//! Venue check-in rules: distance gate, coordinate validation, staleness.
//!
//! A user holds at most one presence record system-wide. The storage layer
//! enforces that; this module decides whether a check-in is allowed at all
//! and how distances are presented.

use crate::geo::distance_km;
use crate::types::Timestamp;

/// Maximum distance between the user and the venue for a check-in (0.5 km).
pub const MAX_CHECK_IN_DISTANCE_KM: f64 = 0.5;

/// Presence records older than this are swept.
pub const STALE_PRESENCE_HOURS: i64 = 2;

/// Why a check-in was refused before touching storage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckInRejection {
    #[error("You are too far from this venue ({distance_km:.2} km away, maximum is 0.5 km)")]
    TooFar { distance_km: f64 },

    #[error("{0}")]
    InvalidCoordinates(String),
}

/// Validate a latitude/longitude pair supplied by a client.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), CheckInRejection> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(CheckInRejection::InvalidCoordinates(format!(
            "Latitude must be between -90 and 90, got {latitude}"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(CheckInRejection::InvalidCoordinates(format!(
            "Longitude must be between -180 and 180, got {longitude}"
        )));
    }
    Ok(())
}

/// Check whether a user at `(latitude, longitude)` may check in at a venue.
///
/// Venues without coordinates skip the distance check and return `Ok(None)`.
/// Otherwise returns the computed distance, or [`CheckInRejection::TooFar`]
/// when it exceeds [`MAX_CHECK_IN_DISTANCE_KM`].
pub fn check_in_distance(
    venue_coordinates: Option<(f64, f64)>,
    latitude: f64,
    longitude: f64,
) -> Result<Option<f64>, CheckInRejection> {
    validate_coordinates(latitude, longitude)?;

    let Some((venue_lat, venue_lon)) = venue_coordinates else {
        return Ok(None);
    };

    let distance = distance_km(latitude, longitude, venue_lat, venue_lon);
    if distance > MAX_CHECK_IN_DISTANCE_KM {
        return Err(CheckInRejection::TooFar {
            distance_km: distance,
        });
    }
    Ok(Some(distance))
}

/// Cutoff before which a presence record counts as stale.
pub fn stale_cutoff(now: Timestamp, threshold_hours: i64) -> Timestamp {
    now - chrono::Duration::hours(threshold_hours)
}

/// Whether a record last seen at `last_seen_at` is stale at `now`.
pub fn is_stale(last_seen_at: Timestamp, now: Timestamp, threshold_hours: i64) -> bool {
    last_seen_at < stale_cutoff(now, threshold_hours)
}

/// Human-readable distance: metres below 1 km, kilometres to one decimal above.
pub fn format_distance(distance_km: f64) -> String {
    let metres = (distance_km * 1000.0).round() as i64;
    if metres < 1000 {
        format!("{metres}m")
    } else {
        format!("{distance_km:.1}km")
    }
}

/// Confirmation shown to the user after a successful check-in.
pub fn check_in_message(venue_name: &str) -> String {
    format!("Checked in at {venue_name}")
}
