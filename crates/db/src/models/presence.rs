//! Venue presence (check-in) rows and the discovery projections built on them.

use kingz_core::discovery::{ActivePlayerRow, ActiveVenueRow};
use kingz_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `venue_presence` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VenuePresence {
    pub id: DbId,
    pub user_id: DbId,
    pub venue_id: DbId,
    pub latitude: f64,
    pub longitude: f64,
    pub last_seen_at: Timestamp,
    pub created_at: Timestamp,
}

/// Outcome of a successful check-in.
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub presence: VenuePresence,
    /// Stale records swept as a side effect.
    pub stale_removed: u64,
    /// Records at other venues replaced by this check-in.
    pub moved_from_other_venue: bool,
}

/// Body of `POST /venues/{id}/check-in` and `PUT /venues/{id}/check-in`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckInRequest {
    pub latitude: f64,
    pub longitude: f64,
}

/// Query parameters for `GET /venues/active`.
#[derive(Debug, Deserialize)]
pub struct ActiveVenuesQuery {
    pub lat: f64,
    pub lng: f64,
    /// Rank players by XP in this sport; all sports are summed when absent.
    pub sport_id: Option<DbId>,
    /// Defaults to the caller.
    #[serde(alias = "excludeUserId")]
    pub exclude_user_id: Option<DbId>,
    /// Defaults to 5, capped at 50.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A venue that currently has presence records.
#[derive(Debug, Clone, FromRow)]
pub struct ActiveVenueRecord {
    pub venue_id: DbId,
    pub name: String,
    pub district: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl From<ActiveVenueRecord> for ActiveVenueRow {
    fn from(r: ActiveVenueRecord) -> Self {
        ActiveVenueRow {
            venue_id: r.venue_id,
            name: r.name,
            district: r.district,
            latitude: r.latitude,
            longitude: r.longitude,
        }
    }
}

/// A present player joined with their user profile and XP.
#[derive(Debug, Clone, FromRow)]
pub struct ActivePlayerRecord {
    pub venue_id: DbId,
    pub user_id: DbId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub total_xp: i64,
    pub last_seen_at: Timestamp,
}

impl From<ActivePlayerRecord> for ActivePlayerRow {
    fn from(r: ActivePlayerRecord) -> Self {
        ActivePlayerRow {
            venue_id: r.venue_id,
            user_id: r.user_id,
            username: r.username,
            avatar_url: r.avatar_url,
            total_xp: r.total_xp,
            last_seen_at: r.last_seen_at,
        }
    }
}
