//! Active-venue discovery: nearby venues with at least one other player present.
//!
//! The repository layer fetches every venue that currently has presence
//! records plus the players behind them; [`aggregate_active_venues`] does the
//! exclusion, ranking, and paging.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::geo::distance_km;
use crate::presence::format_distance;
use crate::types::{DbId, Timestamp};

/// Default number of venues returned.
pub const DEFAULT_VENUE_LIMIT: i64 = 5;

/// Upper bound on the venue page size.
pub const MAX_VENUE_LIMIT: i64 = 50;

/// Number of players included in each venue's preview.
pub const PLAYER_PREVIEW_SIZE: usize = 3;

/// Clamp a client-supplied page size into `1..=MAX_VENUE_LIMIT`.
pub fn clamp_limit(limit: Option<i64>) -> usize {
    limit.unwrap_or(DEFAULT_VENUE_LIMIT).clamp(1, MAX_VENUE_LIMIT) as usize
}

/// Clamp a client-supplied offset to be non-negative.
pub fn clamp_offset(offset: Option<i64>) -> usize {
    offset.unwrap_or(0).max(0) as usize
}

/// A venue with at least one presence record.
#[derive(Debug, Clone)]
pub struct ActiveVenueRow {
    pub venue_id: DbId,
    pub name: String,
    pub district: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A player currently checked in somewhere, with their skill metric.
#[derive(Debug, Clone)]
pub struct ActivePlayerRow {
    pub venue_id: DbId,
    pub user_id: DbId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub total_xp: i64,
    pub last_seen_at: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivePlayer {
    pub user_id: DbId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub total_xp: i64,
    pub last_seen_at: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveVenue {
    pub venue_id: DbId,
    pub name: String,
    pub district: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// `None` when the venue has no coordinates; such venues sort last.
    pub distance_km: Option<f64>,
    pub distance_label: Option<String>,
    /// True number of active players, not just the preview length.
    pub active_player_count: usize,
    /// Top players by total XP, at most [`PLAYER_PREVIEW_SIZE`].
    pub players: Vec<ActivePlayer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveVenuesPage {
    pub venues: Vec<ActiveVenue>,
    /// Surviving venue count before paging.
    pub total_active_venues: usize,
}

/// Build the discovery page for a user standing at `origin`.
///
/// Venues whose only present player is `exclude_user_id` are dropped. Venues
/// are ordered by ascending distance; ties and coordinate-less venues fall
/// back to venue id order so the result is deterministic.
pub fn aggregate_active_venues(
    venues: Vec<ActiveVenueRow>,
    players: Vec<ActivePlayerRow>,
    origin: (f64, f64),
    exclude_user_id: Option<DbId>,
    offset: usize,
    limit: usize,
) -> ActiveVenuesPage {
    let mut by_venue: BTreeMap<DbId, Vec<ActivePlayerRow>> = BTreeMap::new();
    for player in players {
        if Some(player.user_id) == exclude_user_id {
            continue;
        }
        by_venue.entry(player.venue_id).or_default().push(player);
    }

    let mut surviving: Vec<ActiveVenue> = venues
        .into_iter()
        .filter_map(|venue| {
            let mut present = by_venue.remove(&venue.venue_id)?;

            present.sort_by(|a, b| {
                b.total_xp
                    .cmp(&a.total_xp)
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });
            let active_player_count = present.len();
            let preview = present
                .into_iter()
                .take(PLAYER_PREVIEW_SIZE)
                .map(|p| ActivePlayer {
                    user_id: p.user_id,
                    username: p.username,
                    avatar_url: p.avatar_url,
                    total_xp: p.total_xp,
                    last_seen_at: p.last_seen_at,
                })
                .collect();

            let distance = match (venue.latitude, venue.longitude) {
                (Some(lat), Some(lon)) => Some(distance_km(origin.0, origin.1, lat, lon)),
                _ => None,
            };

            Some(ActiveVenue {
                venue_id: venue.venue_id,
                name: venue.name,
                district: venue.district,
                latitude: venue.latitude,
                longitude: venue.longitude,
                distance_km: distance,
                distance_label: distance.map(format_distance),
                active_player_count,
                players: preview,
            })
        })
        .collect();

    surviving.sort_by(|a, b| {
        let by_distance = match (a.distance_km, b.distance_km) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        by_distance.then_with(|| a.venue_id.cmp(&b.venue_id))
    });

    let total_active_venues = surviving.len();
    let venues = surviving.into_iter().skip(offset).take(limit).collect();

    ActiveVenuesPage {
        venues,
        total_active_venues,
    }
}
