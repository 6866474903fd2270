//! Venue reference data.

use kingz_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `venues` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Venue {
    pub id: DbId,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub district: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Venue {
    /// `(latitude, longitude)` when both are known.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// DTO for inserting a venue (administrative tooling and tests).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVenue {
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub district: Option<String>,
}
