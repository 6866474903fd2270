//! Repository for the `venues` table.

use kingz_core::types::DbId;
use sqlx::PgPool;

use crate::models::venue::{CreateVenue, Venue};

/// Column list for `venues` queries.
const COLUMNS: &str = "id, name, latitude, longitude, district, created_at, updated_at";

/// Provides access to venue reference data.
pub struct VenueRepo;

impl VenueRepo {
    pub async fn create(pool: &PgPool, input: &CreateVenue) -> Result<Venue, sqlx::Error> {
        let query = format!(
            "INSERT INTO venues (name, latitude, longitude, district) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Venue>(&query)
            .bind(&input.name)
            .bind(input.latitude)
            .bind(input.longitude)
            .bind(&input.district)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Venue>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM venues WHERE id = $1");
        sqlx::query_as::<_, Venue>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
