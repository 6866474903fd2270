//! Repository for the `sports` reference table.

use kingz_core::types::DbId;
use sqlx::PgPool;

use crate::models::sport::Sport;

const COLUMNS: &str = "id, name, created_at";

pub struct SportRepo;

impl SportRepo {
    pub async fn create(pool: &PgPool, name: &str) -> Result<Sport, sqlx::Error> {
        let query = format!("INSERT INTO sports (name) VALUES ($1) RETURNING {COLUMNS}");
        sqlx::query_as::<_, Sport>(&query)
            .bind(name)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Sport>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sports WHERE id = $1");
        sqlx::query_as::<_, Sport>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
