use kingz_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `sports` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Sport {
    pub id: DbId,
    pub name: String,
    pub created_at: Timestamp,
}
