//! Trunk database operations

use sqlx::PgPool;
use crate::models::Trunk;

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<Trunk>, sqlx::Error> {
    sqlx::query_as::<_, Trunk>(
        "SELECT id, name, enabled, description, created_at FROM trunks WHERE id = $1"
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn first_enabled(pool: &PgPool) -> Result<Option<Trunk>, sqlx::Error> {
    sqlx::query_as::<_, Trunk>(
        "SELECT id, name, enabled, description, created_at FROM trunks WHERE enabled ORDER BY id LIMIT 1"
    )
    .fetch_optional(pool)
    .await
}
