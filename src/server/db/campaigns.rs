//! Campaign database operations

use sqlx::PgPool;
use crate::models::{Campaign, CampaignCounter, CampaignStatus};

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, name, status, calls_per_minute, max_concurrent,
               retry_attempts, retry_delay_minutes, amd_enabled,
               handler_type, handler_id, caller_id, trunk_id,
               dialed, answered, press1, connected, no_answer, busy, failed,
               answering_machine, created_at, updated_at
        FROM campaigns
        WHERE id = $1
        "#
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn get_by_status(pool: &PgPool, status: CampaignStatus) -> Result<Vec<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, name, status, calls_per_minute, max_concurrent,
               retry_attempts, retry_delay_minutes, amd_enabled,
               handler_type, handler_id, caller_id, trunk_id,
               dialed, answered, press1, connected, no_answer, busy, failed,
               answering_machine, created_at, updated_at
        FROM campaigns
        WHERE status = $1
        ORDER BY id
        "#
    )
    .bind(status)
    .fetch_all(pool)
    .await
}

/// Returns the number of rows touched (0 when the campaign does not exist).
pub async fn update_status(pool: &PgPool, id: i64, status: CampaignStatus) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE campaigns SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn increment_counter(pool: &PgPool, id: i64, counter: CampaignCounter) -> Result<u64, sqlx::Error> {
    // Column names come from a closed enum, never from input
    let sql = format!(
        "UPDATE campaigns SET {col} = {col} + 1, updated_at = NOW() WHERE id = $1",
        col = counter.column()
    );
    let result = sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(result.rows_affected())
}
