//! Contact database operations

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use crate::models::{Contact, ContactStatus};

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        SELECT id, campaign_id, group_id, phone, name, status, attempts,
               last_attempt_at, call_log_id, created_at
        FROM contacts
        WHERE id = $1
        "#
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn next_eligible(
    pool: &PgPool,
    campaign_id: i64,
    max_attempts: i32,
    exclude: &[i64],
    retry_before: DateTime<Utc>,
) -> Result<Option<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        SELECT c.id, c.campaign_id, c.group_id, c.phone, c.name, c.status, c.attempts,
               c.last_attempt_at, c.call_log_id, c.created_at
        FROM contacts c
        WHERE c.campaign_id = $1
          AND c.attempts < $2
          AND NOT (c.id = ANY($3))
          AND (c.status = 'pending'
               OR (c.status IN ('no_answer', 'busy', 'failed')
                   AND (c.last_attempt_at IS NULL OR c.last_attempt_at <= $4)))
          AND NOT EXISTS (
              SELECT 1 FROM dnc_numbers d
              WHERE d.phone = c.phone AND d.campaign_id IS DISTINCT FROM c.campaign_id
          )
        ORDER BY c.last_attempt_at ASC NULLS FIRST, c.id ASC
        LIMIT 1
        "#
    )
    .bind(campaign_id)
    .bind(max_attempts)
    .bind(exclude.to_vec())
    .bind(retry_before)
    .fetch_optional(pool)
    .await
}

pub async fn count_remaining(pool: &PgPool, campaign_id: i64, max_attempts: i32) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM contacts c
        WHERE c.campaign_id = $1
          AND c.attempts < $2
          AND c.status IN ('pending', 'no_answer', 'busy', 'failed')
          AND NOT EXISTS (
              SELECT 1 FROM dnc_numbers d
              WHERE d.phone = c.phone AND d.campaign_id IS DISTINCT FROM c.campaign_id
          )
        "#
    )
    .bind(campaign_id)
    .bind(max_attempts)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn count_for_campaign(pool: &PgPool, campaign_id: i64) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contacts WHERE campaign_id = $1")
        .bind(campaign_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn import_from_pool(pool: &PgPool, campaign_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE contacts SET campaign_id = $1 WHERE campaign_id IS NULL AND status = 'pending'"
    )
    .bind(campaign_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn reset_dialing(pool: &PgPool, campaign_id: i64, keep: &[i64]) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE contacts SET status = 'pending'
        WHERE campaign_id = $1 AND status = 'dialing' AND NOT (id = ANY($2))
        "#
    )
    .bind(campaign_id)
    .bind(keep.to_vec())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_dialing(pool: &PgPool, id: i64, at: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE contacts
        SET status = 'dialing', attempts = attempts + 1, last_attempt_at = $2
        WHERE id = $1
        "#
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_result(
    pool: &PgPool,
    id: i64,
    status: ContactStatus,
    call_log_id: Option<i64>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE contacts SET status = $2, call_log_id = COALESCE($3, call_log_id) WHERE id = $1"
    )
    .bind(id)
    .bind(status)
    .bind(call_log_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn group_is_dnc_exempt(pool: &PgPool, group_id: i64) -> Result<bool, sqlx::Error> {
    let exempt: Option<(bool,)> = sqlx::query_as("SELECT dnc_exempt FROM contact_groups WHERE id = $1")
        .bind(group_id)
        .fetch_optional(pool)
        .await?;
    Ok(exempt.map(|(e,)| e).unwrap_or(false))
}
