//! Do-not-call ledger

use sqlx::PgPool;

pub async fn add(pool: &PgPool, phone: &str, campaign_id: Option<i64>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO dnc_numbers (phone, campaign_id)
        VALUES ($1, $2)
        ON CONFLICT (phone, campaign_id) DO NOTHING
        "#
    )
    .bind(phone)
    .bind(campaign_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn contains(pool: &PgPool, phone: &str) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM dnc_numbers WHERE phone = $1)")
        .bind(phone)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}
