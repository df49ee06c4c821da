use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Get the plan name on a user's profile
pub async fn get_profile_plan(pool: &PgPool, user_id: Uuid) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT plan
        FROM profiles
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| r.try_get("plan")).transpose()
}

/// Get the remaining credits of one api type, if the user has a balance row
pub async fn get_credit_balance(
    pool: &PgPool,
    user_id: Uuid,
    api_type: &str,
) -> Result<Option<i32>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT balance
        FROM user_credits
        WHERE user_id = $1 AND api_type = $2
        "#,
    )
    .bind(user_id)
    .bind(api_type)
    .fetch_optional(pool)
    .await?;

    row.map(|r| r.try_get("balance")).transpose()
}

/// Subtract one credit, never going below zero
pub async fn subtract_credit(pool: &PgPool, user_id: Uuid, api_type: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE user_credits
        SET balance = GREATEST(balance - 1, 0),
            updated_at = NOW()
        WHERE user_id = $1 AND api_type = $2
        "#,
    )
    .bind(user_id)
    .bind(api_type)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record one use of an api type
pub async fn add_usage_entry(pool: &PgPool, user_id: Uuid, api_type: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO api_usages (user_id, api_type)
        VALUES ($1, $2)
        "#,
    )
    .bind(user_id)
    .bind(api_type)
    .execute(pool)
    .await?;

    Ok(())
}
