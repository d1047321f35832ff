//! User CRUD operations.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::User;
use crate::validation::validate_email;

/// Create a new user together with default alert settings.
pub async fn create_user(pool: &SqlitePool, email: &str, name: Option<&str>) -> Result<User> {
    validate_email(email)?;

    let now = Utc::now();
    let user = User {
        id: crate::new_id(),
        email: email.trim().to_lowercase(),
        name: name.map(str::to_string),
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO users (id, email, name, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.name)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| DatabaseError::from_insert(e, "User", &user.email))?;

    sqlx::query(
        r#"
        INSERT INTO alert_settings (user_id, updated_at)
        VALUES (?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::debug!(user_id = %user.id, "Created user");
    Ok(user)
}

/// Get a user by ID.
pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<User> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, name, created_at, updated_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::not_found("User", id))
}

/// Get a user by email address.
pub async fn get_user_by_email(pool: &SqlitePool, email: &str) -> Result<User> {
    let email = email.trim().to_lowercase();
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, name, created_at, updated_at
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(&email)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::not_found("User", email))
}

/// Update a user's display name.
pub async fn update_name(pool: &SqlitePool, id: &str, name: Option<&str>) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET name = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(name)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("User", id));
    }

    Ok(())
}

/// Delete a user by ID. Owned links, alerts, settings, queue entries and
/// reports go with it.
pub async fn delete_user(pool: &SqlitePool, id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("User", id));
    }

    Ok(())
}

/// List all users.
pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, name, created_at, updated_at
        FROM users
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(users)
}

/// Count total users.
pub async fn count_users(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM users
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(count)
}
