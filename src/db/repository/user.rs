use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, onboarding, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Returns the local user for an authenticated identity, creating it on
    /// first sight. The stored email follows the one carried by the token.
    pub async fn get_or_create(pool: &SqlitePool, id: &str, email: &str) -> AppResult<User> {
        let now = Utc::now().naive_utc();

        if let Some(user) = Self::find_by_id(pool, id).await? {
            if email.is_empty() || user.email == email {
                return Ok(user);
            }

            return sqlx::query_as::<_, User>(
                r#"
                UPDATE users
                SET email = ?, updated_at = ?
                WHERE id = ?
                RETURNING id, email, onboarding, created_at, updated_at
                "#,
            )
            .bind(email)
            .bind(now)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database);
        }

        tracing::info!(user_id = %id, "Creating local user record");

        // Two first requests may race here; the loser keeps the winner's row.
        sqlx::query(
            r#"
            INSERT INTO users (id, email, onboarding, created_at, updated_at)
            VALUES (?, ?, '[]', ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Adds `flag` to the user's completed onboarding steps in one statement,
    /// so concurrent calls cannot drop each other's flags. A malformed column
    /// is replaced by `[flag]`.
    pub async fn mark_onboarding_completed(
        pool: &SqlitePool,
        user_id: &str,
        flag: &str,
    ) -> AppResult<User> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET onboarding = CASE
                    WHEN json_valid(onboarding) = 0 THEN json_array(?)
                    WHEN json_type(onboarding) != 'array' THEN json_array(?)
                    WHEN EXISTS (SELECT 1 FROM json_each(users.onboarding) WHERE value = ?)
                        THEN onboarding
                    ELSE json_insert(onboarding, '$[#]', ?)
                END,
                updated_at = ?
            WHERE id = ?
            RETURNING id, email, onboarding, created_at, updated_at
            "#,
        )
        .bind(flag)
        .bind(flag)
        .bind(flag)
        .bind(flag)
        .bind(now)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}
