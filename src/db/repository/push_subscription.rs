use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::models::{PushSubscription, UpsertPushSubscription};
use crate::error::{AppError, AppResult};

/// Keeps each bulk delete well below SQLite's bound-parameter limit.
const DELETE_CHUNK_SIZE: usize = 500;

pub struct PushSubscriptionRepository;

impl PushSubscriptionRepository {
    /// All subscriptions owned by a user
    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<Vec<PushSubscription>> {
        sqlx::query_as::<_, PushSubscription>(
            r#"
            SELECT id, user_id, endpoint, p256dh, auth, created_at, updated_at
            FROM push_subscriptions
            WHERE user_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Every stored subscription, i.e. all users with at least one endpoint
    pub async fn find_all(pool: &SqlitePool) -> AppResult<Vec<PushSubscription>> {
        sqlx::query_as::<_, PushSubscription>(
            r#"
            SELECT id, user_id, endpoint, p256dh, auth, created_at, updated_at
            FROM push_subscriptions
            ORDER BY user_id ASC, created_at ASC
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_endpoint(
        pool: &SqlitePool,
        endpoint: &str,
    ) -> AppResult<Option<PushSubscription>> {
        sqlx::query_as::<_, PushSubscription>(
            r#"
            SELECT id, user_id, endpoint, p256dh, auth, created_at, updated_at
            FROM push_subscriptions
            WHERE endpoint = ?
            "#,
        )
        .bind(endpoint)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Register an endpoint for `user_id`. An existing row with the same
    /// endpoint is updated in place (new keys, new owner) instead of inserting
    /// a duplicate.
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: &str,
        subscription: &UpsertPushSubscription,
    ) -> AppResult<PushSubscription> {
        if let Some(existing) = Self::find_by_endpoint(pool, &subscription.endpoint).await? {
            return Self::update_existing(pool, &existing.id, user_id, subscription).await;
        }

        match Self::insert(pool, user_id, subscription).await {
            Ok(created) => Ok(created),
            // Lost a race against a concurrent registration of the same endpoint.
            Err(AppError::Database(sqlx::Error::Database(e))) if e.is_unique_violation() => {
                tracing::debug!(
                    "Concurrent registration for endpoint {}, updating instead",
                    subscription.endpoint
                );
                let existing = Self::find_by_endpoint(pool, &subscription.endpoint)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound("Push subscription not found".to_string())
                    })?;
                Self::update_existing(pool, &existing.id, user_id, subscription).await
            }
            Err(e) => Err(e),
        }
    }

    async fn insert(
        pool: &SqlitePool,
        user_id: &str,
        subscription: &UpsertPushSubscription,
    ) -> AppResult<PushSubscription> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, PushSubscription>(
            r#"
            INSERT INTO push_subscriptions (
                id, user_id, endpoint, p256dh, auth, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, endpoint, p256dh, auth, created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(&subscription.endpoint)
        .bind(&subscription.p256dh)
        .bind(&subscription.auth)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    async fn update_existing(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
        subscription: &UpsertPushSubscription,
    ) -> AppResult<PushSubscription> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, PushSubscription>(
            r#"
            UPDATE push_subscriptions
            SET
                user_id = ?,
                p256dh = ?,
                auth = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING id, user_id, endpoint, p256dh, auth, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(&subscription.p256dh)
        .bind(&subscription.auth)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Remove a user's own subscription. Returns whether a row was deleted.
    pub async fn delete_for_user(
        pool: &SqlitePool,
        user_id: &str,
        endpoint: &str,
    ) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM push_subscriptions WHERE user_id = ? AND endpoint = ?")
                .bind(user_id)
                .bind(endpoint)
                .execute(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Bulk delete by endpoint in a single transaction. Unknown endpoints are
    /// ignored, so repeating the call is harmless. Returns the number of rows
    /// removed.
    pub async fn delete_by_endpoints(pool: &SqlitePool, endpoints: &[String]) -> AppResult<u64> {
        if endpoints.is_empty() {
            return Ok(0);
        }

        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        let mut removed = 0u64;

        for chunk in endpoints.chunks(DELETE_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM push_subscriptions WHERE endpoint IN (");
            let mut separated = builder.separated(", ");
            for endpoint in chunk {
                separated.push_bind(endpoint);
            }
            separated.push_unseparated(")");

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(AppError::Database)?;
            removed += result.rows_affected();
        }

        tx.commit().await.map_err(AppError::Database)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, UserRepository};

    fn sub(endpoint: &str, p256dh: &str, auth: &str) -> UpsertPushSubscription {
        UpsertPushSubscription {
            endpoint: endpoint.to_string(),
            p256dh: p256dh.to_string(),
            auth: auth.to_string(),
        }
    }

    async fn seed_user(pool: &SqlitePool, id: &str) {
        UserRepository::get_or_create(pool, id, &format!("{id}@example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upsert_updates_existing_endpoint_instead_of_duplicating() {
        let pool = test_pool().await;
        seed_user(&pool, "alice").await;
        seed_user(&pool, "bob").await;

        let first = PushSubscriptionRepository::upsert(
            &pool,
            "alice",
            &sub("https://push.example/1", "k1", "a1"),
        )
        .await
        .unwrap();
        let second = PushSubscriptionRepository::upsert(
            &pool,
            "bob",
            &sub("https://push.example/1", "k2", "a2"),
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.user_id, "bob");
        assert_eq!(second.p256dh, "k2");
        assert_eq!(second.auth, "a2");

        let all = PushSubscriptionRepository::find_all(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(PushSubscriptionRepository::find_by_user_id(&pool, "alice")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn find_by_user_id_only_returns_owned_rows() {
        let pool = test_pool().await;
        seed_user(&pool, "alice").await;
        seed_user(&pool, "bob").await;

        for (user, endpoint) in [
            ("alice", "https://push.example/a1"),
            ("alice", "https://push.example/a2"),
            ("bob", "https://push.example/b1"),
        ] {
            PushSubscriptionRepository::upsert(&pool, user, &sub(endpoint, "k", "a"))
                .await
                .unwrap();
        }

        let alice = PushSubscriptionRepository::find_by_user_id(&pool, "alice")
            .await
            .unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|s| s.user_id == "alice"));
        assert_eq!(PushSubscriptionRepository::find_all(&pool).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delete_by_endpoints_is_idempotent() {
        let pool = test_pool().await;
        seed_user(&pool, "alice").await;
        for endpoint in ["https://push.example/1", "https://push.example/2"] {
            PushSubscriptionRepository::upsert(&pool, "alice", &sub(endpoint, "k", "a"))
                .await
                .unwrap();
        }

        let expired = vec![
            "https://push.example/1".to_string(),
            "https://push.example/missing".to_string(),
        ];
        let first = PushSubscriptionRepository::delete_by_endpoints(&pool, &expired)
            .await
            .unwrap();
        let after_first = PushSubscriptionRepository::find_all(&pool).await.unwrap();
        let second = PushSubscriptionRepository::delete_by_endpoints(&pool, &expired)
            .await
            .unwrap();
        let after_second = PushSubscriptionRepository::find_all(&pool).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].endpoint, "https://push.example/2");
        assert_eq!(after_second.len(), after_first.len());
    }

    #[tokio::test]
    async fn delete_by_endpoints_with_empty_list_is_noop() {
        let pool = test_pool().await;
        let removed = PushSubscriptionRepository::delete_by_endpoints(&pool, &[])
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn delete_for_user_does_not_touch_other_owners() {
        let pool = test_pool().await;
        seed_user(&pool, "alice").await;
        seed_user(&pool, "bob").await;
        PushSubscriptionRepository::upsert(&pool, "alice", &sub("https://push.example/1", "k", "a"))
            .await
            .unwrap();

        let removed_by_bob =
            PushSubscriptionRepository::delete_for_user(&pool, "bob", "https://push.example/1")
                .await
                .unwrap();
        let removed_by_alice =
            PushSubscriptionRepository::delete_for_user(&pool, "alice", "https://push.example/1")
                .await
                .unwrap();

        assert!(!removed_by_bob);
        assert!(removed_by_alice);
    }
    #[tokio::test]
    async fn delete_by_endpoints_spans_chunks() {
        let pool = test_pool().await;
        seed_user(&pool, "alice").await;
        let endpoints: Vec<String> = (0..DELETE_CHUNK_SIZE + 3)
            .map(|i| format!("https://push.example/{i}"))
            .collect();
        for endpoint in &endpoints {
            PushSubscriptionRepository::upsert(&pool, "alice", &sub(endpoint, "k", "a"))
                .await
                .unwrap();
        }
        let keep = sub("https://push.example/keep", "k", "a");
        PushSubscriptionRepository::upsert(&pool, "alice", &keep)
            .await
            .unwrap();

        let removed = PushSubscriptionRepository::delete_by_endpoints(&pool, &endpoints)
            .await
            .unwrap();

        assert_eq!(removed, endpoints.len() as u64);
        let left = PushSubscriptionRepository::find_all(&pool).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].endpoint, "https://push.example/keep");
    }
}
