pub mod auth;
pub mod cron;
pub mod health;
pub mod push;
pub mod users;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Response;
    use http_body_util::BodyExt;

    use crate::config::Config;
    use crate::services::push::PushSender;
    use crate::AppState;

    pub const JWT_SECRET: &str = "test-jwt-secret";

    /// State backed by an in-memory database and the given push sender.
    pub async fn state(
        push: Option<Arc<dyn PushSender>>,
        cron_secret: Option<&str>,
    ) -> Arc<AppState> {
        let mut config = Config::default();
        config.auth.jwt_secret = JWT_SECRET.to_string();
        config.cron.secret = cron_secret.map(str::to_string);
        config.reminders.utc_offset_hours = 0;
        Arc::new(AppState {
            db: crate::db::test_pool().await,
            config,
            vapid: None,
            push,
        })
    }

    pub async fn json_body(response: Response<Body>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }
}
