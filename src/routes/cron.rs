use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::routes::auth::bearer_token;
use crate::services::auth::AuthService;
use crate::services::reminders::ReminderService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/reminders", get(send_scheduled_reminders))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronReminderResponse {
    pub success: bool,
    pub users_notified: usize,
    pub reminder_time: &'static str,
    pub timestamp: String,
}

/// Entry point for the external scheduler (twice a day).
async fn send_scheduled_reminders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<CronReminderResponse>> {
    let presented = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);

    if !AuthService::cron_authorized(state.config.cron.secret.as_deref(), presented) {
        tracing::warn!("Rejected cron reminder request: bad or missing secret");
        return Err(AppError::Unauthorized);
    }

    let now = Utc::now();
    let run = ReminderService::new(&state).run_scheduled(now).await?;

    tracing::info!(
        "Cron reminders: notified={}, failed={}, expired={}, bracket={}",
        run.users_notified,
        run.result.failed,
        run.result.expired.len(),
        run.bracket.as_str()
    );

    Ok(Json(CronReminderResponse {
        success: true,
        users_notified: run.users_notified,
        reminder_time: run.bracket.as_str(),
        timestamp: now.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::UpsertPushSubscription;
    use crate::db::{PushSubscriptionRepository, UserRepository};
    use crate::routes::testing::{json_body, state};
    use crate::services::push::testing::FakeSender;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/cron/reminders");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api/cron", router()).with_state(state)
    }

    #[tokio::test]
    async fn rejects_wrong_secret_before_any_delivery() {
        let sender = FakeSender::new();
        let state = state(Some(sender.clone()), Some("cron-secret")).await;
        UserRepository::get_or_create(&state.db, "alice", "").await.unwrap();
        PushSubscriptionRepository::upsert(
            &state.db,
            "alice",
            &UpsertPushSubscription {
                endpoint: "https://push.example/a".to_string(),
                p256dh: "k".to_string(),
                auth: "a".to_string(),
            },
        )
        .await
        .unwrap();

        let missing = app(state.clone()).oneshot(request(None)).await.unwrap();
        let wrong = app(state.clone())
            .oneshot(request(Some("Bearer nope")))
            .await
            .unwrap();

        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(sender.calls(), 0);
    }

    #[tokio::test]
    async fn accepts_matching_secret() {
        let sender = FakeSender::new();
        let state = state(Some(sender.clone()), Some("cron-secret")).await;

        let response = app(state)
            .oneshot(request(Some("Bearer cron-secret")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["usersNotified"], 0);
        assert!(body["reminderTime"].is_string());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn open_when_no_secret_configured() {
        let state = state(Some(FakeSender::new()), None).await;

        let response = app(state).oneshot(request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn config_error_without_push() {
        let state = state(None, None).await;

        let response = app(state).oneshot(request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "CONFIG_ERROR");
    }
}
