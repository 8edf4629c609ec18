use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::models::UpsertPushSubscription;
use crate::db::PushSubscriptionRepository;
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::routes::auth::AuthUser;
use crate::services::push::PushKeys;
use crate::services::reminders::{OnDemandOutcome, ReminderKind, ReminderService};
use crate::AppState;

/// Router for browser push: key discovery, subscription management and the
/// on-demand reminder.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vapid-public-key", get(vapid_public_key))
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/send-reminder", post(send_reminder))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VapidPublicKeyResponse {
    pub public_key: String,
}

async fn vapid_public_key(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<VapidPublicKeyResponse>> {
    let vapid = state
        .vapid
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable(i18n::t("push.not_configured")))?;

    Ok(Json(VapidPublicKeyResponse {
        public_key: vapid.public_key.clone(),
    }))
}

/// Browser `PushSubscription.toJSON()` shape.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: PushKeys,
}

impl SubscribeRequest {
    fn validate(self) -> AppResult<UpsertPushSubscription> {
        let endpoint = self.endpoint.trim();
        let is_https = url::Url::parse(endpoint)
            .map(|url| url.scheme() == "https" && url.host_str().is_some())
            .unwrap_or(false);
        if !is_https {
            return Err(AppError::Validation(i18n::t("push.invalid_endpoint")));
        }

        let p256dh = self.keys.p256dh.trim();
        let auth = self.keys.auth.trim();
        if p256dh.is_empty() || auth.is_empty() {
            return Err(AppError::Validation(i18n::t("push.missing_keys")));
        }

        Ok(UpsertPushSubscription {
            endpoint: endpoint.to_string(),
            p256dh: p256dh.to_string(),
            auth: auth.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionSummary {
    pub id: String,
    pub endpoint: String,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub success: bool,
    pub subscription: SubscriptionSummary,
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> AppResult<Json<SubscribeResponse>> {
    let Json(request) = payload?;
    let input = request.validate()?;
    let subscription = PushSubscriptionRepository::upsert(&state.db, &user.id, &input).await?;

    tracing::info!(user_id = %user.id, "Registered push subscription {}", subscription.id);

    Ok(Json(SubscribeResponse {
        success: true,
        subscription: SubscriptionSummary {
            id: subscription.id,
            endpoint: subscription.endpoint,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub success: bool,
    pub removed: bool,
}

/// Removing an endpoint that is not registered (or belongs to someone else)
/// still succeeds with `removed: false`.
async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> AppResult<Json<UnsubscribeResponse>> {
    let Json(request) = payload?;
    let removed =
        PushSubscriptionRepository::delete_for_user(&state.db, &user.id, request.endpoint.trim())
            .await?;

    tracing::debug!(user_id = %user.id, removed, "Push unsubscribe");

    Ok(Json(UnsubscribeResponse {
        success: true,
        removed,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendReminderRequest {
    #[serde(default)]
    pub kind: ReminderKind,
}

impl SendReminderRequest {
    /// An empty body means the default reminder; anything else must parse.
    fn from_body(body: &[u8]) -> AppResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| AppError::BadRequest(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReminderResponse {
    pub success: bool,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
}

#[derive(Debug, Serialize)]
struct NotSubscribedResponse {
    success: bool,
    error: String,
}

async fn send_reminder(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    body: Bytes,
) -> AppResult<Response> {
    let kind = SendReminderRequest::from_body(&body)?.kind;

    let outcome = ReminderService::new(&state)
        .run_on_demand(&user.id, kind, Utc::now())
        .await?;

    let response = match outcome {
        OnDemandOutcome::NotSubscribed => (
            StatusCode::NOT_FOUND,
            Json(NotSubscribedResponse {
                success: false,
                error: i18n::tr(
                    Some(state.config.reminders.lang.as_str()),
                    "push.not_subscribed",
                    None,
                ),
            }),
        )
            .into_response(),
        OnDemandOutcome::Sent(result) => {
            tracing::info!(
                user_id = %user.id,
                kind = kind.as_str(),
                "On-demand reminder: sent={}, failed={}, expired={}",
                result.successful,
                result.failed,
                result.expired.len()
            );
            Json(SendReminderResponse {
                success: true,
                notifications_sent: result.successful,
                notifications_failed: result.failed,
            })
            .into_response()
        }
    };

    Ok(response)
}
