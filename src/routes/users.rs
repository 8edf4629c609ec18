use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{User, UserRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

const MAX_FLAG_LEN: usize = 64;

/// Router for the signed-in user's own profile.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(get_me))
        .route("/me/onboarding", post(complete_onboarding_step))
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub onboarding: Vec<String>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        let onboarding = u.onboarding_flags().into_iter().collect();
        Self {
            id: u.id,
            email: u.email,
            onboarding,
        }
    }
}

async fn get_me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(user.into())
}

#[derive(Debug, Deserialize)]
pub struct OnboardingRequest {
    pub flag: String,
}

/// Record a completed onboarding step (e.g. the notifications prompt).
async fn complete_onboarding_step(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<OnboardingRequest>, JsonRejection>,
) -> AppResult<Json<UserResponse>> {
    let Json(request) = payload?;
    let flag = request.flag.trim();
    if flag.is_empty() || flag.len() > MAX_FLAG_LEN {
        return Err(AppError::Validation(format!(
            "onboarding flag must be 1..={} characters",
            MAX_FLAG_LEN
        )));
    }

    let updated = UserRepository::mark_onboarding_completed(&state.db, &user.id, flag).await?;
    Ok(Json(updated.into()))
}
