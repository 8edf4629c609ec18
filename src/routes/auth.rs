use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::db::{User, UserRepository};
use crate::error::AppError;
use crate::services::auth::AuthService;
use crate::AppState;

/// Extractor for the authenticated user. The local user row is created on
/// the first request carrying a valid session token.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("Missing or invalid Authorization header");
                AppError::Unauthorized
            })?;

        let token = bearer_token(auth_header).ok_or_else(|| {
            tracing::debug!("Authorization header is not a non-empty Bearer token");
            AppError::Unauthorized
        })?;

        let claims = AuthService::verify_session_token(&state.config.auth.jwt_secret, token)
            .map_err(|e| {
                tracing::debug!("Failed to verify session token: {:?}", e);
                e
            })?;

        let user = UserRepository::get_or_create(
            &state.db,
            &claims.sub,
            claims.email.as_deref().unwrap_or_default(),
        )
        .await?;

        tracing::debug!("Authenticated user: {}", user.id);
        Ok(AuthUser(user))
    }
}

/// Token part of a `Bearer <token>` header value (scheme is case-insensitive).
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
