use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppResult;

/// Audience the auth provider stamps on user session tokens.
const SESSION_AUDIENCE: &str = "authenticated";

/// Claims of a session token issued by the auth provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

pub struct AuthService;

impl AuthService {
    /// Verify an HS256 session token and return its claims.
    pub fn verify_session_token(secret: &str, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SESSION_AUDIENCE]);

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )?;
        Ok(token_data.claims)
    }

    /// Check the shared cron secret. With no secret configured every caller is
    /// accepted. Digests are compared so the check does not leak the secret
    /// length or prefix through timing.
    pub fn cron_authorized(expected: Option<&str>, presented: Option<&str>) -> bool {
        let Some(expected) = expected else {
            return true;
        };
        let Some(presented) = presented else {
            return false;
        };
        Sha256::digest(expected.as_bytes()) == Sha256::digest(presented.as_bytes())
    }
}
