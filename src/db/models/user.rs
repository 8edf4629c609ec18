use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Local mirror of the auth provider's user. `id` is the provider's stable
/// subject id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    /// JSON array of completed onboarding flags.
    pub onboarding: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    /// Decoded onboarding flags. A malformed column reads as "nothing completed".
    pub fn onboarding_flags(&self) -> BTreeSet<String> {
        serde_json::from_str(&self.onboarding).unwrap_or_else(|e| {
            tracing::warn!(user_id = %self.id, "Malformed onboarding flags: {}", e);
            BTreeSet::new()
        })
    }
}
