use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use crate::utils::token::hash_token;

/// Persisted refresh session. Only the SHA-256 digest of the token is kept.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_hash: String,
    pub user_id: i64,
    pub app_id: i32,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(token: &str, user_id: i64, app_id: i32, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token_hash: hash_token(token),
            user_id,
            app_id,
            expires_utc: now + ttl,
            created_utc: now,
        }
    }

    /// Expired records count as absent even before they are deleted.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_utc
    }
}
