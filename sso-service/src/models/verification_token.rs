use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use crate::utils::token::hash_token;

pub const VERIFICATION_TOKEN_TTL_HOURS: i64 = 24;

/// Email verification token. At most one exists per user.
#[derive(Debug, Clone, FromRow)]
pub struct VerificationToken {
    pub token_hash: String,
    pub user_id: i64,
    pub expires_utc: DateTime<Utc>,
}

impl VerificationToken {
    pub fn new(token: &str, user_id: i64) -> Self {
        Self {
            token_hash: hash_token(token),
            user_id,
            expires_utc: Utc::now() + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_utc
    }
}
