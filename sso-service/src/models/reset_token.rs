use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use crate::utils::token::hash_token;

pub const RESET_TOKEN_TTL_HOURS: i64 = 1;

/// Password reset token.
#[derive(Debug, Clone, FromRow)]
pub struct ResetToken {
    pub token_hash: String,
    pub user_id: i64,
    pub expires_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
}

impl ResetToken {
    pub fn new(token: &str, user_id: i64, expires_utc: DateTime<Utc>) -> Self {
        Self {
            token_hash: hash_token(token),
            user_id,
            expires_utc,
            used_utc: None,
        }
    }

    pub fn default_expiry() -> DateTime<Utc> {
        Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS)
    }

    /// Unused and unexpired.
    pub fn is_valid(&self) -> bool {
        self.used_utc.is_none() && Utc::now() < self.expires_utc
    }
}
