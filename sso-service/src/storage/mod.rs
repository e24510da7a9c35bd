//! Persistence contract consumed by the core services.
//!
//! Implementations hash opaque and refresh tokens before storing them; every
//! method here takes the token as presented by the client.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::models::{App, NewUser, RefreshToken, ResetToken, User, VerificationToken};

pub use error::StorageError;
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts the user and grants `default_permission_id` in one atomic unit.
    ///
    /// Fails with [`StorageError::UserExists`] when the email is taken (case-insensitively).
    async fn save_user_with_permission(
        &self,
        user: NewUser,
        default_permission_id: i64,
    ) -> Result<User, StorageError>;

    async fn user_by_email(&self, email: &str) -> Result<User, StorageError>;

    async fn user_by_id(&self, user_id: i64) -> Result<User, StorageError>;

    async fn update_password(&self, user_id: i64, password_hash: &str)
        -> Result<(), StorageError>;
}

#[async_trait]
pub trait AppStore: Send + Sync {
    async fn app(&self, app_id: i32) -> Result<App, StorageError>;

    async fn app_secret(&self, app_id: i32) -> Result<SecretString, StorageError> {
        Ok(self.app(app_id).await?.secret)
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn save_refresh_token(&self, record: RefreshToken) -> Result<(), StorageError>;

    /// Fails with [`StorageError::RefreshTokenNotFound`] when no live record matches.
    async fn delete_refresh_token(&self, token: &str) -> Result<(), StorageError>;

    /// Expired records report `false`.
    async fn refresh_token_exists(&self, token: &str) -> Result<bool, StorageError>;

    /// Deletes `old_token` and stores `new_record` atomically.
    ///
    /// When `old_token` has no live record nothing is written and
    /// [`StorageError::RefreshTokenNotFound`] is returned.
    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        new_record: RefreshToken,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn user_permissions(&self, user_id: i64) -> Result<Vec<String>, StorageError>;

    /// Fails with [`StorageError::PermissionNotFound`] for an unknown code.
    async fn user_has_permission(&self, user_id: i64, code: &str) -> Result<bool, StorageError>;

    /// Idempotent. Unknown permission ids fail with [`StorageError::PermissionNotFound`].
    async fn grant_permission(&self, user_id: i64, permission_id: i64)
        -> Result<(), StorageError>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Replaces any earlier token of the same user.
    async fn save_verification_token(&self, record: VerificationToken)
        -> Result<(), StorageError>;

    async fn verification_token_for_user(
        &self,
        user_id: i64,
    ) -> Result<VerificationToken, StorageError>;

    /// Activates the owner and deletes the token in one atomic unit, returning the user id.
    ///
    /// Absent and expired tokens both fail with [`StorageError::TokenNotFound`].
    async fn consume_verification_token(&self, token: &str) -> Result<i64, StorageError>;
}

#[async_trait]
pub trait ResetStore: Send + Sync {
    async fn save_reset_token(&self, record: ResetToken) -> Result<(), StorageError>;

    /// Owner of an unused, unexpired reset token.
    async fn reset_token_user(&self, token: &str) -> Result<i64, StorageError>;

    async fn consume_reset_token(&self, token: &str) -> Result<(), StorageError>;
}

/// Everything the services need from persistence.
#[async_trait]
pub trait Storage:
    UserStore + AppStore + RefreshTokenStore + PermissionStore + VerificationStore + ResetStore
{
    async fn health_check(&self) -> Result<(), StorageError>;

    /// Releases pooled resources. Called once during shutdown.
    async fn close(&self);
}
