use thiserror::Error;

/// Storage failures, with "absent" and "duplicate" kept apart from real faults.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("user already exists")]
    UserExists,

    #[error("user not found")]
    UserNotFound,

    #[error("app not found")]
    AppNotFound,

    #[error("token not found")]
    TokenNotFound,

    #[error("refresh token not found")]
    RefreshTokenNotFound,

    #[error("permission not found")]
    PermissionNotFound,

    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StorageError {
    pub fn database(context: &'static str) -> impl FnOnce(sqlx::Error) -> StorageError {
        move |source| StorageError::Database { context, source }
    }

    /// True for infrastructure faults, false for the not-found/duplicate signals.
    pub fn is_fault(&self) -> bool {
        matches!(self, StorageError::Database { .. })
    }
}
