use service_core::error::AppError;
use thiserror::Error;

use super::jwt::{TokenError, VerifyError};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User already exists")]
    UserExists,

    #[error("User not found")]
    UserNotFound,

    #[error("App not found")]
    AppNotFound,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing permissions: {}", .0.join(", "))]
    MissingPermissions(Vec<String>),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Email error: {0}")]
    Mail(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UserExists => ServiceError::UserExists,
            StorageError::UserNotFound => ServiceError::UserNotFound,
            StorageError::AppNotFound => ServiceError::AppNotFound,
            StorageError::TokenNotFound => ServiceError::TokenNotFound,
            StorageError::RefreshTokenNotFound => ServiceError::RefreshTokenNotFound,
            StorageError::PermissionNotFound => {
                ServiceError::InvalidInput("unknown permission".to_string())
            }
            fault => ServiceError::Storage(fault),
        }
    }
}

impl From<VerifyError> for ServiceError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Token(e) => ServiceError::Token(e),
            VerifyError::SecretLookup(e) => ServiceError::Storage(e),
            VerifyError::Timeout => {
                ServiceError::Internal(anyhow::anyhow!("app secret lookup timed out"))
            }
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => AppError::ValidationError(e),
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("invalid email or password"))
            }
            ServiceError::UserExists => AppError::Conflict(anyhow::anyhow!("user already exists")),
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("user not found")),
            ServiceError::AppNotFound => AppError::NotFound(anyhow::anyhow!("app not found")),
            ServiceError::TokenNotFound => AppError::NotFound(anyhow::anyhow!("token not found")),
            ServiceError::RefreshTokenNotFound => {
                AppError::NotFound(anyhow::anyhow!("refresh token not found"))
            }
            ServiceError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::MissingPermissions(codes) => AppError::Forbidden(anyhow::anyhow!(
                "missing required permission: {}",
                codes.join(", ")
            )),
            ServiceError::Token(TokenError::Signing(e)) => AppError::InternalError(e.into()),
            ServiceError::Token(e) => AppError::Unauthorized(anyhow::anyhow!(e.to_string())),
            ServiceError::Mail(msg) => AppError::EmailError(msg),
            ServiceError::Storage(e) => AppError::DatabaseError(e.into()),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
