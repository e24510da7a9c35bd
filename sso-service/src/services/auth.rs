use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::{MailConfig, TokenConfig},
    models::{App, NewUser, RefreshToken, ResetToken, User, UserProfile, VerificationToken},
    services::{
        jwt::{TokenCodec, TokenType},
        Mailer, PermissionService, ServiceError,
    },
    storage::{Storage, StorageError},
    utils::{
        normalize_email, token::generate_token, validate_password, validate_registration,
        Password, PasswordHashString, PasswordHasher,
    },
};

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If this email is registered, you will receive a reset link";

/// Tunables of the credential flows.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub access_ttl: chrono::Duration,
    pub refresh_ttl: chrono::Duration,
    pub app_secret_lookup_timeout: Duration,
    pub default_permission_id: i64,
    /// Base of the links sent by mail.
    pub public_base_url: String,
}

impl AuthSettings {
    pub fn from_config(tokens: &TokenConfig, mail: &MailConfig) -> Self {
        Self {
            access_ttl: tokens.access_ttl(),
            refresh_ttl: tokens.refresh_ttl(),
            app_secret_lookup_timeout: tokens.app_secret_lookup_timeout(),
            default_permission_id: tokens.default_permission_id,
            public_base_url: mail.public_base_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub email: String,
    pub password: String,
}

/// Access and refresh token minted together; `expires_at` is the access token's expiry.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of the flows that hand a token to the mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailOutcome {
    pub success: bool,
    pub message: String,
    /// Unix seconds; 0 when no token was issued.
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct AuthService {
    storage: Arc<dyn Storage>,
    permissions: PermissionService,
    codec: TokenCodec,
    mailer: Arc<dyn Mailer>,
    hasher: PasswordHasher,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        storage: Arc<dyn Storage>,
        permissions: PermissionService,
        codec: TokenCodec,
        mailer: Arc<dyn Mailer>,
        hasher: PasswordHasher,
        settings: AuthSettings,
    ) -> Self {
        Self {
            storage,
            permissions,
            codec,
            mailer,
            hasher,
            settings,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn register(&self, req: Registration) -> Result<UserProfile, ServiceError> {
        let email = normalize_email(&req.email);
        validate_registration(&email, &req.password)?;

        let password_hash = self.hash_password(req.password).await?;

        let user = self
            .storage
            .save_user_with_permission(
                NewUser {
                    email,
                    password_hash: password_hash.into_string(),
                    name: req.name,
                    phone: req.phone,
                    address: req.address,
                },
                self.settings.default_permission_id,
            )
            .await?;

        tracing::info!(user_id = user.id, "User registered");

        Ok(user.into())
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        app_id: i32,
    ) -> Result<TokenPair, ServiceError> {
        let user = match self.storage.user_by_email(&normalize_email(email)).await {
            Ok(user) => user,
            Err(StorageError::UserNotFound) => {
                tracing::warn!(app_id, "Login attempt for unknown email");
                return Err(ServiceError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        if !self
            .verify_password(password.to_string(), user.password_hash.clone())
            .await?
        {
            tracing::warn!(user_id = user.id, app_id, "Login attempt with wrong password");
            return Err(ServiceError::InvalidCredentials);
        }

        let app = self.storage.app(app_id).await?;
        let permissions = self.storage.user_permissions(user.id).await?;
        let pair = self.mint_pair(&user, &app, &permissions)?;

        self.storage
            .save_refresh_token(RefreshToken::new(
                &pair.refresh_token,
                user.id,
                app.id,
                self.settings.refresh_ttl,
            ))
            .await?;

        if !self.storage.refresh_token_exists(&pair.refresh_token).await? {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "refresh token missing right after save"
            )));
        }

        tracing::info!(user_id = user.id, app_id, "User logged in");

        Ok(pair)
    }

    /// Verifies `refresh_token`, mints a new pair with fresh permissions and
    /// rotates the stored record. The presented token is single-use.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self
            .codec
            .verify_with(
                self.storage.as_ref(),
                refresh_token,
                TokenType::Refresh,
                self.settings.app_secret_lookup_timeout,
            )
            .await?;

        let user = match self.storage.user_by_id(claims.user_id).await {
            Ok(user) => user,
            Err(StorageError::UserNotFound) => return Err(ServiceError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        let app = self.storage.app(claims.app_id).await?;
        let permissions = self.storage.user_permissions(user.id).await?;

        let pair = self.mint_pair(&user, &app, &permissions)?;

        self.storage
            .rotate_refresh_token(
                refresh_token,
                RefreshToken::new(
                    &pair.refresh_token,
                    user.id,
                    app.id,
                    self.settings.refresh_ttl,
                ),
            )
            .await?;

        tracing::info!(user_id = user.id, app_id = app.id, "Refresh token rotated");

        Ok(pair)
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), ServiceError> {
        self.storage.delete_refresh_token(refresh_token).await?;
        tracing::info!("Refresh token revoked");
        Ok(())
    }

    /// Profile from the live user row, not from the token.
    pub async fn user_info(&self, access_token: &str) -> Result<UserProfile, ServiceError> {
        let claims = self
            .codec
            .verify_with(
                self.storage.as_ref(),
                access_token,
                TokenType::Access,
                self.settings.app_secret_lookup_timeout,
            )
            .await?;

        let user = self.storage.user_by_id(claims.user_id).await?;
        Ok(user.into())
    }

    pub async fn send_verification_email(
        &self,
        user_id: i64,
        app_id: i32,
    ) -> Result<MailOutcome, ServiceError> {
        let user = self.storage.user_by_id(user_id).await?;

        if user.activated {
            tracing::info!(user_id, "User already activated");
            return Ok(MailOutcome {
                success: false,
                message: "User already activated".to_string(),
                expires_at: 0,
            });
        }

        let token = generate_token();
        let record = VerificationToken::new(&token, user.id);
        let expires_at = record.expires_utc.timestamp();
        self.storage.save_verification_token(record).await?;

        self.mailer
            .send_verification_email(&user.email, &user.name, &token, &self.settings.public_base_url)
            .await
            .map_err(|e| ServiceError::Mail(e.to_string()))?;

        tracing::info!(user_id, app_id, "Verification email sent");

        Ok(MailOutcome {
            success: true,
            message: "Verification email sent successfully".to_string(),
            expires_at,
        })
    }

    /// Activates the token's owner and returns their id.
    pub async fn verify_email(&self, token: &str) -> Result<i64, ServiceError> {
        if token.is_empty() {
            return Err(ServiceError::InvalidInput(
                "verification token is required".to_string(),
            ));
        }

        let user_id = self.storage.consume_verification_token(token).await?;
        tracing::info!(user_id, "Email verified");
        Ok(user_id)
    }

    /// Answers identically whether or not `email` is registered.
    pub async fn forgot_password(
        &self,
        email: &str,
        app_id: i32,
    ) -> Result<MailOutcome, ServiceError> {
        let expires_utc = ResetToken::default_expiry();
        let outcome = MailOutcome {
            success: true,
            message: FORGOT_PASSWORD_MESSAGE.to_string(),
            expires_at: expires_utc.timestamp(),
        };

        let user = match self.storage.user_by_email(&normalize_email(email)).await {
            Ok(user) => user,
            Err(StorageError::UserNotFound) => {
                tracing::warn!(app_id, "Password reset requested for unknown email");
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        let token = generate_token();
        self.storage
            .save_reset_token(ResetToken::new(&token, user.id, expires_utc))
            .await?;

        // A delivery failure must look the same as an unknown address.
        if let Err(e) = self
            .mailer
            .send_reset_email(&user.email, &user.name, &token, &self.settings.public_base_url)
            .await
        {
            tracing::error!(user_id = user.id, error = %e, "Failed to send password reset email");
            return Ok(outcome);
        }

        tracing::info!(user_id = user.id, app_id, "Password reset email sent");
        Ok(outcome)
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ServiceError> {
        if token.is_empty() {
            return Err(ServiceError::InvalidInput("reset token is required".to_string()));
        }
        validate_password(new_password)?;

        let user_id = self.storage.reset_token_user(token).await?;
        let password_hash = self.hash_password(new_password.to_string()).await?;
        self.storage
            .update_password(user_id, password_hash.as_str())
            .await?;

        if let Err(e) = self.storage.consume_reset_token(token).await {
            tracing::warn!(user_id, error = %e, "Failed to consume reset token");
        }

        tracing::info!(user_id, "Password reset");
        Ok(())
    }

    pub fn permissions(&self) -> &PermissionService {
        &self.permissions
    }

    fn mint_pair(
        &self,
        user: &User,
        app: &App,
        permissions: &[String],
    ) -> Result<TokenPair, ServiceError> {
        let access = self
            .codec
            .mint_access(user, app, permissions, self.settings.access_ttl)?;
        let refresh = self
            .codec
            .mint_refresh(user, app, self.settings.refresh_ttl)?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_at: access.expires_at,
        })
    }

    async fn hash_password(&self, password: String) -> Result<PasswordHashString, ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&Password::new(password)))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?
            .map_err(ServiceError::Internal)
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool, ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || {
            hasher
                .verify(&Password::new(password), &PasswordHashString::new(hash))
                .is_ok()
        })
        .await
        .map_err(|e| ServiceError::Internal(e.into()))
    }
}
