//! Per-app HS256 token codec.
//!
//! Every token is signed with the secret of the app named in its `app_id`
//! claim, so verification runs in two steps: [`TokenCodec::decode_unverified`]
//! yields a [`SecretLookupKey`], the caller fetches that app's secret, then
//! [`TokenCodec::validate`] checks signature, expiry, issuer and token type.
//! [`TokenCodec::verify_with`] composes the two steps against an [`AppStore`].

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{App, User};
use crate::storage::{AppStore, StorageError};

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Signed payload of access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub app_id: i32,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Permission codes at mint time. Access tokens only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    /// Issuer
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Subject (user ID)
    pub sub: String,
    /// Unique token id
    pub jti: String,
}

impl TokenClaims {
    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions.iter().any(|p| p == code)
    }
}

/// A freshly signed token and its expiry.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("invalid token claims")]
    ClaimsInvalid,

    #[error("not an access token")]
    NotAccessToken,

    #[error("not a refresh token")]
    NotRefreshToken,

    #[error("malformed token")]
    Malformed,

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Failure of the composed decode, lookup and validate sequence.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("app secret lookup failed: {0}")]
    SecretLookup(#[source] StorageError),

    #[error("app secret lookup timed out")]
    Timeout,
}

/// Output of [`TokenCodec::decode_unverified`].
///
/// Exposes nothing but the claimed app id: an unverified token may only
/// select which secret to verify against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretLookupKey {
    app_id: i32,
}

impl SecretLookupKey {
    pub fn app_id(&self) -> i32 {
        self.app_id
    }
}

#[derive(Deserialize)]
struct AppIdClaim {
    app_id: i32,
}

#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
}

impl TokenCodec {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    /// Access token carrying `permissions` as a point-in-time snapshot.
    pub fn mint_access(
        &self,
        user: &User,
        app: &App,
        permissions: &[String],
        ttl: Duration,
    ) -> Result<MintedToken, TokenError> {
        self.mint(user, app, TokenType::Access, permissions.to_vec(), ttl)
    }

    pub fn mint_refresh(
        &self,
        user: &User,
        app: &App,
        ttl: Duration,
    ) -> Result<MintedToken, TokenError> {
        self.mint(user, app, TokenType::Refresh, Vec::new(), ttl)
    }

    fn mint(
        &self,
        user: &User,
        app: &App,
        token_type: TokenType,
        permissions: Vec<String>,
        ttl: Duration,
    ) -> Result<MintedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now + ttl;

        let claims = TokenClaims {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            app_id: app.id,
            token_type,
            permissions,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            sub: user.id.to_string(),
            jti: Uuid::new_v4().to_string(),
        };

        let key = EncodingKey::from_secret(app.secret.expose_secret().as_bytes());
        let token = encode(&Header::new(SIGNING_ALGORITHM), &claims, &key)
            .map_err(TokenError::Signing)?;

        Ok(MintedToken { token, expires_at })
    }

    /// Verifies signature, expiry, issuer and type against `secret`.
    pub fn validate(
        &self,
        token: &str,
        secret: &SecretString,
        expected: TokenType,
    ) -> Result<TokenClaims, TokenError> {
        // Unparseable headers and foreign algorithms (including "none") never reach claim checks
        match decode_header(token) {
            Ok(header) if header.alg == SIGNING_ALGORITHM => {}
            _ => return Err(TokenError::Invalid),
        }

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.algorithms = vec![SIGNING_ALGORITHM];
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);

        let key = DecodingKey::from_secret(secret.expose_secret().as_bytes());
        let claims = decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| classify(e.kind()))?
            .claims;

        if claims.sub != claims.user_id.to_string() {
            return Err(TokenError::ClaimsInvalid);
        }

        match (expected, claims.token_type) {
            (TokenType::Access, TokenType::Refresh) => Err(TokenError::NotAccessToken),
            (TokenType::Refresh, TokenType::Access) => Err(TokenError::NotRefreshToken),
            _ => Ok(claims),
        }
    }

    /// Reads the claimed app id without checking the signature.
    pub fn decode_unverified(&self, token: &str) -> Result<SecretLookupKey, TokenError> {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<AppIdClaim>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| SecretLookupKey {
                app_id: data.claims.app_id,
            })
            .map_err(|_| TokenError::Malformed)
    }

    /// Two-phase verification: claimed app id, that app's secret, then [`Self::validate`].
    ///
    /// A token naming an unknown app is reported as [`TokenError::Invalid`].
    pub async fn verify_with<A>(
        &self,
        apps: &A,
        token: &str,
        expected: TokenType,
        lookup_timeout: StdDuration,
    ) -> Result<TokenClaims, VerifyError>
    where
        A: AppStore + ?Sized,
    {
        let key = self.decode_unverified(token)?;

        let secret = match tokio::time::timeout(lookup_timeout, apps.app_secret(key.app_id()))
            .await
        {
            Ok(Ok(secret)) => secret,
            Ok(Err(StorageError::AppNotFound)) => return Err(TokenError::Invalid.into()),
            Ok(Err(e)) => return Err(VerifyError::SecretLookup(e)),
            Err(_) => return Err(VerifyError::Timeout),
        };

        Ok(self.validate(token, &secret, expected)?)
    }
}

fn classify(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::Json(_)
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature => TokenError::ClaimsInvalid,
        _ => TokenError::Invalid,
    }
}
