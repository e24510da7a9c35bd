//! Core services: token codec, permission authority, credential flows and mail.

pub mod auth;
pub mod email;
pub mod error;
pub mod jwt;
pub mod permission;

pub use auth::{AuthService, AuthSettings, MailOutcome, Registration, TokenPair};
pub use email::{
    reset_link, verification_link, LogMailer, MailKind, Mailer, MockMailer, SentMail, SmtpMailer,
};
pub use error::ServiceError;
pub use jwt::{
    MintedToken, SecretLookupKey, TokenClaims, TokenCodec, TokenError, TokenType, VerifyError,
};
pub use permission::PermissionService;
