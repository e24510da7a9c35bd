use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_email(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError>;

    async fn send_reset_email(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError>;
}

pub fn verification_link(base_url: &str, token: &str) -> String {
    format!(
        "{}/v1/auth/verify-email?token={}",
        base_url.trim_end_matches('/'),
        token
    )
}

pub fn reset_link(base_url: &str, token: &str) -> String {
    format!(
        "{}/v1/auth/reset-password?token={}",
        base_url.trim_end_matches('/'),
        token
    )
}

#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().clone(),
        );

        let transport = SmtpTransport::starttls_relay(&config.smtp_host)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse::<Mailbox>()
            .map_err(|e| AppError::ConfigError(e.into()))?;

        tracing::info!(host = %config.smtp_host, port = config.smtp_port, "SMTP mailer initialized");

        Ok(Self { transport, from })
    }

    async fn send(
        &self,
        to_email: &str,
        to_name: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), AppError> {
        let to = Mailbox::new(
            Some(to_name.to_string()),
            to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::EmailError(e.to_string()))?,
        );

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AppError::EmailError(e.to_string()))?;

        let transport = self.transport.clone();
        let result = tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, subject = %subject, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification_email(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError> {
        let link = verification_link(base_url, token);

        let html_body = format!(
            r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <p>Hi {to_name},</p>
    <p>Please confirm your email address:</p>
    <p><a href="{link}">Verify email</a></p>
    <p style="color: #666; font-size: 12px;">This link expires in 24 hours.</p>
  </body>
</html>"#
        );
        let plain_body = format!(
            "Hi {to_name},\n\nPlease confirm your email address:\n\n{link}\n\nThis link expires in 24 hours."
        );

        self.send(to_email, to_name, "Verify your email address", plain_body, html_body)
            .await
    }

    async fn send_reset_email(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError> {
        let link = reset_link(base_url, token);

        let html_body = format!(
            r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <p>Hi {to_name},</p>
    <p>We received a request to reset your password:</p>
    <p><a href="{link}">Reset password</a></p>
    <p style="color: #666; font-size: 12px;">This link expires in 1 hour. If you did not ask for it, ignore this email.</p>
  </body>
</html>"#
        );
        let plain_body = format!(
            "Hi {to_name},\n\nWe received a request to reset your password:\n\n{link}\n\nThis link expires in 1 hour. If you did not ask for it, ignore this email."
        );

        self.send(to_email, to_name, "Reset your password", plain_body, html_body)
            .await
    }
}

/// Used when mail delivery is disabled. Logs the recipient, never the token.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification_email(
        &self,
        to_email: &str,
        _to_name: &str,
        _token: &str,
        _base_url: &str,
    ) -> Result<(), AppError> {
        tracing::info!(to = %to_email, "Mail disabled, skipping verification email");
        Ok(())
    }

    async fn send_reset_email(
        &self,
        to_email: &str,
        _to_name: &str,
        _token: &str,
        _base_url: &str,
    ) -> Result<(), AppError> {
        tracing::info!(to = %to_email, "Mail disabled, skipping password reset email");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Verification,
    Reset,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub kind: MailKind,
    pub to_email: String,
    pub to_name: String,
    pub token: String,
    pub link: String,
}

/// Records every message instead of delivering it.
#[derive(Clone, Default)]
pub struct MockMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
    fail: bool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Token of the most recent message of `kind` sent to `to_email`.
    pub fn last_token(&self, kind: MailKind, to_email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.kind == kind && m.to_email == to_email)
            .map(|m| m.token)
    }

    fn record(
        &self,
        kind: MailKind,
        to_email: &str,
        to_name: &str,
        token: &str,
        link: String,
    ) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::EmailError("mock mailer failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMail {
                kind,
                to_email: to_email.to_string(),
                to_name: to_name.to_string(),
                token: token.to_string(),
                link,
            });
        Ok(())
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send_verification_email(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError> {
        self.record(
            MailKind::Verification,
            to_email,
            to_name,
            token,
            verification_link(base_url, token),
        )
    }

    async fn send_reset_email(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError> {
        self.record(
            MailKind::Reset,
            to_email,
            to_name,
            token,
            reset_link(base_url, token),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn mail_config() -> MailConfig {
        MailConfig {
            enabled: true,
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_username: "mailer".to_string(),
            smtp_password: SecretString::new("password".to_string()),
            from_address: "no-reply@example.com".to_string(),
            from_name: "SSO".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
        }
    }

    #[test]
    fn test_smtp_mailer_creation() {
        assert!(SmtpMailer::new(&mail_config()).is_ok());
    }

    #[test]
    fn test_links() {
        assert_eq!(
            verification_link("http://sso.local/", "abc"),
            "http://sso.local/v1/auth/verify-email?token=abc"
        );
        assert_eq!(
            reset_link("http://sso.local", "abc"),
            "http://sso.local/v1/auth/reset-password?token=abc"
        );
    }

    #[tokio::test]
    async fn test_mock_mailer_records_messages() -> Result<(), anyhow::Error> {
        let mailer = MockMailer::new();
        mailer
            .send_verification_email("a@example.com", "A", "t1", "http://x")
            .await?;
        mailer
            .send_reset_email("a@example.com", "A", "t2", "http://x")
            .await?;

        assert_eq!(mailer.sent().len(), 2);
        assert_eq!(
            mailer.last_token(MailKind::Reset, "a@example.com").as_deref(),
            Some("t2")
        );
        assert!(MockMailer::failing()
            .send_reset_email("a@example.com", "A", "t", "http://x")
            .await
            .is_err());
        Ok(())
    }
}
