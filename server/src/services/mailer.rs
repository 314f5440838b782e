/// Outbound email for the verification gate.

use crate::config::SmtpSettings;
use crate::error::{AppError, Result};
use crate::services::identity::CODE_TTL_MINUTES;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_code(&self, email: &str, code: &str) -> Result<()>;
}

pub fn verification_subject() -> &'static str {
    "Your admission portal verification code"
}

pub fn verification_body(code: &str) -> String {
    format!(
        "Hello,\n\n\
         Thank you for signing up. Use the code below to confirm your email address:\n\n\
         {code}\n\n\
         This code is valid for {CODE_TTL_MINUTES} minutes.\n\n\
         If you didn't request this, you can safely ignore this email.\n"
    )
}

/// SMTP delivery with STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid SMTP_FROM: {}", e)))?;

        let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| AppError::Internal(format!("Invalid SMTP host: {}", e)))?
            .port(settings.port)
            .timeout(Some(SMTP_TIMEOUT));

        let builder = match (&settings.user, &settings.password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        log::info!(
            "Email delivery via SMTP {}:{} (STARTTLS)",
            settings.host,
            settings.port
        );

        Ok(SmtpMailer {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification_code(&self, email: &str, code: &str) -> Result<()> {
        let to: Mailbox = email
            .parse()
            .map_err(|e| AppError::Upstream(format!("Invalid recipient {}: {}", email, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(verification_subject())
            .header(ContentType::TEXT_PLAIN)
            .body(verification_body(code))
            .map_err(|e| AppError::Upstream(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Upstream(format!("SMTP delivery failed: {}", e)))?;

        log::info!("Verification email sent to {}", email);
        Ok(())
    }
}

/// Used when SMTP is not configured. Every send fails so callers take the
/// soft-warning path.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send_verification_code(&self, _email: &str, _code: &str) -> Result<()> {
        Err(AppError::Upstream("email delivery not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_mentions_code_and_validity() {
        let body = verification_body("123456");
        assert!(body.contains("123456"));
        assert!(body.contains("10 minutes"));
    }

    #[tokio::test]
    async fn test_disabled_mailer_reports_upstream() {
        let result = DisabledMailer
            .send_verification_code("alice@example.com", "123456")
            .await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
    }

    #[test]
    fn test_smtp_mailer_rejects_bad_sender() {
        let settings = SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            user: None,
            password: None,
            from: "not an address".into(),
        };
        assert!(SmtpMailer::from_settings(&settings).is_err());
    }
}
