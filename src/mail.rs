use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{
    config::{EmailBackend, EmailConfig},
    error::AppError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl OutgoingEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html_body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html_body: html_body.into(),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), AppError>;
}

pub fn build_message(from: &Mailbox, email: &OutgoingEmail) -> Result<Message, AppError> {
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|e| AppError::Mail(format!("Invalid recipient {}: {}", email.to, e)))?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(email.html_body.clone())
        .map_err(|e| AppError::Mail(e.to_string()))
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self, AppError> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| AppError::Mail(format!("Invalid sender address: {}", e)))?;

        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| AppError::Mail(e.to_string()))?
        } else {
            // Local relays (Mailpit, MailHog) speak plain SMTP
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = builder.port(config.port);
        let builder = match (&config.host_user, &config.host_password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), AppError> {
        let message = build_message(&self.from, &email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Mail(e.to_string()))?;

        tracing::info!("Sent email '{}' to {}", email.subject, email.to);
        Ok(())
    }
}

// Writes messages to the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), AppError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email (console backend):\n{}",
            email.html_body
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryMailer {
    outbox: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> Vec<OutgoingEmail> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }

    pub fn last_sent_to(&self, address: &str) -> Option<OutgoingEmail> {
        self.outbox().into_iter().rev().find(|email| email.to == address)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), AppError> {
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| AppError::Mail("Outbox lock poisoned".to_string()))?;
        outbox.push(email);
        Ok(())
    }
}

pub fn mailer_from_config(config: &EmailConfig) -> Result<Arc<dyn Mailer>, AppError> {
    let mailer: Arc<dyn Mailer> = match config.backend {
        EmailBackend::Smtp => Arc::new(SmtpMailer::new(config)?),
        EmailBackend::Console => Arc::new(ConsoleMailer),
        EmailBackend::Memory => Arc::new(MemoryMailer::new()),
    };
    Ok(mailer)
}

// Pulls the first `href` target out of an HTML mail body
#[cfg(test)]
pub(crate) fn extract_link(html_body: &str) -> Option<String> {
    let start = html_body.find("href=\"")? + "href=\"".len();
    let end = html_body[start..].find('"')? + start;
    Some(html_body[start..end].replace("&amp;", "&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_message() {
        let from: Mailbox = "Portal <noreply@example.com>".parse().unwrap();
        let email = OutgoingEmail::new("user@example.com", "Welcome", "<p>Hello</p>");

        let message = build_message(&from, &email).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Subject: Welcome"));
        assert!(formatted.contains("To: user@example.com"));
        assert!(formatted.contains("text/html"));
    }

    #[test]
    fn test_build_message_invalid_recipient() {
        let from: Mailbox = "noreply@example.com".parse().unwrap();
        let email = OutgoingEmail::new("not-an-email", "Subject", "<p>Body</p>");

        let result = build_message(&from, &email);
        assert!(matches!(result, Err(AppError::Mail(_))));
    }

    #[test]
    fn test_smtp_mailer_rejects_invalid_sender() {
        let config = EmailConfig {
            backend: EmailBackend::Smtp,
            from_address: "bad-from-email".to_string(),
            ..EmailConfig::default()
        };
        assert!(SmtpMailer::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_memory_mailer_records_messages() {
        let mailer = MemoryMailer::new();
        mailer
            .send(OutgoingEmail::new("a@example.com", "First", "one"))
            .await
            .unwrap();
        mailer
            .send(OutgoingEmail::new("a@example.com", "Second", "two"))
            .await
            .unwrap();

        assert_eq!(mailer.outbox().len(), 2);
        assert_eq!(mailer.last_sent_to("a@example.com").unwrap().subject, "Second");
        assert!(mailer.last_sent_to("b@example.com").is_none());
    }

    #[tokio::test]
    async fn test_console_mailer_always_succeeds() {
        let result = ConsoleMailer
            .send(OutgoingEmail::new("a@example.com", "Hi", "<p>Hi</p>"))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_extract_link() {
        let body = r#"<p>Click <a href="http://localhost:3000/activate/MTI/abc.def/">here</a></p>"#;
        assert_eq!(
            extract_link(body).as_deref(),
            Some("http://localhost:3000/activate/MTI/abc.def/")
        );
        assert!(extract_link("<p>no link</p>").is_none());
    }
}
