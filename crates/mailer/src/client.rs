use lettre::{
    message::{MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, instrument};

use crate::{Email, MailerConfig, MailerError, TlsMode};

/// Client for sending notification email over SMTP.
///
/// Uses connection pooling for efficient batch sending.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl Mailer {
    /// Create a new client with the given configuration.
    pub fn new(config: MailerConfig) -> Result<Self, MailerError> {
        let creds = Credentials::new(config.username.clone(), config.password().to_string());

        let builder = match config.tls {
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| MailerError::Transport(e.to_string()))?,
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| MailerError::Transport(e.to_string()))?,
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host),
        };

        let transport = builder
            .port(config.smtp_port)
            .credentials(creds)
            .timeout(Some(config.timeout))
            .build();

        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            tls = ?config.tls,
            "Created SMTP client"
        );

        Ok(Self {
            transport,
            from_address: config.from_address,
        })
    }

    /// Address messages are sent from.
    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    /// Send an email.
    #[instrument(skip(self, email), fields(to = ?email.to, subject = %email.subject))]
    pub async fn send(&self, email: &Email) -> Result<(), MailerError> {
        let message = build_message(&self.from_address, email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailerError::Send(e.to_string()))?;

        info!(to = ?email.to, subject = %email.subject, "Email sent successfully");
        Ok(())
    }
}

/// Build a lettre Message from our Email type.
fn build_message(from_address: &str, email: &Email) -> Result<Message, MailerError> {
    let from = from_address
        .parse()
        .map_err(|e| MailerError::InvalidAddress(format!("From: {}", e)))?;

    let mut builder = Message::builder().from(from).subject(&email.subject);

    if email.to.is_empty() {
        return Err(MailerError::BuildEmail("no recipients".to_string()));
    }

    for to in &email.to {
        let addr = to
            .parse()
            .map_err(|e| MailerError::InvalidAddress(format!("To '{}': {}", to, e)))?;
        builder = builder.to(addr);
    }

    let message = if let Some(html) = &email.html_body {
        // Multipart alternative: text + HTML
        builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(email.body.clone()))
                    .singlepart(SinglePart::html(html.clone())),
            )
            .map_err(|e| MailerError::BuildEmail(e.to_string()))?
    } else {
        builder
            .body(email.body.clone())
            .map_err(|e| MailerError::BuildEmail(e.to_string()))?
    };

    Ok(message)
}
