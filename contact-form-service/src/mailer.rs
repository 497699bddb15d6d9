use crate::{
    config::loggable_url,
    email_body::render_email_body,
    secrets::{SecretRepository, SMTP_PASSWORD_NAME, SMTP_USERNAME_NAME},
    submission::Submission,
};
use async_once_cell::OnceCell;
use chrono::{SecondsFormat, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::{fmt::Display, time::Duration};
use tracing::{error, info};
use uuid::Uuid;

const SENDER_NAME: &str = "Formulário Advogado";
const SUBJECT_PREFIX: &str = "Nova Consulta Jurídica";

struct SmtpSession {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

/// Formats submissions as emails and hands them to the SMTP transport.
///
/// The transport is built on first use from the configured URL and the SMTP secrets. A failed
/// build is not cached, so a later request retries it.
pub struct MailDispatcher<SecretRepositoryT: SecretRepository> {
    secrets_repository: SecretRepositoryT,
    session: OnceCell<SmtpSession>,
    smtp_url: String,
    smtp_endpoint: String,
    timeout: Duration,
}

impl<SecretRepositoryT: SecretRepository> MailDispatcher<SecretRepositoryT> {
    pub fn new(
        secrets_repository: SecretRepositoryT,
        smtp_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let smtp_url = smtp_url.into();
        Self {
            secrets_repository,
            session: Default::default(),
            smtp_endpoint: loggable_url(&smtp_url),
            smtp_url,
            timeout,
        }
    }

    /// Connects to the SMTP server and runs the greeting handshake. Never fails; problems are
    /// logged and reported as `false`.
    pub async fn check_transport(&self) -> bool {
        let session = match self.session().await {
            Ok(session) => session,
            Err(error) => {
                error!("Unable to set up SMTP transport: {error:#}");
                return false;
            }
        };
        match session.transport.test_connection().await {
            Ok(true) => true,
            Ok(false) => {
                error!(
                    "SMTP server at {} did not answer the handshake",
                    self.smtp_endpoint
                );
                false
            }
            Err(error) => {
                error!("SMTP handshake with {} failed: {error}", self.smtp_endpoint);
                false
            }
        }
    }

    /// Sends one email for `submission` to `recipient`. Makes a single attempt.
    pub async fn send(&self, submission: &Submission<'_>, recipient: &str) -> DeliveryResult {
        let session = match self.session().await {
            Ok(session) => session,
            Err(error) => {
                return DeliveryResult::failed(DeliveryError::new(
                    DeliveryErrorKind::Connection,
                    format!("Unable to set up SMTP transport: {error:#}"),
                ))
            }
        };
        let (message, message_id) = match build_message(submission, &session.sender, recipient)
        {
            Ok(built) => built,
            Err(error) => return DeliveryResult::failed(error),
        };
        match session.transport.send(message).await {
            Ok(response) => {
                info!(
                    "Sent message {message_id} to {recipient}: {}",
                    response.first_line().unwrap_or_default()
                );
                DeliveryResult::delivered(message_id)
            }
            Err(error) => {
                let kind = match error.status() {
                    Some(code) => DeliveryErrorKind::from_reply_code(&code.to_string()),
                    None => DeliveryErrorKind::Connection,
                };
                DeliveryResult::failed(DeliveryError::new(
                    kind,
                    format!("Error sending message: {error}"),
                ))
            }
        }
    }

    async fn session(&self) -> anyhow::Result<&SmtpSession> {
        self.session
            .get_or_try_init(self.initialise_session())
            .await
    }

    async fn initialise_session(&self) -> anyhow::Result<SmtpSession> {
        info!("Setting up SMTP transport for {}", self.smtp_endpoint);
        let username = self.secrets_repository.get_secret(SMTP_USERNAME_NAME).await?;
        let sender_address: Address = username.parse()?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(&self.smtp_url)?
            .timeout(Some(self.timeout))
            .authentication(vec![Mechanism::Plain, Mechanism::Login]);

        // Credentials only go over implicit TLS. A server that insists on authentication over a
        // plain connection will then reject us, which surfaces as a failed transport check.
        if self.smtp_url.starts_with("smtps://") {
            let password = self.secrets_repository.get_secret(SMTP_PASSWORD_NAME).await?;
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(SmtpSession {
            transport: builder.build(),
            sender: Mailbox::new(Some(SENDER_NAME.into()), sender_address),
        })
    }
}

fn build_message(
    submission: &Submission,
    sender: &Mailbox,
    recipient: &str,
) -> Result<(Message, String), DeliveryError> {
    let invalid =
        |description: String| DeliveryError::new(DeliveryErrorKind::InvalidMessage, description);
    let reply_to_address: Address = submission
        .email
        .parse()
        .map_err(|e| invalid(format!("Invalid reply-to address {}: {e}", submission.email)))?;
    let recipient: Mailbox = recipient
        .parse()
        .map_err(|e| invalid(format!("Invalid recipient address {recipient}: {e}")))?;
    let submitted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let body = render_email_body(submission, &submitted_at)
        .map_err(|e| invalid(format!("Error rendering email body: {e}")))?;
    let message_id = format!("<{}@{}>", Uuid::new_v4(), sender.email.domain());

    let message = Message::builder()
        .from(sender.clone())
        .reply_to(Mailbox::new(
            Some(submission.name.into()),
            reply_to_address,
        ))
        .to(recipient)
        .subject(format!(
            "{SUBJECT_PREFIX} - {}",
            submission.area_of_interest.label()
        ))
        .message_id(Some(message_id.clone()))
        .header(ContentType::TEXT_HTML)
        .body(body)
        .map_err(|e| invalid(format!("Error building message: {e}")))?;
    Ok((message, message_id))
}

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub struct DeliveryResult {
    pub delivered: bool,
    pub message_id: Option<String>,
    pub error: Option<DeliveryError>,
}

impl DeliveryResult {
    fn delivered(message_id: String) -> Self {
        Self {
            delivered: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    fn failed(error: DeliveryError) -> Self {
        Self {
            delivered: false,
            message_id: None,
            error: Some(error),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    Authentication,
    Connection,
    Rejected,
    InvalidMessage,
}

impl DeliveryErrorKind {
    /// Classifies a three-digit SMTP reply code.
    fn from_reply_code(code: &str) -> Self {
        match code.parse::<u16>() {
            Ok(530 | 534 | 535 | 538) => DeliveryErrorKind::Authentication,
            Ok(500..=599) => DeliveryErrorKind::Rejected,
            _ => DeliveryErrorKind::Connection,
        }
    }

    /// Stable identifier exposed to clients.
    pub fn code(self) -> &'static str {
        match self {
            DeliveryErrorKind::Authentication => "authentication_failed",
            DeliveryErrorKind::Connection => "connection_failed",
            DeliveryErrorKind::Rejected => "rejected",
            DeliveryErrorKind::InvalidMessage => "invalid_message",
        }
    }
}

#[derive(Debug)]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub description: String,
}

impl DeliveryError {
    fn new(kind: DeliveryErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description, self.kind.code())
    }
}

impl std::error::Error for DeliveryError {}
