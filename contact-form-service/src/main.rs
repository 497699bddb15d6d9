mod config;
mod email_body;
mod mailer;
mod recaptcha;
mod secrets;
mod settings;
mod submission;

use chrono::{DateTime, Utc};
use config::{loggable_url, ServiceConfig};
use lambda_http::{
    http::StatusCode,
    run, service_fn, Body, Error, Request, RequestPayloadExt, Response,
};
use mailer::{DeliveryError, DeliveryErrorKind, MailDispatcher};
use recaptcha::RecaptchaVerifier;
use secrets::{EnvironmentSecretRepository, SecretRepository};
use serde::{Deserialize, Serialize};
use settings::{SettingsError, SettingsStore};
use std::fmt::Display;
use submission::{ContactFormSubmission, ValidationError};
use tracing::{error, info, warn};

const CONTACT_PATH: &str = "/contact";
const EMAIL_CONFIG_PATH: &str = "/email-config";

const SUCCESS_MESSAGE: &str = "Mensagem enviada com sucesso!";
const GENERIC_FAILURE_MESSAGE: &str = "Erro ao enviar mensagem. Por favor, tente novamente.";
const TRANSPORT_UNAVAILABLE_MESSAGE: &str =
    "Serviço de email indisponível no momento. Por favor, tente novamente mais tarde.";
const AUTHENTICATION_FAILURE_MESSAGE: &str =
    "Não foi possível enviar sua mensagem no momento. Por favor, entre em contato por telefone.";

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = ServiceConfig::from_env();
    info!(
        "Starting with SMTP {}, recipient config at {}, reCAPTCHA {}",
        loggable_url(&config.smtp_url),
        config.email_config_path.display(),
        if config.recaptcha_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    let secrets_repository = EnvironmentSecretRepository::open().await;
    let handler = ContactFormHandler::new(config, secrets_repository);
    run(service_fn(|event| handler.handle(event))).await
}

struct ContactFormHandler<SecretRepositoryT: SecretRepository> {
    settings_store: SettingsStore,
    recaptcha_verifier: RecaptchaVerifier<SecretRepositoryT>,
    mail_dispatcher: MailDispatcher<SecretRepositoryT>,
    recaptcha_enabled: bool,
}

impl<SecretRepositoryT: SecretRepository> ContactFormHandler<SecretRepositoryT> {
    fn new(config: ServiceConfig, secrets_repository: SecretRepositoryT) -> Self
    where
        SecretRepositoryT: Clone,
    {
        Self {
            settings_store: SettingsStore::new(config.email_config_path, config.default_recipient),
            recaptcha_verifier: RecaptchaVerifier::new(
                secrets_repository.clone(),
                config.recaptcha_verify_url,
                config.recaptcha_timeout,
            ),
            mail_dispatcher: MailDispatcher::new(
                secrets_repository,
                config.smtp_url,
                config.smtp_timeout,
            ),
            recaptcha_enabled: config.recaptcha_enabled,
        }
    }

    async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        let path = event.uri().path();
        // The site historically posted to /api/...; both forms are served.
        let route = path.strip_prefix("/api").unwrap_or(path).trim_end_matches('/');
        match (route, event.method().as_str()) {
            (CONTACT_PATH, "POST") => self.handle_contact(&event).await,
            (EMAIL_CONFIG_PATH, "GET") => self.handle_get_email_config().await,
            (EMAIL_CONFIG_PATH, "POST") => self.handle_post_email_config(&event).await,
            (CONTACT_PATH | EMAIL_CONFIG_PATH, method) => {
                warn!("Method {method} not allowed on {path}");
                json_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &MessageBody {
                        message: "Método não permitido.",
                    },
                )
            }
            _ => {
                warn!("No route for {path}");
                json_response(
                    StatusCode::NOT_FOUND,
                    &MessageBody {
                        message: "Não encontrado.",
                    },
                )
            }
        }
    }

    async fn handle_contact(&self, event: &Request) -> Result<Response<Body>, Error> {
        match self.process_submission(event).await {
            Ok(success) => json_response(StatusCode::OK, &success),
            Err(error) => {
                error.log();
                error.into_response()
            }
        }
    }

    async fn process_submission(
        &self,
        event: &Request,
    ) -> Result<ContactFormSuccess, ContactFormError> {
        let raw: ContactFormSubmission = match event.payload() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return Err(ValidationError::MalformedBody("Missing request payload".into()).into())
            }
            Err(error) => return Err(ValidationError::MalformedBody(error.to_string()).into()),
        };
        let submission = raw.validate()?;
        self.verify_anti_abuse_token(submission.anti_abuse_token)
            .await?;

        if !self.mail_dispatcher.check_transport().await {
            return Err(ContactFormError::TransportUnavailable);
        }

        let recipient = self.settings_store.read().await.destination_email;
        let result = self.mail_dispatcher.send(&submission, &recipient).await;
        match (result.delivered, result.error) {
            (true, _) => {}
            (false, Some(error)) => return Err(ContactFormError::Delivery(error)),
            (false, None) => {
                return Err(ContactFormError::Internal(
                    "Delivery failed without an error".into(),
                ))
            }
        }

        info!(
            "Delivered contact form message from {} about {:?} to {recipient}",
            submission.email, submission.area_of_interest
        );
        Ok(ContactFormSuccess {
            success: true,
            message: SUCCESS_MESSAGE,
            message_id: result.message_id,
            timestamp: Utc::now(),
            recipient,
        })
    }

    async fn verify_anti_abuse_token(&self, token: Option<&str>) -> Result<(), ContactFormError> {
        if !self.recaptcha_enabled {
            return Ok(());
        }
        let Some(token) = token else {
            return Err(ContactFormError::AntiAbuse(AntiAbuseFailure::MissingToken));
        };
        if self.recaptcha_verifier.verify(token).await {
            Ok(())
        } else {
            Err(ContactFormError::AntiAbuse(AntiAbuseFailure::Rejected))
        }
    }

    async fn handle_get_email_config(&self) -> Result<Response<Body>, Error> {
        json_response(StatusCode::OK, &self.settings_store.read().await)
    }

    async fn handle_post_email_config(&self, event: &Request) -> Result<Response<Body>, Error> {
        let email = match event.payload::<EmailConfigRequest>() {
            Ok(request) => request.and_then(|r| r.email).unwrap_or_default(),
            Err(error) => {
                warn!("Malformed email config request: {error}");
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &MessageBody {
                        message: "Requisição inválida.",
                    },
                );
            }
        };
        match self.settings_store.write(&email).await {
            Ok(config) => json_response(
                StatusCode::OK,
                &EmailConfigUpdated {
                    message: "Email atualizado com sucesso",
                    email: config.destination_email,
                    updated_at: config.updated_at,
                },
            ),
            Err(error @ (SettingsError::MissingEmail | SettingsError::InvalidEmail(_))) => {
                warn!("Rejected email config update: {error}");
                let message = match error {
                    SettingsError::MissingEmail => "Email é obrigatório",
                    _ => "Email inválido",
                };
                json_response(StatusCode::BAD_REQUEST, &MessageBody { message })
            }
            Err(error) => {
                error!(
                    "Could not save recipient config to {}: {error}",
                    self.settings_store.path().display()
                );
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &MessageBody {
                        message: "Erro interno do servidor",
                    },
                )
            }
        }
    }
}

fn json_response(status: StatusCode, body: &impl Serialize) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json; charset=utf-8")
        .body(serde_json::to_string(body)?.into())?)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactFormSuccess {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    timestamp: DateTime<Utc>,
    recipient: String,
}

#[derive(Serialize)]
struct ContactFormFailure<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct EmailConfigRequest {
    email: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailConfigUpdated {
    message: &'static str,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum AntiAbuseFailure {
    MissingToken,
    Rejected,
}

#[derive(Debug)]
enum ContactFormError {
    Validation(ValidationError),
    AntiAbuse(AntiAbuseFailure),
    TransportUnavailable,
    Delivery(DeliveryError),
    Internal(String),
}

impl ContactFormError {
    fn log(&self) {
        match self {
            ContactFormError::Validation(_) | ContactFormError::AntiAbuse(_) => {
                warn!("Client error processing contact form: {self}");
            }
            _ => {
                error!("Internal error processing contact form: {self}");
            }
        }
    }

    fn into_response(self) -> Result<Response<Body>, Error> {
        let (status, message, error) = match &self {
            ContactFormError::Validation(error) => {
                let message = error.client_message();
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &ContactFormFailure {
                        success: false,
                        message: &message,
                        error: None,
                    },
                );
            }
            ContactFormError::AntiAbuse(AntiAbuseFailure::MissingToken) => (
                StatusCode::BAD_REQUEST,
                "Verificação de segurança necessária.",
                None,
            ),
            ContactFormError::AntiAbuse(AntiAbuseFailure::Rejected) => (
                StatusCode::BAD_REQUEST,
                "Verificação de segurança falhou. Tente novamente.",
                None,
            ),
            ContactFormError::TransportUnavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                TRANSPORT_UNAVAILABLE_MESSAGE,
                Some("transport_unavailable"),
            ),
            ContactFormError::Delivery(error) if error.kind == DeliveryErrorKind::Authentication => (
                StatusCode::INTERNAL_SERVER_ERROR,
                AUTHENTICATION_FAILURE_MESSAGE,
                Some(error.kind.code()),
            ),
            ContactFormError::Delivery(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                GENERIC_FAILURE_MESSAGE,
                Some(error.kind.code()),
            ),
            ContactFormError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                GENERIC_FAILURE_MESSAGE,
                Some("internal_error"),
            ),
        };
        json_response(
            status,
            &ContactFormFailure {
                success: false,
                message,
                error,
            },
        )
    }
}

impl From<ValidationError> for ContactFormError {
    fn from(error: ValidationError) -> Self {
        ContactFormError::Validation(error)
    }
}

impl Display for ContactFormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactFormError::Validation(error) => write!(f, "Validation failed: {error}"),
            ContactFormError::AntiAbuse(AntiAbuseFailure::MissingToken) => {
                write!(f, "Missing reCAPTCHA token")
            }
            ContactFormError::AntiAbuse(AntiAbuseFailure::Rejected) => {
                write!(f, "reCAPTCHA token rejected")
            }
            ContactFormError::TransportUnavailable => write!(f, "SMTP transport unavailable"),
            ContactFormError::Delivery(error) => write!(f, "Delivery failed: {error}"),
            ContactFormError::Internal(description) => write!(f, "{description}"),
        }
    }
}

impl std::error::Error for ContactFormError {}
