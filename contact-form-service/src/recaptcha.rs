use crate::secrets::{SecretRepository, RECAPTCHA_SECRET_NAME};
use async_once_cell::OnceCell;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, time::Duration};
use tracing::{error, warn};

/// Checks reCAPTCHA response tokens against the verification service.
///
/// Fails closed: a token is only accepted when the service positively confirms it.
pub struct RecaptchaVerifier<SecretRepositoryT: SecretRepository> {
    secrets_repository: SecretRepositoryT,
    secret: OnceCell<String>,
    client: Client,
    verify_url: String,
    timeout: Duration,
}

impl<SecretRepositoryT: SecretRepository> RecaptchaVerifier<SecretRepositoryT> {
    pub fn new(
        secrets_repository: SecretRepositoryT,
        verify_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            secrets_repository,
            secret: Default::default(),
            client: Client::new(),
            verify_url: verify_url.into(),
            timeout,
        }
    }

    pub async fn verify(&self, token: &str) -> bool {
        match self.verify_token(token).await {
            Ok(()) => true,
            Err(error @ RecaptchaError::Rejected(_)) => {
                warn!("reCAPTCHA token not accepted: {error}");
                false
            }
            Err(error) => {
                error!("Could not verify reCAPTCHA token, rejecting request: {error}");
                false
            }
        }
    }

    async fn verify_token(&self, token: &str) -> Result<(), RecaptchaError> {
        let secret = self
            .secret
            .get_or_try_init(self.secrets_repository.get_secret(RECAPTCHA_SECRET_NAME))
            .await
            .map_err(|e| RecaptchaError::MissingSecret(e.to_string()))?;
        let payload = RecaptchaVerifyPayload {
            secret,
            response: token,
        };
        let response = self
            .client
            .post(&self.verify_url)
            .timeout(self.timeout)
            .form(&payload)
            .send()
            .await
            .map_err(RecaptchaError::Request)?;
        if response.status() != StatusCode::OK {
            return Err(RecaptchaError::UnexpectedStatus(response.status()));
        }
        let response_body: RecaptchaResponse =
            response.json().await.map_err(RecaptchaError::Request)?;
        if response_body.success {
            Ok(())
        } else {
            Err(RecaptchaError::Rejected(response_body.error_codes))
        }
    }
}

#[derive(Serialize)]
struct RecaptchaVerifyPayload<'a> {
    secret: &'a str,
    response: &'a str,
}

#[derive(Deserialize)]
struct RecaptchaResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

#[derive(Debug)]
enum RecaptchaError {
    MissingSecret(String),
    Request(reqwest::Error),
    UnexpectedStatus(StatusCode),
    Rejected(Vec<String>),
}

impl Display for RecaptchaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecaptchaError::MissingSecret(description) => {
                write!(f, "No reCAPTCHA secret: {description}")
            }
            RecaptchaError::Request(error) => write!(f, "Request failed: {error}"),
            RecaptchaError::UnexpectedStatus(status) => {
                write!(f, "Verification service answered {status}")
            }
            RecaptchaError::Rejected(error_codes) => {
                write!(f, "Rejected with error codes {error_codes:?}")
            }
        }
    }
}

impl std::error::Error for RecaptchaError {}

#[cfg(test)]
mod tests {
    use super::RecaptchaVerifier;
    use crate::secrets::{
        test_support::{FakeSecretRepository, FAKE_RECAPTCHA_SECRET},
        SecretRepository, RECAPTCHA_SECRET_NAME,
    };
    use googletest::prelude::*;
    use std::{sync::atomic::Ordering, time::Duration};
    use test_support::fake_recaptcha::FakeRecaptcha;

    const CORRECT_TOKEN: &str = "correct token";

    async fn verifier_for(verify_url: String) -> RecaptchaVerifier<FakeSecretRepository> {
        RecaptchaVerifier::new(
            FakeSecretRepository::open().await,
            verify_url,
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn accepts_correct_token() -> Result<()> {
        let verify_url = FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET)
            .require_response(CORRECT_TOKEN)
            .start()
            .await;
        let subject = verifier_for(verify_url).await;

        verify_that!(subject.verify(CORRECT_TOKEN).await, eq(true))
    }

    #[tokio::test]
    async fn rejects_incorrect_token() -> Result<()> {
        let verify_url = FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET)
            .require_response(CORRECT_TOKEN)
            .start()
            .await;
        let subject = verifier_for(verify_url).await;

        verify_that!(subject.verify("incorrect token").await, eq(false))
    }

    #[tokio::test]
    async fn rejects_when_secret_is_wrong() -> Result<()> {
        let verify_url = FakeRecaptcha::new("a different secret").start().await;
        let subject = verifier_for(verify_url).await;

        verify_that!(subject.verify(CORRECT_TOKEN).await, eq(false))
    }

    #[tokio::test]
    async fn rejects_when_service_returns_invalid_response() -> Result<()> {
        let verify_url = FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET)
            .return_invalid_response()
            .start()
            .await;
        let subject = verifier_for(verify_url).await;

        verify_that!(subject.verify(CORRECT_TOKEN).await, eq(false))
    }

    #[tokio::test]
    async fn rejects_when_service_fails() -> Result<()> {
        let verify_url = FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET)
            .return_server_error()
            .start()
            .await;
        let subject = verifier_for(verify_url).await;

        verify_that!(subject.verify(CORRECT_TOKEN).await, eq(false))
    }

    #[tokio::test]
    async fn rejects_when_service_is_unreachable() -> Result<()> {
        let subject = verifier_for("http://127.0.0.1:9/recaptcha/api/siteverify".into()).await;

        verify_that!(subject.verify(CORRECT_TOKEN).await, eq(false))
    }

    #[tokio::test]
    async fn rejects_without_contacting_service_when_secret_is_missing() -> Result<()> {
        let fake_recaptcha = FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET);
        let requests = fake_recaptcha.request_counter();
        let verify_url = fake_recaptcha.start().await;
        let secrets_repository = FakeSecretRepository::open().await;
        secrets_repository.remove_secret(RECAPTCHA_SECRET_NAME);
        let subject =
            RecaptchaVerifier::new(secrets_repository, verify_url, Duration::from_secs(2));

        verify_that!(subject.verify(CORRECT_TOKEN).await, eq(false))?;
        verify_that!(requests.load(Ordering::SeqCst), eq(0))
    }

    #[tokio::test]
    async fn picks_up_secret_provisioned_after_failed_lookup() -> Result<()> {
        let verify_url = FakeRecaptcha::new(FAKE_RECAPTCHA_SECRET).start().await;
        let secrets_repository = FakeSecretRepository::open().await;
        secrets_repository.remove_secret(RECAPTCHA_SECRET_NAME);
        let subject = RecaptchaVerifier::new(
            secrets_repository.clone(),
            verify_url,
            Duration::from_secs(2),
        );
        subject.verify(CORRECT_TOKEN).await;
        secrets_repository.add_secret(RECAPTCHA_SECRET_NAME, FAKE_RECAPTCHA_SECRET);

        verify_that!(subject.verify(CORRECT_TOKEN).await, eq(true))
    }
}
