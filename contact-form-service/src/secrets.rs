use anyhow::Context;
use async_trait::async_trait;

pub const SMTP_USERNAME_NAME: &str = "SMTP_USERNAME";
pub const SMTP_PASSWORD_NAME: &str = "SMTP_PASSWORD";
pub const RECAPTCHA_SECRET_NAME: &str = "RECAPTCHA_SECRET_KEY";

#[async_trait]
pub trait SecretRepository: Send + Sync {
    async fn open() -> Self
    where
        Self: Sized;

    async fn get_secret(&self, name: &'static str) -> anyhow::Result<String>;
}

/// Reads secrets from the process environment on every lookup, so a secret provisioned after
/// start-up is picked up by the next request.
#[derive(Clone, Default)]
pub struct EnvironmentSecretRepository;

#[async_trait]
impl SecretRepository for EnvironmentSecretRepository {
    async fn open() -> Self {
        Self
    }

    async fn get_secret(&self, name: &'static str) -> anyhow::Result<String> {
        let value = std::env::var(name).with_context(|| format!("Missing secret {name}"))?;
        if value.trim().is_empty() {
            anyhow::bail!("Secret {name} is empty");
        }
        Ok(value)
    }
}
