use crate::{config::DEFAULT_RECIPIENT_EMAIL, submission::is_valid_email};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fmt::Display,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The mailbox receiving contact form submissions, as persisted on disk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecipientConfig {
    #[serde(rename = "email")]
    pub destination_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Single-file store for the [`RecipientConfig`].
///
/// Writes replace the file atomically. Concurrent writers are not coordinated; the last rename
/// wins.
pub struct SettingsStore {
    path: PathBuf,
    default_email: String,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, default_email: impl Into<String>) -> Self {
        let mut default_email = default_email.into();
        if !is_valid_email(&default_email) {
            warn!("Default recipient {default_email} is not a valid address, using {DEFAULT_RECIPIENT_EMAIL}");
            default_email = DEFAULT_RECIPIENT_EMAIL.into();
        }
        Self {
            path: path.into(),
            default_email,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored config, or the default when there is none usable. Never fails.
    pub async fn read(&self) -> RecipientConfig {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(
                    "No recipient config at {}, using default",
                    self.path.display()
                );
                return self.default_config();
            }
            Err(error) => {
                warn!(
                    "Could not read recipient config {}: {error}",
                    self.path.display()
                );
                return self.default_config();
            }
        };
        match serde_json::from_str::<RecipientConfig>(&contents) {
            Ok(config) if is_valid_email(&config.destination_email) => config,
            Ok(config) => {
                warn!(
                    "Ignoring stored recipient {:?}: not a valid address",
                    config.destination_email
                );
                self.default_config()
            }
            Err(error) => {
                warn!(
                    "Could not parse recipient config {}: {error}",
                    self.path.display()
                );
                self.default_config()
            }
        }
    }

    pub async fn write(&self, email: &str) -> Result<RecipientConfig, SettingsError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SettingsError::MissingEmail);
        }
        if !is_valid_email(email) {
            return Err(SettingsError::InvalidEmail(email.into()));
        }
        let config = RecipientConfig {
            destination_email: email.into(),
            updated_at: Some(Utc::now()),
        };
        let contents = serde_json::to_string_pretty(&config).map_err(SettingsError::Encoding)?;

        let temporary_path = self.temporary_path();
        tokio::fs::write(&temporary_path, contents)
            .await
            .map_err(SettingsError::Persistence)?;
        if let Err(error) = tokio::fs::rename(&temporary_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temporary_path).await;
            return Err(SettingsError::Persistence(error));
        }
        info!("Recipient updated to {email}");
        Ok(config)
    }

    fn default_config(&self) -> RecipientConfig {
        RecipientConfig {
            destination_email: self.default_email.clone(),
            updated_at: None,
        }
    }

    // Same directory as the target so the rename never crosses filesystems.
    fn temporary_path(&self) -> PathBuf {
        let mut file_name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| "email-config.json".into());
        file_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        self.path.with_file_name(file_name)
    }
}

#[derive(Debug)]
pub enum SettingsError {
    MissingEmail,
    InvalidEmail(String),
    Encoding(serde_json::Error),
    Persistence(std::io::Error),
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::MissingEmail => write!(f, "Missing email"),
            SettingsError::InvalidEmail(email) => write!(f, "Invalid email {email:?}"),
            SettingsError::Encoding(error) => write!(f, "Could not encode config: {error}"),
            SettingsError::Persistence(error) => write!(f, "Could not write config: {error}"),
        }
    }
}

impl std::error::Error for SettingsError {}
