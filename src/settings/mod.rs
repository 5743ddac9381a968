//! Per-board document server settings.
//!
//! Same pattern as the credential store: the JWT secret is encrypted at
//! rest, and reads go through a short-lived cache that holds the secret in
//! its encrypted form.

use crate::crypto::CipherError;
use crate::docserver::DocServerError;
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod service;
mod storage;


pub use service::{SettingsService, SETTINGS_CACHE_TTL};
pub use storage::SettingsProcessor;

/// Longest accepted header name or secret
pub const MAX_FIELD_LENGTH: usize = 255;

/// Identifies the settings of one board.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SettingsKey {
    pub team_id: String,
    pub board_id: String,
}

impl SettingsKey {
    pub fn new(team_id: impl Into<String>, board_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            board_id: board_id.into(),
        }
    }
}

/// Demo mode state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demo {
    pub enabled: bool,
    /// When demo mode was first enabled; kept across later saves
    pub started: Option<DateTime<Utc>>,
}

/// Document server connection settings of a board.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub address: String,
    pub header: String,
    pub secret: String,
    pub demo: Demo,
}

impl Settings {
    /// True when a document server is fully configured.
    pub fn is_configured(&self) -> bool {
        !self.address.is_empty() && !self.header.is_empty() && !self.secret.is_empty()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("address", &self.address)
            .field("header", &self.header)
            .field("secret", &"<redacted>")
            .field("demo", &self.demo)
            .finish()
    }
}

/// Requested settings change
#[derive(Clone, Default, Deserialize)]
pub struct SaveOptions {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub demo: bool,
}

impl SaveOptions {
    /// Address, header and secret are required unless demo mode is requested.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.demo {
            if self.address.is_empty() {
                return Err(SettingsError::AddressRequired);
            }
            if self.secret.is_empty() {
                return Err(SettingsError::SecretRequired);
            }
            if self.header.is_empty() {
                return Err(SettingsError::HeaderRequired);
            }
        }

        if !self.address.is_empty() {
            let url = reqwest::Url::parse(&self.address).map_err(|_| SettingsError::InvalidUrl)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SettingsError::InvalidProtocol);
            }
            if self.address.ends_with('/') {
                return Err(SettingsError::TrailingSlash);
            }
        }

        if self.header.len() > MAX_FIELD_LENGTH {
            return Err(SettingsError::HeaderTooLong);
        }
        if self.secret.len() > MAX_FIELD_LENGTH {
            return Err(SettingsError::SecretTooLong);
        }

        Ok(())
    }

    /// True when the document server should be probed before saving.
    pub fn has_server(&self) -> bool {
        !self.address.is_empty() && !self.header.is_empty() && !self.secret.is_empty()
    }
}

/// Settings errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("document server address is required")]
    AddressRequired,

    #[error("document server secret is required")]
    SecretRequired,

    #[error("document server header is required")]
    HeaderRequired,

    #[error("document server address is not a valid URL")]
    InvalidUrl,

    #[error("document server address must use http or https")]
    InvalidProtocol,

    #[error("document server address must not end with a slash")]
    TrailingSlash,

    #[error("header must be at most 255 characters")]
    HeaderTooLong,

    #[error("secret must be at most 255 characters")]
    SecretTooLong,

    #[error(transparent)]
    DocServer(#[from] DocServerError),

    #[error("failed to encrypt secret: {0}")]
    EncryptionFailed(#[source] CipherError),

    #[error("failed to decrypt secret: {0}")]
    DecryptionFailed(#[source] CipherError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SettingsError {
    /// True for errors caused by the submitted values rather than the system.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            SettingsError::AddressRequired
                | SettingsError::SecretRequired
                | SettingsError::HeaderRequired
                | SettingsError::InvalidUrl
                | SettingsError::InvalidProtocol
                | SettingsError::TrailingSlash
                | SettingsError::HeaderTooLong
                | SettingsError::SecretTooLong
                | SettingsError::DocServer(_)
        )
    }
}
