//! OAuth token lifecycle: encrypted storage with refresh-on-read.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenService                       │
//! │  - save: encrypt + upsert                │
//! │  - find: read, decrypt or refresh        │
//! └─────────────────────────────────────────┘
//!      ↓ encrypt/decrypt   ↓ refresh      ↓ find/insert/update
//! ┌────────────┐  ┌────────────────┐  ┌────────────────────┐
//! │  Cipher    │  │  OAuthClient   │  │  Storage           │
//! │ AES-GCM    │  │  provider API  │  │  authentications   │
//! └────────────┘  └────────────────┘  └────────────────────┘
//! ```
//!
//! Plaintext tokens live in [`Authentication`]; what the storage sees is
//! always a [`StoredAuthentication`] whose token fields are ciphertext. The
//! two are distinct types so one can never be passed where the other is
//! expected.

use crate::crypto::CipherError;
use crate::oauth::OAuthClientError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod convert;
mod service;
mod storage;


pub use convert::{ProviderTokenConverter, TokenConverter, EXPIRY_SAFETY_MARGIN_SECS};
pub use service::TokenService;
pub use storage::AuthenticationProcessor;

/// Identifies one user's grant within one team.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AuthKey {
    pub team_id: String,
    pub user_id: String,
}

impl AuthKey {
    pub fn new(team_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// A usable authorization grant with plaintext tokens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
    pub scope: String,
}

impl Authentication {
    /// True while `now` has not passed `expires_at`.
    pub fn is_fresh(&self, now: i64) -> bool {
        now <= self.expires_at
    }
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authentication")
            .field("token_type", &self.token_type)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Persisted form of an [`Authentication`]; both token fields are ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredAuthentication {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub scope: String,
}

impl StoredAuthentication {
    pub fn is_fresh(&self, now: i64) -> bool {
        now <= self.expires_at
    }
}

/// Token lifecycle errors
///
/// HTTP layers branch on [`TokenError::requires_reauthorization`]; the
/// variants stay distinct so logs keep the diagnostic signal.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No usable authentication exists for the key
    #[error("token is missing")]
    TokenMissing,

    #[error("failed to encrypt token: {0}")]
    EncryptionFailed(#[source] CipherError),

    /// Stored ciphertext could not be decrypted (corruption or secret rotation)
    #[error("failed to decrypt token: {0}")]
    DecryptionFailed(#[source] CipherError),

    /// The provider rejected the authorization code
    #[error("failed to exchange authorization code: {0}")]
    ExchangeFailed(#[source] OAuthClientError),

    /// The provider rejected the refresh grant
    #[error("failed to refresh token: {0}")]
    RefreshFailed(#[source] OAuthClientError),

    #[error("failed to convert provider token: {0}")]
    ConversionFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TokenError {
    /// True when the caller should send the user through authorization again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, TokenError::TokenMissing | TokenError::RefreshFailed(_))
    }

    /// True for transport failures of the backing store; safe to retry.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, TokenError::Storage(StorageError::Unavailable(_)))
    }
}
