//! Token lifecycle service.

use super::{AuthKey, Authentication, StoredAuthentication, TokenConverter, TokenError};
use crate::crypto::Cipher;
use crate::oauth::OAuthClient;
use crate::storage::{Storage, StorageError};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

type RefreshLocks = DashMap<AuthKey, Arc<Mutex<()>>>;

/// Handle on a key's refresh lock. The map entry is removed when the last
/// handle goes away, also when the owning `find` is cancelled.
struct RefreshLockEntry<'a> {
    locks: &'a RefreshLocks,
    key: &'a AuthKey,
    lock: Arc<Mutex<()>>,
}

impl<'a> RefreshLockEntry<'a> {
    fn acquire(locks: &'a RefreshLocks, key: &'a AuthKey) -> Self {
        let lock = Arc::clone(locks.entry(key.clone()).or_default().value());
        Self { locks, key, lock }
    }
}

impl Drop for RefreshLockEntry<'_> {
    fn drop(&mut self) {
        // The map's handle plus this one
        self.locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 2);
    }
}

/// Stores grants encrypted and hands out usable tokens, refreshing expired
/// ones on read.
///
/// A stored record is either fresh (`now <= expires_at`) and returned as is,
/// or stale and refreshed through the provider before being returned. A
/// failed refresh leaves the stored record untouched.
///
/// With the refresh lock enabled, concurrent reads of the same stale record
/// within this process share one upstream refresh: the first caller
/// refreshes, the others wait and then re-read the refreshed record.
pub struct TokenService<T> {
    cipher: Arc<dyn Cipher>,
    client: Arc<dyn OAuthClient<T>>,
    converter: Arc<dyn TokenConverter<T>>,
    storage: Arc<dyn Storage<AuthKey, StoredAuthentication>>,
    refresh_locks: Option<RefreshLocks>,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl<T: Send + Sync + 'static> TokenService<T> {
    pub fn new(
        cipher: Arc<dyn Cipher>,
        client: Arc<dyn OAuthClient<T>>,
        converter: Arc<dyn TokenConverter<T>>,
        storage: Arc<dyn Storage<AuthKey, StoredAuthentication>>,
    ) -> Self {
        Self {
            cipher,
            client,
            converter,
            storage,
            refresh_locks: Some(DashMap::new()),
        }
    }

    /// Enables or disables per-key serialisation of refreshes.
    pub fn with_refresh_lock(mut self, enabled: bool) -> Self {
        self.refresh_locks = enabled.then(DashMap::new);
        self
    }

    /// Exchanges an authorization code for a provider token.
    pub async fn exchange(&self, code: &str) -> Result<T, TokenError> {
        self.client.exchange(code).await.map_err(|e| {
            warn!(error = %e, "Authorization code exchange failed");
            TokenError::ExchangeFailed(e)
        })
    }

    /// Converts a provider token relative to the current time.
    pub fn convert(&self, token: &T) -> Result<Authentication, TokenError> {
        self.converter.convert(token, now())
    }

    /// Encrypts and upserts an authentication.
    ///
    /// # Arguments
    /// * `team_id` - Team the grant belongs to
    /// * `user_id` - User who authorized the app
    /// * `auth` - Plaintext authentication
    ///
    /// # Returns
    /// * `Err(TokenError::EncryptionFailed)` - If either token cannot be encrypted
    /// * `Err(TokenError::Storage)` - If the upsert fails
    pub async fn save(
        &self,
        team_id: &str,
        user_id: &str,
        auth: &Authentication,
    ) -> Result<(), TokenError> {
        let key = AuthKey::new(team_id, user_id);
        let record = self.encrypt(auth)?;

        self.storage.insert(&key, record).await.map_err(|e| {
            error!(team_id = %team_id, user_id = %user_id, error = %e, "Failed to save authentication");
            TokenError::from(e)
        })?;

        info!(team_id = %team_id, user_id = %user_id, "Saved authentication");
        Ok(())
    }

    /// Returns a usable authentication, refreshing it first if it expired.
    ///
    /// # Returns
    /// * `Ok(Authentication)` - Plaintext, unexpired authentication
    /// * `Err(TokenError::TokenMissing)` - Nothing usable is stored for the key
    /// * `Err(TokenError::RefreshFailed)` - The provider rejected the refresh token
    /// * `Err(TokenError::DecryptionFailed)` - Stored ciphertext is unreadable
    pub async fn find(&self, team_id: &str, user_id: &str) -> Result<Authentication, TokenError> {
        let key = AuthKey::new(team_id, user_id);
        let stored = self.read(&key).await?;

        if stored.is_fresh(now()) {
            return self.decrypt(stored);
        }

        let Some(locks) = &self.refresh_locks else {
            return self.refresh(&key, stored).await;
        };

        let entry = RefreshLockEntry::acquire(locks, &key);
        let _guard = entry.lock.lock().await;
        self.refresh_if_stale(&key).await
    }

    #[cfg(test)]
    pub(crate) fn pending_refresh_locks(&self) -> usize {
        self.refresh_locks.as_ref().map_or(0, DashMap::len)
    }

    /// Re-reads under the refresh lock; another caller may have refreshed meanwhile.
    async fn refresh_if_stale(&self, key: &AuthKey) -> Result<Authentication, TokenError> {
        let stored = self.read(key).await?;

        if stored.is_fresh(now()) {
            debug!(team_id = %key.team_id, user_id = %key.user_id, "Token refreshed concurrently");
            return self.decrypt(stored);
        }

        self.refresh(key, stored).await
    }

    async fn read(&self, key: &AuthKey) -> Result<StoredAuthentication, TokenError> {
        let stored = match self.storage.find(key).await {
            Ok(stored) => stored,
            Err(StorageError::NotFound) => {
                debug!(team_id = %key.team_id, user_id = %key.user_id, "No authentication stored");
                return Err(TokenError::TokenMissing);
            }
            Err(e) => {
                error!(team_id = %key.team_id, user_id = %key.user_id, error = %e, "Failed to read authentication");
                return Err(e.into());
            }
        };

        if stored.access_token.is_empty() {
            warn!(team_id = %key.team_id, user_id = %key.user_id, "Stored authentication has no access token");
            return Err(TokenError::TokenMissing);
        }

        Ok(stored)
    }

    async fn refresh(
        &self,
        key: &AuthKey,
        stored: StoredAuthentication,
    ) -> Result<Authentication, TokenError> {
        info!(team_id = %key.team_id, user_id = %key.user_id, "Token expired, refreshing");

        let refresh_token = self
            .cipher
            .decrypt(&stored.refresh_token)
            .map_err(|e| {
                error!(team_id = %key.team_id, user_id = %key.user_id, error = %e, "Failed to decrypt refresh token");
                TokenError::DecryptionFailed(e)
            })?;

        let token = self.client.refresh(&refresh_token).await.map_err(|e| {
            warn!(team_id = %key.team_id, user_id = %key.user_id, error = %e, "Token refresh rejected");
            TokenError::RefreshFailed(e)
        })?;

        let auth = self.convert(&token)?;
        let record = self.encrypt(&auth)?;

        // Update, never insert: a record deleted meanwhile stays deleted
        self.storage.update(key, record).await.map_err(|e| {
            error!(team_id = %key.team_id, user_id = %key.user_id, error = %e, "Failed to persist refreshed token");
            TokenError::from(e)
        })?;

        info!(team_id = %key.team_id, user_id = %key.user_id, expires_at = auth.expires_at, "Token refreshed");
        Ok(auth)
    }

    fn encrypt(&self, auth: &Authentication) -> Result<StoredAuthentication, TokenError> {
        let access_token = self
            .cipher
            .encrypt(&auth.access_token)
            .map_err(TokenError::EncryptionFailed)?;
        let refresh_token = self
            .cipher
            .encrypt(&auth.refresh_token)
            .map_err(TokenError::EncryptionFailed)?;

        Ok(StoredAuthentication {
            token_type: auth.token_type.clone(),
            access_token,
            refresh_token,
            expires_at: auth.expires_at,
            scope: auth.scope.clone(),
        })
    }

    fn decrypt(&self, stored: StoredAuthentication) -> Result<Authentication, TokenError> {
        let access_token = self
            .cipher
            .decrypt(&stored.access_token)
            .map_err(TokenError::DecryptionFailed)?;
        let refresh_token = self
            .cipher
            .decrypt(&stored.refresh_token)
            .map_err(TokenError::DecryptionFailed)?;

        Ok(Authentication {
            token_type: stored.token_type,
            access_token,
            refresh_token,
            expires_at: stored.expires_at,
            scope: stored.scope,
        })
    }
}
