use super::{Demo, SaveOptions, Settings, SettingsError, SettingsKey};
use crate::cache::Cache;
use crate::crypto::Cipher;
use crate::docserver::{check_version, DocServerClient};
use crate::storage::{Storage, StorageError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default lifetime of cached settings
pub const SETTINGS_CACHE_TTL: Duration = Duration::from_secs(300);

/// Saves and reads board settings.
pub struct SettingsService {
    cipher: Arc<dyn Cipher>,
    docserver: Arc<dyn DocServerClient>,
    cache: Arc<dyn Cache>,
    storage: Arc<dyn Storage<SettingsKey, Settings>>,
    cache_ttl: Duration,
}

fn cache_key(key: &SettingsKey) -> String {
    format!("settings:{}:{}", key.team_id, key.board_id)
}

impl SettingsService {
    pub fn new(
        cipher: Arc<dyn Cipher>,
        docserver: Arc<dyn DocServerClient>,
        cache: Arc<dyn Cache>,
        storage: Arc<dyn Storage<SettingsKey, Settings>>,
    ) -> Self {
        Self {
            cipher,
            docserver,
            cache,
            storage,
            cache_ttl: SETTINGS_CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Validates and stores a board's settings.
    ///
    /// When address, header and secret are all given, the document server is
    /// probed first and must run a supported version. An existing demo start
    /// time is kept.
    pub async fn save(
        &self,
        team_id: &str,
        board_id: &str,
        options: &SaveOptions,
    ) -> Result<(), SettingsError> {
        options.validate().map_err(|e| {
            debug!(team_id = %team_id, board_id = %board_id, error = %e, "Invalid settings");
            e
        })?;

        let key = SettingsKey::new(team_id, board_id);
        let existing = match self.storage.find(&key).await {
            Ok(existing) => existing,
            Err(StorageError::NotFound) => Settings::default(),
            Err(e) => {
                error!(team_id = %team_id, board_id = %board_id, error = %e, "Failed to read existing settings");
                return Err(e.into());
            }
        };

        if options.has_server() {
            self.probe(&key, options).await?;
        }

        let settings = self.build(options, &existing)?;

        self.invalidate(&key).await;
        self.storage.insert(&key, settings).await.map_err(|e| {
            error!(team_id = %team_id, board_id = %board_id, error = %e, "Failed to store settings");
            SettingsError::from(e)
        })?;
        // A read racing the insert may have cached the old record
        self.invalidate(&key).await;

        debug!(team_id = %team_id, board_id = %board_id, "Settings saved");
        Ok(())
    }

    /// Returns a board's settings with the secret decrypted.
    ///
    /// Boards without settings get empty defaults.
    pub async fn find(&self, team_id: &str, board_id: &str) -> Result<Settings, SettingsError> {
        let key = SettingsKey::new(team_id, board_id);

        if let Some(cached) = self.cached(&key).await {
            match self.decrypt(cached) {
                Ok(settings) => {
                    debug!(team_id = %team_id, board_id = %board_id, "Settings served from cache");
                    return Ok(settings);
                }
                Err(e) => {
                    warn!(team_id = %team_id, board_id = %board_id, error = %e, "Discarding unreadable cached settings");
                }
            }
        }

        let stored = match self.storage.find(&key).await {
            Ok(stored) => stored,
            Err(StorageError::NotFound) => {
                debug!(team_id = %team_id, board_id = %board_id, "No settings stored");
                return Ok(Settings::default());
            }
            Err(e) => {
                error!(team_id = %team_id, board_id = %board_id, error = %e, "Failed to read settings");
                return Err(e.into());
            }
        };

        self.store_in_cache(&key, &stored).await;

        self.decrypt(stored).map_err(|e| {
            error!(team_id = %team_id, board_id = %board_id, error = %e, "Failed to decrypt settings secret");
            e
        })
    }

    async fn probe(&self, key: &SettingsKey, options: &SaveOptions) -> Result<(), SettingsError> {
        debug!(team_id = %key.team_id, board_id = %key.board_id, "Validating document server");

        let version = self
            .docserver
            .server_version(&options.address, &options.header, &options.secret)
            .await
            .map_err(|e| {
                warn!(team_id = %key.team_id, board_id = %key.board_id, error = %e, "Document server check failed");
                e
            })?;

        check_version(&version).map_err(|e| {
            warn!(team_id = %key.team_id, board_id = %key.board_id, version = %version, "Unsupported document server");
            e
        })?;

        debug!(team_id = %key.team_id, board_id = %key.board_id, version = %version, "Valid document server detected");
        Ok(())
    }

    fn build(&self, options: &SaveOptions, existing: &Settings) -> Result<Settings, SettingsError> {
        let secret = self.encrypt(&options.secret)?;

        let demo = if options.demo {
            Demo {
                enabled: true,
                started: existing.demo.started.or_else(|| Some(Utc::now())),
            }
        } else if existing.demo.enabled {
            existing.demo.clone()
        } else {
            Demo::default()
        };

        Ok(Settings {
            address: options.address.clone(),
            header: options.header.clone(),
            secret,
            demo,
        })
    }

    fn encrypt(&self, secret: &str) -> Result<String, SettingsError> {
        if secret.is_empty() {
            return Ok(String::new());
        }
        self.cipher
            .encrypt(secret)
            .map_err(SettingsError::EncryptionFailed)
    }

    fn decrypt(&self, mut settings: Settings) -> Result<Settings, SettingsError> {
        if !settings.secret.is_empty() {
            settings.secret = self
                .cipher
                .decrypt(&settings.secret)
                .map_err(SettingsError::DecryptionFailed)?;
        }
        Ok(settings)
    }

    async fn cached(&self, key: &SettingsKey) -> Option<Settings> {
        let raw = match self.cache.get(&cache_key(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(team_id = %key.team_id, board_id = %key.board_id, error = %e, "Failed to read settings cache");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(team_id = %key.team_id, board_id = %key.board_id, error = %e, "Failed to parse cached settings");
                None
            }
        }
    }

    async fn store_in_cache(&self, key: &SettingsKey, settings: &Settings) {
        let raw = match serde_json::to_string(settings) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(team_id = %key.team_id, board_id = %key.board_id, error = %e, "Failed to serialise settings for caching");
                return;
            }
        };

        if let Err(e) = self.cache.set(&cache_key(key), raw, self.cache_ttl).await {
            warn!(team_id = %key.team_id, board_id = %key.board_id, error = %e, "Failed to cache settings");
        }
    }

    async fn invalidate(&self, key: &SettingsKey) {
        if let Err(e) = self.cache.delete(&cache_key(key)).await {
            warn!(team_id = %key.team_id, board_id = %key.board_id, error = %e, "Failed to invalidate settings cache");
        }
    }
}
