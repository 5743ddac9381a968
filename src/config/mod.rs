use serde::Deserialize;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete boarddoc configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for the work done by one request (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Where the install callback sends the browser once a token is saved
    #[serde(default = "default_application_url")]
    pub application_url: String,
    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_application_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            application_url: default_application_url(),
            cors_origins: Vec::new(),
        }
    }
}

/// Upstream OAuth provider configuration
#[derive(Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_authorize_uri")]
    pub authorize_uri: String,
    #[serde(default = "default_oauth_timeout")]
    pub timeout_secs: u64,
}

fn default_token_uri() -> String {
    "https://api.miro.com/v1/oauth/token".to_string()
}

fn default_authorize_uri() -> String {
    "https://miro.com/oauth/authorize".to_string()
}

fn default_oauth_timeout() -> u64 {
    5
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            token_uri: default_token_uri(),
            authorize_uri: default_authorize_uri(),
            timeout_secs: default_oauth_timeout(),
        }
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("token_uri", &self.token_uri)
            .field("authorize_uri", &self.authorize_uri)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl OAuthConfig {
    /// URL the user is sent to when the app has to be (re)installed.
    pub fn authorization_url(&self) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}",
            self.authorize_uri,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri)
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid("oauth.client_id is required".to_string()));
        }
        if self.client_secret.is_empty() {
            return Err(ConfigError::Invalid("oauth.client_secret is required".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("oauth.timeout_secs must be positive".to_string()));
        }

        validate_uri("oauth.redirect_uri", &self.redirect_uri)?;
        validate_uri("oauth.token_uri", &self.token_uri)?;
        validate_uri("oauth.authorize_uri", &self.authorize_uri)
    }
}

/// SQLite configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "boarddoc.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Secrets and token handling
#[derive(Clone, Deserialize)]
pub struct SecurityConfig {
    /// Passphrase the at-rest encryption keys are derived from
    #[serde(default)]
    pub cipher_secret: String,
    /// Serialise concurrent refreshes of the same token within this process
    #[serde(default = "default_refresh_lock")]
    pub refresh_lock: bool,
}

fn default_refresh_lock() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cipher_secret: String::new(),
            refresh_lock: default_refresh_lock(),
        }
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("cipher_secret", &"<redacted>")
            .field("refresh_lock", &self.refresh_lock)
            .finish()
    }
}

/// Settings cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_prefix() -> String {
    "boarddoc:".to_string()
}

fn default_cache_ttl() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_cache_prefix(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn validate_uri(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Invalid(format!("{} is required", field)));
    }
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Invalid(format!(
            "{} must start with http:// or https://",
            field
        )));
    }
    if value.ends_with('/') {
        return Err(ConfigError::Invalid(format!(
            "{} must not end with a slash",
            field
        )));
    }
    Ok(())
}

impl AppConfig {
    /// Applies `BOARDDOC_*` overrides on top of the file values.
    ///
    /// Values that fail to parse are ignored and the file value is kept.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BOARDDOC_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("BOARDDOC_PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.server.port = n;
            }
        }
        if let Some(v) = lookup("BOARDDOC_APPLICATION_URL") {
            self.server.application_url = v;
        }
        if let Some(v) = lookup("BOARDDOC_OAUTH_CLIENT_ID") {
            self.oauth.client_id = v;
        }
        if let Some(v) = lookup("BOARDDOC_OAUTH_CLIENT_SECRET") {
            self.oauth.client_secret = v;
        }
        if let Some(v) = lookup("BOARDDOC_OAUTH_REDIRECT_URI") {
            self.oauth.redirect_uri = v;
        }
        if let Some(v) = lookup("BOARDDOC_OAUTH_TOKEN_URI") {
            self.oauth.token_uri = v;
        }
        if let Some(v) = lookup("BOARDDOC_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("BOARDDOC_CIPHER_SECRET") {
            self.security.cipher_secret = v;
        }
        if let Some(v) = lookup("BOARDDOC_REFRESH_LOCK") {
            if let Ok(b) = v.parse::<bool>() {
                self.security.refresh_lock = b;
            }
        }
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.oauth.validate()?;

        if self.security.cipher_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "security.cipher_secret is required".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_secs must be positive".to_string(),
            ));
        }
        validate_uri("server.application_url", &self.server.application_url)
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let config: AppConfig = toml::from_str(&contents)?;
    Ok(config)
}
