use anyhow::{Context, Result};
use boarddoc::api::{create_router, AppState};
use boarddoc::cache::{run_cache_cleanup, MemoryCache};
use boarddoc::config::{load_config, AppConfig};
use boarddoc::credentials::{AuthenticationProcessor, ProviderTokenConverter, TokenService};
use boarddoc::crypto::AesCipher;
use boarddoc::docserver::HttpDocServerClient;
use boarddoc::oauth::{HttpOAuthClient, ProviderToken};
use boarddoc::settings::{SettingsProcessor, SettingsService};
use boarddoc::storage::{open_connection, SqliteStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boarddoc=info".into()),
        )
        .init();

    info!("Boarddoc starting...");

    // Config file is optional; environment overrides apply either way
    let mut config = match std::env::args().nth(1) {
        Some(path) => load_config(&path).with_context(|| format!("Failed to load {}", path))?,
        None => AppConfig::default(),
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        db_path = %config.database.path,
        refresh_lock = config.security.refresh_lock,
        "Configuration loaded"
    );

    let cipher = Arc::new(
        AesCipher::new(config.security.cipher_secret.as_str())
            .context("Failed to initialize cipher")?,
    );

    let conn = open_connection(&config.database.path).context("Failed to open database")?;
    let auth_storage = Arc::new(
        SqliteStorage::new(Arc::clone(&conn), AuthenticationProcessor)
            .context("Failed to initialize authentication storage")?,
    );
    let settings_storage = Arc::new(
        SqliteStorage::new(conn, SettingsProcessor)
            .context("Failed to initialize settings storage")?,
    );
    info!("Storage initialized");

    let oauth_client = Arc::new(
        HttpOAuthClient::<ProviderToken>::new(config.oauth.clone())
            .context("Failed to initialize OAuth client")?,
    );
    let docserver = Arc::new(
        HttpDocServerClient::new(Duration::from_secs(3))
            .context("Failed to initialize document server client")?,
    );

    let cache = MemoryCache::new(config.cache.key_prefix.clone());
    tokio::spawn(run_cache_cleanup(cache.clone(), 60));

    let tokens = TokenService::new(
        cipher.clone(),
        oauth_client,
        Arc::new(ProviderTokenConverter::default()),
        auth_storage,
    )
    .with_refresh_lock(config.security.refresh_lock);

    let settings = SettingsService::new(cipher, docserver, Arc::new(cache), settings_storage)
        .with_cache_ttl(Duration::from_secs(config.cache.ttl_secs));

    let state = AppState {
        tokens: Arc::new(tokens),
        settings: Arc::new(settings),
        client_secret: config.oauth.client_secret.clone(),
        authorization_url: config.oauth.authorization_url(),
        application_url: config.server.application_url.clone(),
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
    };
    let router = create_router(state, &config.server.cors_origins);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!(address = %address, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Boarddoc stopped");

    Ok(())
}
