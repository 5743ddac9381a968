// Configuration loading
pub mod config;

// At-rest encryption
pub mod crypto;

// Generic durable storage
pub mod storage;

// Upstream OAuth provider
pub mod oauth;

// Token lifecycle
pub mod credentials;

// Read-through cache
pub mod cache;

// Document server probe
pub mod docserver;

// Board settings
pub mod settings;

// Caller identification
pub mod auth;

// HTTP API
pub mod api;
