//! Caller identification for API requests.
//!
//! The board frontend sends a JWT issued by the whiteboard platform, signed
//! (HS256) with the app's OAuth client secret, as a bearer token.

use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;


/// Claims identifying the calling user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user: String,
    pub team: String,
    /// Expiry, Unix seconds
    pub exp: i64,
}

/// Authorization errors
#[derive(Debug, Error, PartialEq, Clone)]
pub enum AuthError {
    /// Authorization header not present
    #[error("authorization token not provided")]
    Missing,

    /// Not "Bearer <token>"
    #[error("invalid authorization token format")]
    InvalidFormat,

    #[error("authorization token is empty")]
    Empty,

    /// Signature, expiry or claims rejected
    #[error("invalid authorization token: {0}")]
    Invalid(String),
}

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, AuthError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(AuthError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Empty);
    }

    Ok(token.to_string())
}

/// Verifies a caller token and returns its claims.
///
/// # Arguments
/// * `token` - Compact JWT
/// * `secret` - OAuth client secret the token was signed with
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| AuthError::Invalid(e.to_string()))?;

    if data.claims.user.is_empty() || data.claims.team.is_empty() {
        return Err(AuthError::Invalid("missing user or team claim".to_string()));
    }

    Ok(data.claims)
}

/// Signs caller claims. Used by tests and tooling that call the API directly.
pub fn sign_token(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Invalid(e.to_string()))
}

/// Extracts and verifies the bearer token of a request.
pub fn authenticate(headers: &HeaderMap, secret: &str) -> Result<Claims, AuthError> {
    let token = extract_bearer_token(headers)?;
    verify_token(&token, secret)
}
