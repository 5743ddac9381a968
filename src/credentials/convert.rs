use super::{Authentication, TokenError};
use crate::oauth::ProviderToken;

/// Seconds subtracted from every provider-reported lifetime.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 10;

/// Maps a provider token response into an [`Authentication`].
pub trait TokenConverter<T>: Send + Sync {
    /// # Arguments
    /// * `token` - Response of an exchange or refresh grant
    /// * `now` - Current Unix time (seconds) the lifetime is relative to
    fn convert(&self, token: &T, now: i64) -> Result<Authentication, TokenError>;
}

/// Converter for the whiteboard provider's [`ProviderToken`].
#[derive(Debug, Clone, Copy)]
pub struct ProviderTokenConverter {
    safety_margin: i64,
}

impl ProviderTokenConverter {
    pub fn new(safety_margin: i64) -> Self {
        Self { safety_margin }
    }
}

impl Default for ProviderTokenConverter {
    fn default() -> Self {
        Self::new(EXPIRY_SAFETY_MARGIN_SECS)
    }
}

impl TokenConverter<ProviderToken> for ProviderTokenConverter {
    fn convert(&self, token: &ProviderToken, now: i64) -> Result<Authentication, TokenError> {
        if token.access_token.is_empty() {
            return Err(TokenError::ConversionFailed("access token is empty".to_string()));
        }
        if token.refresh_token.is_empty() {
            return Err(TokenError::ConversionFailed("refresh token is empty".to_string()));
        }
        if token.expires_in < 0 {
            return Err(TokenError::ConversionFailed(format!(
                "negative lifetime {}",
                token.expires_in
            )));
        }

        let expires_at = now
            .checked_add(token.expires_in)
            .and_then(|t| t.checked_sub(self.safety_margin))
            .ok_or_else(|| {
                TokenError::ConversionFailed(format!("lifetime {} out of range", token.expires_in))
            })?;

        Ok(Authentication {
            token_type: token.token_type.clone(),
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at,
            scope: token.scope.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_token(expires_in: i64) -> ProviderToken {
        ProviderToken {
            user_id: "u1".to_string(),
            team_id: "t1".to_string(),
            token_type: "bearer".to_string(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            issued_at: 0,
            expires_in,
            scope: "boards:read".to_string(),
        }
    }

    #[test]
    fn test_convert_applies_margin() {
        let auth = ProviderTokenConverter::default()
            .convert(&provider_token(3600), 1_000)
            .unwrap();

        assert_eq!(auth.expires_at, 1_000 + 3600 - EXPIRY_SAFETY_MARGIN_SECS);
        assert_eq!(auth.token_type, "bearer");
        assert_eq!(auth.access_token, "access");
        assert_eq!(auth.refresh_token, "refresh");
        assert_eq!(auth.scope, "boards:read");
    }

    #[test]
    fn test_convert_without_margin() {
        let auth = ProviderTokenConverter::new(0)
            .convert(&provider_token(60), 1_000)
            .unwrap();
        assert_eq!(auth.expires_at, 1_060);
    }

    #[test]
    fn test_convert_rejects_unusable_payloads() {
        let converter = ProviderTokenConverter::default();

        let mut token = provider_token(3600);
        token.access_token.clear();
        assert!(matches!(
            converter.convert(&token, 0),
            Err(TokenError::ConversionFailed(_))
        ));

        let mut token = provider_token(3600);
        token.refresh_token.clear();
        assert!(converter.convert(&token, 0).is_err());

        assert!(converter.convert(&provider_token(-1), 0).is_err());
    }

    #[test]
    fn test_convert_rejects_overflowing_lifetime() {
        let result =
            ProviderTokenConverter::default().convert(&provider_token(i64::MAX), 1_700_000_000);

        assert!(matches!(result, Err(TokenError::ConversionFailed(_))));
    }
}
