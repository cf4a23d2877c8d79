//! `OAuth2` token types and expiry checks.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds before the real expiry at which a token is already treated as
/// expired.
///
/// A token that is about to expire may lapse between the check and the
/// request that carries it.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// `OAuth2` access token with metadata.
///
/// This is the persisted credential record: the field names match what
/// common `OAuth2` libraries write, and `expiry` is accepted as an alias of
/// `expires_at` so that token files provisioned by other tools load as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access token string.
    pub access_token: String,
    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expiration time.
    #[serde(
        default,
        alias = "expiry",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    /// Refresh token for obtaining new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope granted by authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Creates a new token.
    #[must_use]
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at: None,
            refresh_token: None,
            scope: None,
        }
    }

    /// Creates a token from a token endpoint response received at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the response carries an empty access token.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self> {
        if response.access_token.is_empty() {
            return Err(Error::InvalidResponse("empty access_token".into()));
        }

        let expires_at = response
            .expires_in
            .map(|secs| now + Duration::seconds(i64::from(secs)));

        Ok(Self {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(default_token_type),
            expires_at,
            refresh_token: response.refresh_token,
            scope: response.scope,
        })
    }

    /// Checks whether the token is expired or within the safety margin of
    /// expiring at the given instant (see [`EXPIRY_MARGIN_SECS`]).
    ///
    /// A token without an expiry never expires.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|exp| now + Duration::seconds(EXPIRY_MARGIN_SECS) >= exp)
    }

    /// Checks if the token is expired right now (with the safety margin).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns true if the token is valid (not expired).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the expiration time.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns the refresh token if available.
    ///
    /// # Errors
    ///
    /// Returns an error if no refresh token is available.
    pub fn refresh_token(&self) -> Result<&str> {
        self.refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(Error::NoRefreshToken)
    }
}

/// Token response from the `OAuth2` token endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expires in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u32>,
    /// Refresh token (Google only returns it on the first grant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Error response from the `OAuth2` token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::oauth_error(self.error, self.error_description)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_margin() {
        let now = Utc::now();

        let expired = Token::new("a", "Bearer").with_expires_at(now - Duration::seconds(120));
        assert!(expired.is_expired_at(now));

        let about_to_expire = Token::new("a", "Bearer").with_expires_at(now + Duration::seconds(30));
        assert!(about_to_expire.is_expired_at(now));

        let valid = Token::new("a", "Bearer").with_expires_at(now + Duration::seconds(3600));
        assert!(!valid.is_expired_at(now));
        assert!(valid.is_valid());
    }

    #[test]
    fn test_token_without_expiry_never_expires() {
        let token = Token::new("a", "Bearer");
        assert!(!token.is_expired());
    }

    #[test]
    fn test_empty_refresh_token_is_missing() {
        let token = Token::new("a", "Bearer").with_refresh_token("");
        assert!(matches!(token.refresh_token(), Err(Error::NoRefreshToken)));

        let token = Token::new("a", "Bearer").with_refresh_token("r");
        assert_eq!(token.refresh_token().unwrap(), "r");
    }

    #[test]
    fn test_token_from_response() {
        let now = Utc::now();
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"ya29.x","expires_in":3599,"scope":"https://www.googleapis.com/auth/gmail.readonly","token_type":"Bearer"}"#,
        )
        .unwrap();

        let token = Token::from_response(response, now).unwrap();
        assert_eq!(token.access_token, "ya29.x");
        assert_eq!(token.expires_at, Some(now + Duration::seconds(3599)));
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn test_empty_access_token_rejected() {
        let response = TokenResponse {
            access_token: String::new(),
            token_type: None,
            expires_in: Some(3600),
            refresh_token: None,
            scope: None,
        };
        assert!(matches!(
            Token::from_response(response, Utc::now()),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_reads_expiry_alias() {
        let json = r#"{
            "access_token": "ya29.a0",
            "token_type": "Bearer",
            "refresh_token": "1//0g",
            "expiry": "2025-03-01T12:30:00.123456+03:00"
        }"#;

        let token: Token = serde_json::from_str(json).unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("1//0g"));
        assert_eq!(
            token.expires_at.unwrap().to_rfc3339(),
            "2025-03-01T09:30:00.123456+00:00"
        );
    }

    #[test]
    fn test_serializes_expires_at() {
        let token = Token::new("a", "Bearer").with_refresh_token("r");
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["access_token"], "a");
        assert!(json.get("expires_at").is_none());
        assert!(json.get("scope").is_none());
    }
}
