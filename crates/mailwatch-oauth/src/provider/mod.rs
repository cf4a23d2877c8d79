//! `OAuth2` provider endpoints and client secrets.

use std::path::Path;

use crate::error::{Error, Result};
use serde::Deserialize;
use url::Url;

/// Read-only Gmail scope; the watcher never modifies a mailbox.
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// `OAuth2` provider configuration.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Provider name (e.g., "Google").
    pub name: String,
    /// Authorization endpoint URL.
    pub auth_url: Url,
    /// Token endpoint URL.
    pub token_url: Url,
    /// Default scopes.
    pub default_scopes: Vec<String>,
}

impl Provider {
    /// Creates a new provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if URLs are invalid.
    pub fn new(
        name: impl Into<String>,
        auth_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            auth_url: Url::parse(auth_url.as_ref())?,
            token_url: Url::parse(token_url.as_ref())?,
            default_scopes: Vec::new(),
        })
    }

    /// Sets the default scopes.
    #[must_use]
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Google `OAuth2` provider configuration with the read-only Gmail scope.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn google() -> Result<Self> {
        Ok(Self::new(
            "Google",
            "https://accounts.google.com/o/oauth2/auth",
            "https://oauth2.googleapis.com/token",
        )?
        .with_default_scopes(vec![GMAIL_READONLY_SCOPE.to_string()]))
    }

    /// Returns true for Google endpoints, which need extra parameters to
    /// hand out refresh tokens.
    #[must_use]
    pub fn is_google(&self) -> bool {
        self.name == "Google"
            || self
                .auth_url
                .host_str()
                .is_some_and(|h| h == "accounts.google.com")
    }
}

/// Client credentials as downloaded from the Google Cloud console.
///
/// The file wraps the fields in either an `installed` (desktop app) or a
/// `web` object.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    /// Client ID.
    pub client_id: String,
    /// Client secret.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorization endpoint.
    pub auth_uri: String,
    /// Token endpoint.
    pub token_uri: String,
    /// Registered redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum ClientSecretsFile {
    Installed(ClientSecrets),
    Web(ClientSecrets),
}

impl ClientSecrets {
    /// Parses a client secrets document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is neither an `installed` nor a
    /// `web` client.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(json)?;
        let secrets = match file {
            ClientSecretsFile::Installed(s) | ClientSecretsFile::Web(s) => s,
        };
        if secrets.client_id.is_empty() {
            return Err(Error::InvalidConfig("client_id is empty".into()));
        }
        Ok(secrets)
    }

    /// Reads and parses a client secrets file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Builds the provider described by these secrets, with the given scopes.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URLs are invalid.
    pub fn provider(&self, scopes: Vec<String>) -> Result<Provider> {
        let name = if self.auth_uri.contains("accounts.google.com") {
            "Google"
        } else {
            "Custom"
        };
        Ok(Provider::new(name, &self.auth_uri, &self.token_uri)?.with_default_scopes(scopes))
    }
}
