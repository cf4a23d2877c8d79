//! Static configuration.
//!
//! Loaded once at startup from a JSON file (by default
//! `<config dir>/mailwatch/config.json`):
//!
//! ```json
//! {
//!   "accounts": ["me@gmail.com", "work@gmail.com"],
//!   "senders": ["boss@example.com"],
//!   "poll_interval_secs": 60,
//!   "oauth": { "client_secrets_file": "/home/me/.config/mailwatch/credentials.json" },
//!   "telegram": { "bot_token": "123:ABC", "chat_id": "-1001234" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mailwatch_oauth::{ClientSecrets, OAuthClient, Provider};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::{
    AccountId, FileTokenStorage, KeyringTokenStorage, TokenStorage, validate_accounts,
    validate_address,
};
use crate::error::{Error, Result};
use crate::filter::SenderAllowList;
use crate::poller::PollerSettings;
use crate::service::{GmailClient, TelegramSink};
use crate::supervisor::{PollerDeps, SupervisorConfig};

/// Redirect URI registered for installed-app clients.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/";

/// Largest page the Gmail list endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 500;

const fn default_poll_interval_secs() -> u64 {
    60
}

const fn default_page_size() -> u32 {
    10
}

const fn default_request_timeout_secs() -> u64 {
    30
}

/// Where credentials are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorageKind {
    /// One JSON file per account under `token_dir`.
    #[default]
    File,
    /// System keyring.
    Keyring,
}

/// OAuth client registration.
///
/// Either point `client_secrets_file` at the JSON downloaded from the Google
/// Cloud console, or give `client_id` (and usually `client_secret`) inline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthSettings {
    /// Downloaded client-secrets file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secrets_file: Option<PathBuf>,
    /// Client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Redirect URI used by `mailwatch authorize`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// Authorization endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    /// Token endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// Scopes to request; empty means read-only Gmail.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

/// Telegram bot used as the notification channel.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TelegramSettings {
    /// Bot token from `@BotFather`.
    pub bot_token: String,
    /// Target chat.
    pub chat_id: String,
    /// Bot API root override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// Watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Monitored mailboxes.
    pub accounts: Vec<String>,
    /// Senders whose mail triggers a notification.
    #[serde(default)]
    pub senders: Vec<String>,
    /// Seconds between polling cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Message ids listed per cycle.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Bound on every network call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Directory for file token storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_dir: Option<PathBuf>,
    /// Credential backend.
    #[serde(default)]
    pub token_storage: TokenStorageKind,
    /// OAuth client registration.
    #[serde(default)]
    pub oauth: OAuthSettings,
    /// Notification channel.
    pub telegram: TelegramSettings,
}

impl Config {
    /// Default configuration file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailwatch")
            .join("config.json")
    }

    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or fails
    /// [`validate`](Self::validate).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&contents)?;
        debug!(path = %path.display(), accounts = config.accounts.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the values are invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that cannot be expressed in the type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.accounts.is_empty() {
            problems.push("no accounts configured".to_string());
        } else if let Err(errors) = validate_accounts(&self.accounts) {
            problems.extend(errors.iter().map(|e| format!("accounts: {e}")));
        }
        for sender in &self.senders {
            if let Err(e) = validate_address(sender) {
                problems.push(format!("senders: {e}"));
            }
        }
        if self.poll_interval_secs == 0 {
            problems.push("poll_interval_secs must be positive".to_string());
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            problems.push(format!("page_size must be between 1 and {MAX_PAGE_SIZE}"));
        }
        if self.request_timeout_secs == 0 {
            problems.push("request_timeout_secs must be positive".to_string());
        }
        if self.oauth.client_secrets_file.is_none() && self.oauth.client_id.is_none() {
            problems.push("oauth: set client_secrets_file or client_id".to_string());
        }
        if self.telegram.bot_token.trim().is_empty() {
            problems.push("telegram.bot_token is empty".to_string());
        }
        if self.telegram.chat_id.trim().is_empty() {
            problems.push("telegram.chat_id is empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    /// Monitored accounts.
    #[must_use]
    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.iter().map(AccountId::new).collect()
    }

    /// Bound on every network call.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Poller tunables.
    #[must_use]
    pub const fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            page_size: self.page_size,
            request_timeout: self.request_timeout(),
        }
    }

    /// What the supervisor should poll.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            accounts: self.account_ids(),
            senders: SenderAllowList::new(&self.senders),
            settings: self.poller_settings(),
        }
    }

    /// Directory for file token storage.
    #[must_use]
    pub fn token_dir(&self) -> PathBuf {
        self.token_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mailwatch")
                .join("tokens")
        })
    }

    /// The configured credential backend.
    #[must_use]
    pub fn token_storage(&self) -> Arc<dyn TokenStorage> {
        match self.token_storage {
            TokenStorageKind::File => Arc::new(FileTokenStorage::new(self.token_dir())),
            TokenStorageKind::Keyring => Arc::new(KeyringTokenStorage::default()),
        }
    }

    /// HTTP client shared by the OAuth, Gmail and Telegram clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout())
            .user_agent(concat!("mailwatch/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }

    /// Builds the OAuth client from the inline settings or the secrets file.
    ///
    /// # Errors
    ///
    /// Returns an error if the secrets file is unreadable or an endpoint URL
    /// is invalid.
    pub fn oauth_client(&self, http: reqwest::Client) -> Result<OAuthClient> {
        let settings = &self.oauth;
        let secrets = match &settings.client_secrets_file {
            Some(path) => Some(ClientSecrets::from_file(path)?),
            None => None,
        };

        let client_id = settings
            .client_id
            .clone()
            .or_else(|| secrets.as_ref().map(|s| s.client_id.clone()))
            .ok_or_else(|| Error::Config("oauth client_id is not set".to_string()))?;
        let client_secret = settings
            .client_secret
            .clone()
            .or_else(|| secrets.as_ref().and_then(|s| s.client_secret.clone()));
        let redirect_uri = settings
            .redirect_uri
            .clone()
            .or_else(|| secrets.as_ref().and_then(|s| s.redirect_uris.first().cloned()))
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());

        let provider = self.provider(secrets.as_ref())?;

        let mut client = OAuthClient::new(client_id, provider)
            .with_redirect_uri(redirect_uri)
            .with_timeout(self.request_timeout())
            .with_http_client(http);
        if let Some(secret) = client_secret {
            client = client.with_client_secret(secret);
        }
        Ok(client)
    }

    fn provider(&self, secrets: Option<&ClientSecrets>) -> Result<Provider> {
        let settings = &self.oauth;
        let mut provider = match (secrets, &settings.auth_url, &settings.token_url) {
            (_, Some(auth), Some(token)) => Provider::new("Custom", auth, token)?,
            (Some(secrets), _, _) => secrets.provider(Vec::new())?,
            _ => Provider::google()?,
        };
        if !settings.scopes.is_empty() {
            provider = provider.with_default_scopes(settings.scopes.clone());
        } else if provider.default_scopes.is_empty() {
            provider = provider
                .with_default_scopes(vec![mailwatch_oauth::provider::GMAIL_READONLY_SCOPE.to_string()]);
        }
        Ok(provider)
    }

    /// Builds the Telegram notification sink.
    #[must_use]
    pub fn telegram_sink(&self, http: reqwest::Client) -> TelegramSink {
        let sink = TelegramSink::new(
            http,
            self.telegram.bot_token.trim(),
            self.telegram.chat_id.trim(),
            self.request_timeout(),
        );
        match &self.telegram.api_base {
            Some(base) => sink.with_base_url(base.as_str()),
            None => sink,
        }
    }

    /// Wires up every collaborator the pollers need.
    ///
    /// # Errors
    ///
    /// Returns an error if any client cannot be built.
    pub fn poller_deps(&self) -> Result<PollerDeps> {
        let http = self.http_client()?;
        Ok(PollerDeps {
            storage: self.token_storage(),
            refresher: Arc::new(self.oauth_client(http.clone())?),
            mail: Arc::new(GmailClient::new(http.clone(), self.request_timeout())?),
            sink: Arc::new(self.telegram_sink(http)),
        })
    }
}
