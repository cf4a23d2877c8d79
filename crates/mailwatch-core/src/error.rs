//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur while assembling the watcher.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// OAuth client setup failed.
    #[error("OAuth error: {0}")]
    OAuth(#[from] mailwatch_oauth::Error),

    /// HTTP client setup failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Mail client setup failed.
    #[error("Mail error: {0}")]
    Mail(#[from] crate::service::MailError),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] crate::account::CredentialError),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
