//! Durable token storage, one record per account.
//!
//! Backends:
//! - [`FileTokenStorage`]: one JSON file per account in a directory
//! - [`KeyringTokenStorage`]: the platform credential store
//!   (Secret Service, Keychain, Credential Manager)
//! - [`MemoryTokenStorage`]: process-local, for tests and dry runs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use keyring::Entry;
use mailwatch_oauth::Token;
use tracing::debug;

use super::AccountId;

/// Service name used for keyring entries.
pub const KEYRING_SERVICE: &str = "mailwatch";

/// Error type for token storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Keyring access failed.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// A record exists but does not decode as a token.
    #[error("Corrupt token record: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// A blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Durable, per-account token persistence.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Reads the persisted token of an account; `None` if there is none.
    async fn load(&self, account: &AccountId) -> Result<Option<Token>, StorageError>;

    /// Persists (replaces) the token of an account.
    async fn store(&self, account: &AccountId, token: &Token) -> Result<(), StorageError>;
}

/// Stores each account's token as `<dir>/<account>.json`.
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    dir: PathBuf,
}

impl FileTokenStorage {
    /// Creates a storage rooted at `dir`. The directory is created on the
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the token files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the token file for an account.
    #[must_use]
    pub fn path_for(&self, account: &AccountId) -> PathBuf {
        let file_name: String = account
            .as_str()
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn load(&self, account: &AccountId) -> Result<Option<Token>, StorageError> {
        let path = self.path_for(account);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(account = %account, path = %path.display(), "No token file");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, account: &AccountId, token: &Token) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(account);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(token)?;

        // Write-then-rename so a crash never leaves a half-written token
        tokio::fs::write(&tmp, &json).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, &path).await?;

        debug!(account = %account, path = %path.display(), "Stored token");
        Ok(())
    }
}

/// Stores each account's token as a JSON secret in the system keyring.
#[derive(Debug, Clone)]
pub struct KeyringTokenStorage {
    service: String,
}

impl Default for KeyringTokenStorage {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringTokenStorage {
    /// Creates a storage using the given keyring service name.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait]
impl TokenStorage for KeyringTokenStorage {
    async fn load(&self, account: &AccountId) -> Result<Option<Token>, StorageError> {
        let service = self.service.clone();
        let user = account.to_string();

        let secret = tokio::task::spawn_blocking(move || {
            match Entry::new(&service, &user)?.get_password() {
                Ok(secret) => Ok(Some(secret)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;

        match secret {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => {
                debug!(account = %account, "No keyring entry");
                Ok(None)
            }
        }
    }

    async fn store(&self, account: &AccountId, token: &Token) -> Result<(), StorageError> {
        let service = self.service.clone();
        let user = account.to_string();
        let json = serde_json::to_string(token)?;

        tokio::task::spawn_blocking(move || Entry::new(&service, &user)?.set_password(&json))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        debug!(account = %account, "Stored token in keyring");
        Ok(())
    }
}

/// Keeps tokens in process memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    tokens: Mutex<HashMap<AccountId, String>>,
}

impl MemoryTokenStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a raw record, bypassing serialization (lets tests plant
    /// corrupt data).
    pub fn insert_raw(&self, account: &AccountId, record: impl Into<String>) {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(account.clone(), record.into());
    }

    /// Returns the stored token of an account, if any and decodable.
    #[must_use]
    pub fn get(&self, account: &AccountId) -> Option<Token> {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(account)
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn load(&self, account: &AccountId) -> Result<Option<Token>, StorageError> {
        let record = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(account)
            .cloned();
        record
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn store(&self, account: &AccountId, token: &Token) -> Result<(), StorageError> {
        let json = serde_json::to_string(token)?;
        self.insert_raw(account, json);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample_token() -> Token {
        Token::new("ya29.access", "Bearer")
            .with_refresh_token("1//refresh")
            .with_expires_at(Utc::now() + Duration::hours(1))
    }

    #[tokio::test]
    async fn test_file_storage_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path());

        let loaded = storage.load(&AccountId::new("u@g.com")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_file_storage_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("tokens"));
        let account = AccountId::new("u@g.com");
        let token = sample_token();

        storage.store(&account, &token).await.unwrap();

        assert!(dir.path().join("tokens/u@g.com.json").exists());
        assert!(!dir.path().join("tokens/u@g.com.json.tmp").exists());
        assert_eq!(storage.load(&account).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_file_storage_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path());
        let account = AccountId::new("u@g.com");
        std::fs::write(storage.path_for(&account), b"{not json").unwrap();

        let err = storage.load(&account).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[test]
    fn test_path_for_sanitizes_separators() {
        let storage = FileTokenStorage::new("/tmp/t");
        let path = storage.path_for(&AccountId::new("a/b@x.com"));
        assert_eq!(path, PathBuf::from("/tmp/t/a_b@x.com.json"));
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryTokenStorage::new();
        let account = AccountId::new("u@g.com");
        assert!(storage.load(&account).await.unwrap().is_none());

        let token = sample_token();
        storage.store(&account, &token).await.unwrap();
        assert_eq!(storage.get(&account), Some(token));

        storage.insert_raw(&account, "garbage");
        assert!(matches!(
            storage.load(&account).await,
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    #[ignore = "Interacts with system keyring"]
    async fn test_keyring_storage_round_trip() {
        let storage = KeyringTokenStorage::new("mailwatch-test");
        let account = AccountId::new("keyring-test@example.com");
        let token = sample_token();

        storage.store(&account, &token).await.unwrap();
        assert_eq!(storage.load(&account).await.unwrap(), Some(token));
    }
}
