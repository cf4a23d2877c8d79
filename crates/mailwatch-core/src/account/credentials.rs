//! Per-account credential store.
//!
//! A [`CredentialStore`] owns the token lifecycle of exactly one account:
//! it loads the persisted token at startup and transparently refreshes it
//! (persisting the result) whenever it is expired or about to expire.
//!
//! The interactive grant is not part of this module; an account whose token
//! was never provisioned fails [`CredentialStore::load`] with
//! [`CredentialError::NotFound`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailwatch_oauth::{OAuthClient, Token};
use tracing::{debug, info, warn};

use super::AccountId;
use super::storage::{StorageError, TokenStorage};

/// A usable access/refresh token pair for one account.
pub type Credential = Token;

/// Default timeout for a refresh exchange (on top of the HTTP client's own).
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No credential has been provisioned for the account.
    #[error("no stored credential for {0}; run `mailwatch authorize {0}` first")]
    NotFound(AccountId),

    /// The stored record exists but cannot be decoded.
    #[error("stored credential for {account} is corrupt: {source}")]
    Corrupt {
        /// Affected account.
        account: AccountId,
        /// Decode error.
        source: serde_json::Error,
    },

    /// The storage backend failed.
    #[error("credential storage failed for {account}: {source}")]
    Storage {
        /// Affected account.
        account: AccountId,
        /// Backend error.
        source: StorageError,
    },

    /// Exchanging the refresh token failed, or produced no usable token.
    #[error("credential refresh failed for {account}: {reason}")]
    RefreshFailed {
        /// Affected account.
        account: AccountId,
        /// What went wrong.
        reason: String,
    },
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Exchanges a refresh token for a new access token.
///
/// Implemented by [`OAuthClient`]; tests substitute a fake endpoint.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Returns a fresh token derived from `token`'s refresh token.
    async fn refresh(&self, token: &Token) -> mailwatch_oauth::Result<Token>;
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, token: &Token) -> mailwatch_oauth::Result<Token> {
        self.refresh_token(token).await
    }
}

/// Owns token read, refresh and write for one account.
///
/// Refreshing takes `&mut self`, so a store can never run two refreshes of
/// its account at once.
pub struct CredentialStore {
    account: AccountId,
    storage: Arc<dyn TokenStorage>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_timeout: Duration,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("account", &self.account)
            .field("refresh_timeout", &self.refresh_timeout)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Creates a store for `account`.
    #[must_use]
    pub fn new(
        account: AccountId,
        storage: Arc<dyn TokenStorage>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            account,
            storage,
            refresher,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Sets the timeout applied to each refresh exchange.
    #[must_use]
    pub const fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// The account this store serves.
    #[must_use]
    pub const fn account(&self) -> &AccountId {
        &self.account
    }

    /// Reads the persisted credential.
    ///
    /// # Errors
    ///
    /// [`CredentialError::NotFound`] if nothing was provisioned,
    /// [`CredentialError::Corrupt`] if the record does not decode, and
    /// [`CredentialError::Storage`] for backend failures.
    pub async fn load(&self) -> CredentialResult<Credential> {
        match self.storage.load(&self.account).await {
            Ok(Some(token)) => {
                debug!(account = %self.account, expires_at = ?token.expires_at, "Loaded credential");
                Ok(token)
            }
            Ok(None) => Err(CredentialError::NotFound(self.account.clone())),
            Err(StorageError::Corrupt(source)) => Err(CredentialError::Corrupt {
                account: self.account.clone(),
                source,
            }),
            Err(source) => Err(CredentialError::Storage {
                account: self.account.clone(),
                source,
            }),
        }
    }

    /// Returns `credential` unchanged while it is valid; otherwise refreshes
    /// it, persists the new token and returns that.
    ///
    /// # Errors
    ///
    /// [`CredentialError::RefreshFailed`] if the exchange fails, times out,
    /// or yields a token that is itself already expired;
    /// [`CredentialError::Storage`] if the refreshed token cannot be
    /// persisted.
    pub async fn ensure_valid(&mut self, credential: Credential) -> CredentialResult<Credential> {
        self.ensure_valid_at(credential, Utc::now()).await
    }

    /// [`ensure_valid`](Self::ensure_valid) evaluated at a given instant.
    ///
    /// # Errors
    ///
    /// Same as [`ensure_valid`](Self::ensure_valid).
    pub async fn ensure_valid_at(
        &mut self,
        credential: Credential,
        now: DateTime<Utc>,
    ) -> CredentialResult<Credential> {
        if !credential.is_expired_at(now) {
            return Ok(credential);
        }

        debug!(account = %self.account, expires_at = ?credential.expires_at, "Refreshing credential");

        let refreshed = match tokio::time::timeout(
            self.refresh_timeout,
            self.refresher.refresh(&credential),
        )
        .await
        {
            Ok(Ok(token)) => token,
            Ok(Err(e)) => {
                if e.is_invalid_grant() {
                    warn!(account = %self.account, "Refresh token rejected; account must be re-authorized");
                }
                return Err(self.refresh_failed(e.to_string()));
            }
            Err(_) => {
                return Err(self.refresh_failed(format!(
                    "token endpoint did not answer within {:?}",
                    self.refresh_timeout
                )));
            }
        };

        if refreshed.is_expired_at(Utc::now()) {
            return Err(self.refresh_failed("token endpoint returned an already expired token".into()));
        }

        self.storage
            .store(&self.account, &refreshed)
            .await
            .map_err(|source| CredentialError::Storage {
                account: self.account.clone(),
                source,
            })?;

        info!(account = %self.account, expires_at = ?refreshed.expires_at, "Credential refreshed");
        Ok(refreshed)
    }

    fn refresh_failed(&self, reason: String) -> CredentialError {
        CredentialError::RefreshFailed {
            account: self.account.clone(),
            reason,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::account::storage::MemoryTokenStorage;
    use chrono::Duration as ChronoDuration;

    /// Token endpoint double: hands out tokens valid for `lifetime`.
    struct FakeRefresher {
        calls: AtomicUsize,
        lifetime: ChronoDuration,
        fail: bool,
    }

    impl FakeRefresher {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                lifetime: ChronoDuration::hours(1),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, token: &Token) -> mailwatch_oauth::Result<Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(mailwatch_oauth::Error::oauth_error(
                    "invalid_grant",
                    "Token has been expired or revoked.",
                ));
            }
            Ok(Token::new(format!("access-{n}"), "Bearer")
                .with_expires_at(Utc::now() + self.lifetime)
                .with_refresh_token(token.refresh_token()?))
        }
    }

    fn account() -> AccountId {
        AccountId::new("u@g.com")
    }

    fn expired() -> Token {
        Token::new("old", "Bearer")
            .with_refresh_token("refresh")
            .with_expires_at(Utc::now() - ChronoDuration::minutes(5))
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = CredentialStore::new(
            account(),
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(FakeRefresher::ok()),
        );
        assert!(matches!(store.load().await, Err(CredentialError::NotFound(_))));
    }

    #[tokio::test]
    async fn load_corrupt_record() {
        let storage = Arc::new(MemoryTokenStorage::new());
        storage.insert_raw(&account(), "{\"access_token\": 5}");
        let store = CredentialStore::new(account(), storage, Arc::new(FakeRefresher::ok()));

        assert!(matches!(store.load().await, Err(CredentialError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn valid_credential_is_returned_unchanged() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let refresher = Arc::new(FakeRefresher::ok());
        let mut store = CredentialStore::new(account(), storage.clone(), refresher.clone());

        let token = Token::new("live", "Bearer")
            .with_refresh_token("refresh")
            .with_expires_at(Utc::now() + ChronoDuration::minutes(30));
        let out = store.ensure_valid(token.clone()).await.unwrap();

        assert_eq!(out, token);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert!(storage.get(&account()).is_none());
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_and_persisted() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let refresher = Arc::new(FakeRefresher::ok());
        let mut store = CredentialStore::new(account(), storage.clone(), refresher.clone());

        let out = store.ensure_valid(expired()).await.unwrap();

        assert_eq!(out.access_token, "access-1");
        assert!(!out.is_expired());
        assert_eq!(out.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(storage.get(&account()), Some(out));
    }

    #[tokio::test]
    async fn credential_inside_safety_margin_is_refreshed() {
        let refresher = Arc::new(FakeRefresher::ok());
        let mut store = CredentialStore::new(
            account(),
            Arc::new(MemoryTokenStorage::new()),
            refresher.clone(),
        );

        let almost = Token::new("almost", "Bearer")
            .with_refresh_token("refresh")
            .with_expires_at(Utc::now() + ChronoDuration::seconds(10));
        let out = store.ensure_valid(almost).await.unwrap();

        assert_eq!(out.access_token, "access-1");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_is_reported_and_nothing_persisted() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let mut store =
            CredentialStore::new(account(), storage.clone(), Arc::new(FakeRefresher::failing()));

        let err = store.ensure_valid(expired()).await.unwrap_err();

        assert!(matches!(err, CredentialError::RefreshFailed { .. }));
        assert!(err.to_string().contains("invalid_grant"));
        assert!(storage.get(&account()).is_none());
    }

    #[tokio::test]
    async fn refreshed_token_that_is_already_expired_is_rejected() {
        let refresher = Arc::new(FakeRefresher {
            lifetime: ChronoDuration::seconds(5),
            ..FakeRefresher::ok()
        });
        let mut store =
            CredentialStore::new(account(), Arc::new(MemoryTokenStorage::new()), refresher);

        let err = store.ensure_valid(expired()).await.unwrap_err();
        assert!(matches!(err, CredentialError::RefreshFailed { .. }));
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_refresh() {
        let mut store = CredentialStore::new(
            account(),
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(FakeRefresher::ok()),
        );
        let token = Token::new("old", "Bearer").with_expires_at(Utc::now());

        let err = store.ensure_valid(token).await.unwrap_err();
        assert!(err.to_string().contains("No refresh token"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_token_endpoint_times_out() {
        struct Stalled;

        #[async_trait]
        impl TokenRefresher for Stalled {
            async fn refresh(&self, _token: &Token) -> mailwatch_oauth::Result<Token> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(mailwatch_oauth::Error::NoRefreshToken)
            }
        }

        let mut store =
            CredentialStore::new(account(), Arc::new(MemoryTokenStorage::new()), Arc::new(Stalled))
                .with_refresh_timeout(Duration::from_secs(30));

        let err = store.ensure_valid(expired()).await.unwrap_err();
        assert!(err.to_string().contains("did not answer"));
    }
}
