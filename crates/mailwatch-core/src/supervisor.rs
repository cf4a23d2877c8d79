//! Supervisor: one poller task per account.
//!
//! Accounts whose credential fails to load are reported and left out; the
//! rest run as independent tasks in a [`JoinSet`]. The only thing the tasks
//! share is a [`CancellationToken`] for shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::account::{AccountId, CredentialError, CredentialStore, TokenRefresher, TokenStorage};
use crate::filter::SenderAllowList;
use crate::poller::{MailboxPoller, PollerError, PollerSettings, Watermark};
use crate::service::{MailQuery, NotificationSink};

/// What the supervisor polls and how.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Monitored accounts.
    pub accounts: Vec<AccountId>,
    /// Senders whose mail is relayed.
    pub senders: SenderAllowList,
    /// Settings applied to every poller.
    pub settings: PollerSettings,
}

/// Collaborators handed to every poller.
#[derive(Clone)]
pub struct PollerDeps {
    /// Where credentials are persisted.
    pub storage: Arc<dyn TokenStorage>,
    /// Token endpoint used for refreshes.
    pub refresher: Arc<dyn TokenRefresher>,
    /// Mail service.
    pub mail: Arc<dyn MailQuery>,
    /// Notification channel.
    pub sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for PollerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerDeps").finish_non_exhaustive()
    }
}

/// An account left out because its credential did not load.
#[derive(Debug)]
pub struct ExcludedAccount {
    /// The account.
    pub account: AccountId,
    /// Why it was excluded.
    pub error: CredentialError,
}

/// How a poller task ended.
#[derive(Debug)]
pub struct PollerExit {
    /// The account.
    pub account: AccountId,
    /// `Ok` after cancellation, the fatal error otherwise.
    pub result: Result<(), PollerError>,
}

/// Starts and joins the per-account pollers.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    deps: PollerDeps,
    tasks: JoinSet<PollerExit>,
}

impl Supervisor {
    /// Creates a supervisor; nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(config: SupervisorConfig, deps: PollerDeps) -> Self {
        Self {
            config,
            deps,
            tasks: JoinSet::new(),
        }
    }

    /// Number of poller tasks not yet joined.
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Loads every account's credential and spawns a poller for each one
    /// that loaded. Returns the accounts that were excluded.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Vec<ExcludedAccount> {
        let senders = Arc::new(self.config.senders.clone());
        let mut excluded = Vec::new();

        for account in &self.config.accounts {
            let store = CredentialStore::new(
                account.clone(),
                Arc::clone(&self.deps.storage),
                Arc::clone(&self.deps.refresher),
            )
            .with_refresh_timeout(self.config.settings.request_timeout);

            let credential = match store.load().await {
                Ok(credential) => credential,
                Err(e) => {
                    error!(account = %account, error = %e, "Excluding account from polling");
                    excluded.push(ExcludedAccount {
                        account: account.clone(),
                        error: e,
                    });
                    continue;
                }
            };

            let poller = MailboxPoller::new(
                store,
                credential,
                Arc::clone(&self.deps.mail),
                Arc::clone(&self.deps.sink),
                Arc::clone(&senders),
            )
            .with_watermark(Watermark::now())
            .with_settings(self.config.settings);

            let account = account.clone();
            let cancel = cancel.clone();
            self.tasks.spawn(async move {
                let result = poller.run(cancel).await;
                PollerExit { account, result }
            });
        }

        info!(
            running = self.tasks.len(),
            excluded = excluded.len(),
            "Pollers started"
        );
        excluded
    }

    /// Waits for every poller task to end.
    pub async fn wait(&mut self) -> Vec<PollerExit> {
        let mut exits = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            if let Some(exit) = Self::record(joined) {
                exits.push(exit);
            }
        }
        exits
    }

    /// Starts the pollers, runs until `shutdown` resolves (or every poller
    /// has ended), then cancels and joins them.
    pub async fn run_until<F>(mut self, shutdown: F) -> Vec<PollerExit>
    where
        F: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();
        self.start(&cancel).await;

        let mut exits = Vec::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested; stopping pollers at their next sleep");
                    cancel.cancel();
                    break;
                }
                joined = self.tasks.join_next() => match joined {
                    Some(joined) => exits.extend(Self::record(joined)),
                    None => {
                        warn!("No pollers left running");
                        break;
                    }
                },
            }
        }

        exits.extend(self.wait().await);
        exits
    }

    fn record(joined: Result<PollerExit, tokio::task::JoinError>) -> Option<PollerExit> {
        match joined {
            Ok(exit) => {
                match &exit.result {
                    Ok(()) => info!(account = %exit.account, "Poller stopped"),
                    Err(e) => error!(account = %exit.account, error = %e, "Poller ended"),
                }
                Some(exit)
            }
            Err(e) => {
                error!(error = %e, "Poller task aborted");
                None
            }
        }
    }
}
