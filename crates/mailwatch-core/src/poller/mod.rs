//! Mailbox poller.
//!
//! One [`MailboxPoller`] drives the incremental query loop of one account:
//!
//! ```text
//! ensure credential -> list ids after watermark -> fetch headers (each id)
//!     -> sender filter -> notify -> advance watermark -> sleep
//! ```
//!
//! The poller exclusively owns its account's credential and watermark. Only
//! a credential failure ends the loop; query, fetch and send failures are
//! logged and the loop carries on.
//!
//! # Boundary policy
//!
//! The mail service's `after:` filter has one-second granularity. The query
//! uses the watermark floored to whole seconds, so a boundary message is
//! re-listed rather than skipped. The next watermark is the instant the
//! listing was issued, and ids listed by the previous cycle are not notified
//! again, which absorbs those re-listings.
//!
//! A listing holds at most `page_size` ids and is not paged further. When a
//! burst fills the page, the watermark still advances to the query instant,
//! so messages of that window beyond the page are never listed again. A full
//! page is logged at `warn`; raise `page_size` if bursts are expected.

mod watermark;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::account::{AccountId, Credential, CredentialError, CredentialStore};
use crate::filter::SenderAllowList;
use crate::service::{MailError, MailQuery, Message, MessageId, NotificationSink, format_notification};

pub use watermark::Watermark;

/// Default pause between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of ids listed per cycle.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Default bound on each network call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    /// Sleep between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Maximum ids listed per cycle.
    pub page_size: u32,
    /// Upper bound on every list, fetch and send call.
    pub request_timeout: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Errors that end or abort a cycle.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// No valid credential could be obtained. Fatal to the account.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Listing failed; the cycle was skipped.
    #[error("listing messages failed: {0}")]
    Query(#[from] MailError),

    /// Listing did not finish in time; the cycle was skipped.
    #[error("listing messages timed out after {0:?}")]
    QueryTimeout(Duration),
}

impl PollerError {
    /// Returns true if the account cannot continue polling.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Credential(_))
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Watermark after the cycle.
    pub watermark: Watermark,
    /// Ids returned by the listing.
    pub listed: usize,
    /// Notifications accepted by the sink.
    pub delivered: usize,
    /// Ids skipped because the previous cycle already handled them.
    pub duplicates: usize,
    /// Ids skipped because their headers could not be fetched.
    pub skipped: usize,
    /// Qualifying messages whose notification failed.
    pub failed_sends: usize,
}

/// Polls one account's mailbox.
pub struct MailboxPoller {
    account: AccountId,
    store: CredentialStore,
    credential: Credential,
    watermark: Watermark,
    mail: Arc<dyn MailQuery>,
    sink: Arc<dyn NotificationSink>,
    senders: Arc<SenderAllowList>,
    settings: PollerSettings,
    previous_ids: HashSet<MessageId>,
}

impl std::fmt::Debug for MailboxPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxPoller")
            .field("account", &self.account)
            .field("watermark", &self.watermark)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MailboxPoller {
    /// Creates a poller from a store and the credential it loaded.
    ///
    /// The watermark starts at the current time; use
    /// [`with_watermark`](Self::with_watermark) to resume from elsewhere.
    #[must_use]
    pub fn new(
        store: CredentialStore,
        credential: Credential,
        mail: Arc<dyn MailQuery>,
        sink: Arc<dyn NotificationSink>,
        senders: Arc<SenderAllowList>,
    ) -> Self {
        Self {
            account: store.account().clone(),
            store,
            credential,
            watermark: Watermark::now(),
            mail,
            sink,
            senders,
            settings: PollerSettings::default(),
            previous_ids: HashSet::new(),
        }
    }

    /// Sets the starting watermark.
    #[must_use]
    pub const fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = watermark;
        self
    }

    /// Sets interval, page size and timeouts.
    #[must_use]
    pub const fn with_settings(mut self, settings: PollerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The polled account.
    #[must_use]
    pub const fn account(&self) -> &AccountId {
        &self.account
    }

    /// Current watermark.
    #[must_use]
    pub const fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Runs one query/fetch/filter/notify cycle.
    ///
    /// On success the watermark has advanced to the instant the listing was
    /// issued (never backwards). On a query error it is left untouched.
    ///
    /// # Errors
    ///
    /// [`PollerError::Credential`] if the credential could not be refreshed;
    /// [`PollerError::Query`] or [`PollerError::QueryTimeout`] if listing
    /// failed.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PollerError> {
        self.credential = self.store.ensure_valid(self.credential.clone()).await?;
        let timeout = self.settings.request_timeout;

        let issued_at = Utc::now();
        let listing = self.mail.list_message_ids(
            &self.account,
            &self.credential.access_token,
            self.watermark.get(),
            self.settings.page_size,
        );
        let ids = tokio::time::timeout(timeout, listing)
            .await
            .map_err(|_| PollerError::QueryTimeout(timeout))??;

        if u32::try_from(ids.len()).is_ok_and(|n| n >= self.settings.page_size) {
            warn!(
                account = %self.account,
                page_size = self.settings.page_size,
                "Listing filled the page; older messages in this window may be missed"
            );
        }

        let mut report = CycleReport {
            watermark: self.watermark,
            listed: ids.len(),
            delivered: 0,
            duplicates: 0,
            skipped: 0,
            failed_sends: 0,
        };

        for id in &ids {
            if self.previous_ids.contains(id) {
                debug!(account = %self.account, id = %id, "Already handled last cycle");
                report.duplicates += 1;
                continue;
            }
            self.process(id, &mut report).await;
        }

        self.previous_ids = ids.into_iter().collect();
        self.watermark.advance_to(issued_at);
        report.watermark = self.watermark;

        debug!(
            account = %self.account,
            watermark = %self.watermark,
            listed = report.listed,
            delivered = report.delivered,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Fetches, filters and notifies one id. Never fails the cycle.
    async fn process(&self, id: &MessageId, report: &mut CycleReport) {
        let timeout = self.settings.request_timeout;
        let fetch = self
            .mail
            .get_headers(&self.account, &self.credential.access_token, id);

        let headers = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(headers)) => headers,
            Ok(Err(e)) => {
                warn!(account = %self.account, id = %id, error = %e, "Failed to fetch headers");
                report.skipped += 1;
                return;
            }
            Err(_) => {
                warn!(account = %self.account, id = %id, ?timeout, "Header fetch timed out");
                report.skipped += 1;
                return;
            }
        };

        let sender = self.senders.check(&headers.from);
        if !sender.allowed {
            debug!(account = %self.account, id = %id, sender = sender.address, "Sender not on allow list");
            return;
        }

        let message = Message {
            id: id.clone(),
            subject: headers.subject.clone(),
            sender: sender.address.to_string(),
            date: headers.date.clone(),
        };
        let text = format_notification(&self.account, &message);

        match tokio::time::timeout(timeout, self.sink.send(&text)).await {
            Ok(Ok(())) => {
                info!(account = %self.account, id = %id, sender = %message.sender, "Notification sent");
                report.delivered += 1;
            }
            Ok(Err(e)) => {
                warn!(account = %self.account, id = %id, error = %e, "Failed to send notification");
                report.failed_sends += 1;
            }
            Err(_) => {
                warn!(account = %self.account, id = %id, ?timeout, "Notification send timed out");
                report.failed_sends += 1;
            }
        }
    }

    /// Polls until `cancel` fires or the credential becomes unusable.
    ///
    /// Cancellation is only observed between cycles, so a cycle in progress
    /// always runs to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PollerError::Credential`] when the account can no longer be
    /// polled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PollerError> {
        info!(
            account = %self.account,
            interval_secs = self.settings.interval.as_secs(),
            watermark = %self.watermark,
            "Starting poller"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) if report.delivered > 0 || report.failed_sends > 0 => {
                    info!(
                        account = %self.account,
                        delivered = report.delivered,
                        failed = report.failed_sends,
                        "New mail processed"
                    );
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(account = %self.account, error = %e, "Stopping poller");
                    return Err(e);
                }
                Err(e) => {
                    warn!(account = %self.account, error = %e, "Cycle skipped; retrying after interval");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    info!(account = %self.account, "Poller shutting down");
                    return Ok(());
                }
                () = tokio::time::sleep(self.settings.interval) => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use mailwatch_oauth::Token;

    use super::*;
    use crate::account::TokenRefresher;
    use crate::account::storage::MemoryTokenStorage;
    use crate::service::{Headers, SendError};

    #[derive(Default)]
    struct FakeMail {
        pages: Mutex<Vec<Result<Vec<&'static str>, u16>>>,
        headers: HashMap<&'static str, (&'static str, &'static str)>,
        queries: Mutex<Vec<DateTime<Utc>>>,
        stall_fetch: bool,
    }

    impl FakeMail {
        fn with_message(mut self, id: &'static str, from: &'static str, subject: &'static str) -> Self {
            self.headers.insert(id, (from, subject));
            self
        }

        fn with_pages(self, pages: Vec<Result<Vec<&'static str>, u16>>) -> Self {
            *self.pages.lock().unwrap() = pages.into_iter().rev().collect();
            self
        }
    }

    #[async_trait]
    impl MailQuery for FakeMail {
        async fn list_message_ids(
            &self,
            _account: &AccountId,
            _access_token: &str,
            after: DateTime<Utc>,
            _max_results: u32,
        ) -> Result<Vec<MessageId>, MailError> {
            self.queries.lock().unwrap().push(after);
            match self.pages.lock().unwrap().pop() {
                Some(Ok(ids)) => Ok(ids.into_iter().map(MessageId::from).collect()),
                Some(Err(status)) => Err(MailError::Api {
                    status,
                    body: "backend error".into(),
                }),
                None => Ok(Vec::new()),
            }
        }

        async fn get_headers(
            &self,
            _account: &AccountId,
            _access_token: &str,
            id: &MessageId,
        ) -> Result<Headers, MailError> {
            if self.stall_fetch {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let (from, subject) = self.headers.get(id.0.as_str()).ok_or(MailError::Api {
                status: 404,
                body: "not found".into(),
            })?;
            Ok(Headers {
                subject: (*subject).to_string(),
                from: (*from).to_string(),
                date: "Mon, 3 Mar 2025 10:00:00 +0000".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, text: &str) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError::Rejected {
                    status: 400,
                    description: "chat not found".into(),
                });
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct FakeRefresher {
        fail: bool,
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, token: &Token) -> mailwatch_oauth::Result<Token> {
            if self.fail {
                return Err(mailwatch_oauth::Error::oauth_error("invalid_grant", "revoked"));
            }
            Ok(Token::new("fresh", "Bearer")
                .with_expires_at(Utc::now() + ChronoDuration::hours(1))
                .with_refresh_token(token.refresh_token()?))
        }
    }

    fn poller(mail: Arc<FakeMail>, sink: Arc<RecordingSink>, token: Token, fail_refresh: bool) -> MailboxPoller {
        let store = CredentialStore::new(
            AccountId::new("u@g.com"),
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(FakeRefresher { fail: fail_refresh }),
        );
        MailboxPoller::new(
            store,
            token,
            mail,
            sink,
            Arc::new(SenderAllowList::new(["s1@x.com"])),
        )
    }

    fn live_token() -> Token {
        Token::new("live", "Bearer")
            .with_refresh_token("refresh")
            .with_expires_at(Utc::now() + ChronoDuration::hours(1))
    }

    fn expired_token() -> Token {
        Token::new("stale", "Bearer")
            .with_refresh_token("refresh")
            .with_expires_at(Utc::now() - ChronoDuration::minutes(1))
    }

    #[tokio::test]
    async fn notifies_only_allowed_senders() {
        let mail = Arc::new(
            FakeMail::default()
                .with_message("m1", "Sender One <s1@x.com>", "Invoice")
                .with_message("m2", "Spam <s2@x.com>", "Offer")
                .with_pages(vec![Ok(vec!["m1", "m2"])]),
        );
        let sink = Arc::new(RecordingSink::default());
        let mut poller = poller(mail, sink.clone(), live_token(), false);

        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.listed, 2);
        assert_eq!(report.delivered, 1);
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("New mail in u@g.com | Subject: Invoice | From: s1@x.com"));
    }

    #[tokio::test]
    async fn watermark_advances_to_query_time() {
        let mail = Arc::new(FakeMail::default());
        let start = Utc::now() - ChronoDuration::minutes(10);
        let mut poller = poller(mail.clone(), Arc::default(), live_token(), false)
            .with_watermark(Watermark::new(start));

        let before_cycle = Utc::now();
        let report = poller.run_cycle().await.unwrap();

        assert_eq!(mail.queries.lock().unwrap().as_slice(), &[start]);
        assert!(report.watermark.get() >= before_cycle);
        assert_eq!(poller.watermark(), report.watermark);
    }

    #[tokio::test]
    async fn query_failure_leaves_watermark_unchanged() {
        let mail = Arc::new(FakeMail::default().with_pages(vec![Err(503)]));
        let start = Watermark::new(Utc::now() - ChronoDuration::minutes(10));
        let mut poller = poller(mail, Arc::default(), live_token(), false).with_watermark(start);

        let err = poller.run_cycle().await.unwrap_err();

        assert!(matches!(err, PollerError::Query(_)));
        assert!(!err.is_fatal());
        assert_eq!(poller.watermark(), start);
    }

    #[tokio::test]
    async fn header_failure_skips_only_that_message() {
        let mail = Arc::new(
            FakeMail::default()
                .with_message("m2", "s1@x.com", "Second")
                .with_pages(vec![Ok(vec!["missing", "m2"])]),
        );
        let sink = Arc::new(RecordingSink::default());
        let mut poller = poller(mail, sink.clone(), live_token(), false);

        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_failure_is_not_fatal() {
        let mail = Arc::new(
            FakeMail::default()
                .with_message("m1", "s1@x.com", "Hello")
                .with_pages(vec![Ok(vec!["m1"])]),
        );
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let mut poller = poller(mail, sink, live_token(), false);

        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed_sends, 1);
    }

    #[tokio::test]
    async fn boundary_relisting_is_not_notified_twice() {
        let mail = Arc::new(
            FakeMail::default()
                .with_message("m1", "s1@x.com", "Boundary")
                .with_message("m2", "s1@x.com", "Later")
                .with_pages(vec![Ok(vec!["m1"]), Ok(vec!["m1", "m2"])]),
        );
        let sink = Arc::new(RecordingSink::default());
        let mut poller = poller(mail, sink.clone(), live_token(), false);

        poller.run_cycle().await.unwrap();
        let second = poller.run_cycle().await.unwrap();

        assert_eq!(second.duplicates, 1);
        assert_eq!(second.delivered, 1);
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn full_page_still_advances_watermark() {
        let mail = Arc::new(
            FakeMail::default()
                .with_message("m1", "s1@x.com", "First")
                .with_message("m2", "s1@x.com", "Second")
                .with_pages(vec![Ok(vec!["m1", "m2"])]),
        );
        let sink = Arc::new(RecordingSink::default());
        let start = Utc::now() - ChronoDuration::hours(1);
        let mut poller = poller(mail.clone(), sink.clone(), live_token(), false)
            .with_watermark(Watermark::new(start))
            .with_settings(PollerSettings {
                page_size: 2,
                ..PollerSettings::default()
            });

        let issued = Utc::now();
        let report = poller.run_cycle().await.unwrap();
        poller.run_cycle().await.unwrap();

        assert_eq!(report.listed, 2);
        assert_eq!(report.delivered, 2);
        assert!(report.watermark.get() >= issued);
        let queries = mail.queries.lock().unwrap().clone();
        assert_eq!(queries[0], start);
        assert!(queries[1] >= issued);
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_before_listing() {
        let mail = Arc::new(FakeMail::default());
        let mut poller = poller(mail, Arc::default(), expired_token(), false);

        poller.run_cycle().await.unwrap();

        assert_eq!(poller.credential.access_token, "fresh");
    }

    #[tokio::test]
    async fn refresh_failure_is_fatal() {
        let mail = Arc::new(FakeMail::default());
        let mut poller = poller(mail.clone(), Arc::default(), expired_token(), true);

        let err = poller.run_cycle().await.unwrap_err();

        assert!(err.is_fatal());
        assert!(mail.queries.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_fetch_times_out() {
        let mail = Arc::new(FakeMail {
            stall_fetch: true,
            ..FakeMail::default()
                .with_message("m1", "s1@x.com", "Slow")
                .with_pages(vec![Ok(vec!["m1"])])
        });
        let mut poller = poller(mail, Arc::default(), live_token(), false);

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_at_sleep_boundary_on_cancel() {
        let mail = Arc::new(FakeMail::default());
        let poller = poller(mail.clone(), Arc::default(), live_token(), false);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.run(cancel.clone()));

        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3 + Duration::from_secs(1)).await;
        cancel.cancel();

        task.await.unwrap().unwrap();
        assert_eq!(mail.queries.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ends_on_credential_failure() {
        let mail = Arc::new(FakeMail::default());
        let poller = poller(mail, Arc::default(), expired_token(), true);

        let result = poller.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(PollerError::Credential(_))));
    }
}
