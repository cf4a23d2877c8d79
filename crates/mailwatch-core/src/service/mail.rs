//! Mail query capability.
//!
//! The poller only needs two operations from a mail service: list the ids
//! of messages newer than a timestamp, and fetch the Subject/From/Date
//! headers of one message. [`MailQuery`] is that seam; [`GmailClient`]
//! implements it over the Gmail REST API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::account::AccountId;

/// Gmail REST API root.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/";

/// Header names requested from the mail service.
pub const REQUIRED_HEADERS: [&str; 3] = ["Subject", "From", "Date"];

/// Errors that can occur during mail queries.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// Transport failure, including request timeouts.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Mail API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body did not decode.
    #[error("Invalid response: {0}")]
    Json(#[from] serde_json::Error),

    /// A request URL could not be built.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Opaque message identifier assigned by the mail service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The header fields the watcher reads from a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    /// `Subject` header.
    pub subject: String,
    /// Raw `From` header.
    pub from: String,
    /// `Date` header, unparsed.
    pub date: String,
}

impl Headers {
    /// Stores a header value if `name` is one of the required headers
    /// (matched case-insensitively). Returns whether it was kept.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        let slot = if name.eq_ignore_ascii_case("subject") {
            &mut self.subject
        } else if name.eq_ignore_ascii_case("from") {
            &mut self.from
        } else if name.eq_ignore_ascii_case("date") {
            &mut self.date
        } else {
            return false;
        };
        *slot = value.into();
        true
    }

    /// Builds a record from `(name, value)` pairs, ignoring other headers.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            headers.set(name.as_ref(), value);
        }
        headers
    }
}

/// A message that passed through one filter+notify step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Service-assigned id.
    pub id: MessageId,
    /// Subject line.
    pub subject: String,
    /// Extracted sender address.
    pub sender: String,
    /// `Date` header as sent.
    pub date: String,
}

/// Read-only access to a mailbox.
#[async_trait]
pub trait MailQuery: Send + Sync {
    /// Lists up to `max_results` ids of messages received after `after`.
    async fn list_message_ids(
        &self,
        account: &AccountId,
        access_token: &str,
        after: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<MessageId>, MailError>;

    /// Fetches the Subject, From and Date headers of one message.
    async fn get_headers(
        &self,
        account: &AccountId,
        access_token: &str,
        id: &MessageId,
    ) -> Result<Headers, MailError>;
}

/// Builds the Gmail search query selecting messages after a timestamp.
///
/// Gmail's `after:` takes whole epoch seconds; the timestamp is floored, so
/// the query never excludes a message from the watermark's own second.
#[must_use]
pub fn after_query(after: DateTime<Utc>) -> String {
    format!("after:{}", after.timestamp())
}

/// Gmail REST API client.
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<ListedMessage>,
}

#[derive(Debug, Deserialize)]
struct ListedMessage {
    id: MessageId,
}

#[derive(Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<HeaderEntry>,
}

#[derive(Deserialize)]
struct HeaderEntry {
    name: String,
    value: String,
}

impl GmailClient {
    /// Creates a client against the public Gmail API.
    ///
    /// # Errors
    ///
    /// Returns an error if the API root fails to parse.
    pub fn new(http: Client, timeout: Duration) -> Result<Self, MailError> {
        Self::with_base_url(http, timeout, GMAIL_API_BASE)
    }

    /// Creates a client against another API root (a proxy or test server).
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL.
    pub fn with_base_url(
        http: Client,
        timeout: Duration,
        base_url: &str,
    ) -> Result<Self, MailError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    /// `{base}/users/{account}/messages[/{id}]`, each segment escaped.
    fn messages_url(&self, account: &AccountId, id: Option<&MessageId>) -> Result<Url, MailError> {
        let mut url = self.base_url.join("users/")?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.pop_if_empty().push(account.as_str()).push("messages");
            if let Some(id) = id {
                segments.push(&id.0);
            }
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MailError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        decode_reply(status, &body)
    }
}

/// Decodes a 2xx body; any other status becomes [`MailError::Api`].
fn decode_reply<T: serde::de::DeserializeOwned>(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<T, MailError> {
    if !status.is_success() {
        return Err(MailError::Api {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl MailQuery for GmailClient {
    async fn list_message_ids(
        &self,
        account: &AccountId,
        access_token: &str,
        after: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<MessageId>, MailError> {
        let url = self.messages_url(account, None)?;
        let q = after_query(after);
        let max = max_results.to_string();

        let list: ListResponse = self
            .get_json(url, access_token, &[("q", q.as_str()), ("maxResults", max.as_str())])
            .await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn get_headers(
        &self,
        account: &AccountId,
        access_token: &str,
        id: &MessageId,
    ) -> Result<Headers, MailError> {
        let url = self.messages_url(account, Some(id))?;
        let mut query = vec![("format", "metadata")];
        query.extend(REQUIRED_HEADERS.iter().map(|h| ("metadataHeaders", *h)));

        let message: MetadataResponse = self.get_json(url, access_token, &query).await?;
        let headers = message
            .payload
            .map(|p| p.headers)
            .unwrap_or_default()
            .into_iter()
            .map(|h| (h.name, h.value));
        Ok(Headers::from_pairs(headers))
    }
}
