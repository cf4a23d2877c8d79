//! # mailwatch-core
//!
//! Core of the `mailwatch` Gmail watcher.
//!
//! This crate provides:
//! - Account model and address validation
//! - Credential Store with transparent OAuth refresh and durable token storage
//! - Sender allow-list filtering
//! - Mail query capability (Gmail REST) and notification sink (Telegram)
//! - **Mailbox Poller** - per-account incremental polling with its own watermark
//! - **Supervisor** - one independent poller task per account, clean shutdown
//! - Static JSON configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod config;
mod error;
pub mod filter;
pub mod poller;
pub mod service;
pub mod supervisor;

pub use account::credentials;
pub use account::{AccountId, Credential, CredentialError, CredentialStore};
pub use account::{FileTokenStorage, KeyringTokenStorage, TokenRefresher, TokenStorage};
pub use config::{Config, TokenStorageKind};
pub use error::{Error, Result};
pub use filter::{SenderAllowList, SenderMatch, extract_address};
pub use poller::{CycleReport, MailboxPoller, PollerError, PollerSettings, Watermark};
pub use service::{
    GmailClient, Headers, MailError, MailQuery, Message, MessageId, NotificationSink, SendError,
    TelegramSink, format_notification,
};
pub use supervisor::{ExcludedAccount, PollerDeps, PollerExit, Supervisor, SupervisorConfig};
