//! External collaborators of the poller.
//!
//! This module provides the mail-query capability (with a Gmail
//! implementation) and the notification sink (with a Telegram
//! implementation).

pub mod mail;
pub mod notify;

pub use mail::{GmailClient, Headers, MailError, MailQuery, Message, MessageId, after_query};
pub use notify::{NotificationSink, SendError, TelegramSink, format_notification};
