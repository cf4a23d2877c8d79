//! Account model types.

use serde::{Deserialize, Serialize};

/// Identifier of a monitored mailbox: its email address.
///
/// This is the key for the mail service (`users/{id}`), for token
/// persistence, and for log fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account ID from a mailbox address.
    ///
    /// Surrounding whitespace is dropped; case is preserved because the mail
    /// service addresses the mailbox exactly as configured.
    #[must_use]
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_string())
    }

    /// The mailbox address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
