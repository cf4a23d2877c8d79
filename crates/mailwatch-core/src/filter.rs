//! Sender filter: From-header normalization and allow-list membership.

use std::collections::HashSet;

/// Extracts the bare sender address from a raw `From` header value.
///
/// The angle-bracket form (`Display Name <address>`) wins; a value without
/// a complete, non-empty `<...>` pair is returned as-is (trimmed).
///
/// ```
/// use mailwatch_core::filter::extract_address;
///
/// assert_eq!(extract_address("Alice <a@x.com>"), "a@x.com");
/// assert_eq!(extract_address("a@x.com"), "a@x.com");
/// assert_eq!(extract_address("Alice <a@x.com"), "Alice <a@x.com");
/// ```
#[must_use]
pub fn extract_address(raw: &str) -> &str {
    let mut rest = raw;
    while let Some(open) = rest.find('<') {
        let inner = &rest[open + 1..];
        match inner.find('>') {
            // "<>" carries nothing; keep looking past it
            Some(0) => rest = inner,
            Some(close) => return inner[..close].trim(),
            None => break,
        }
    }
    raw.trim()
}

/// Outcome of checking one `From` header against the allow list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderMatch<'a> {
    /// The extracted sender address, as it appeared in the header.
    pub address: &'a str,
    /// Whether the address is on the allow list.
    pub allowed: bool,
}

/// Set of sender addresses whose mail triggers a notification.
///
/// Addresses compare ASCII-case-insensitively and ignore surrounding
/// whitespace, so `Sender@Example.com` in the configuration matches
/// `sender@example.com` in a header. Read-only once built; share it behind
/// an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderAllowList {
    addresses: HashSet<String>,
}

impl SenderAllowList {
    /// Builds an allow list from configured addresses.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .map(|a| normalize(a.as_ref()))
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    /// Number of distinct allowed addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Returns true if nothing is allowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Tests a bare address for membership.
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(&normalize(address))
    }

    /// Extracts the sender from a raw `From` header and tests it.
    #[must_use]
    pub fn check<'a>(&self, raw_from: &'a str) -> SenderMatch<'a> {
        let address = extract_address(raw_from);
        SenderMatch {
            address,
            allowed: self.contains(address),
        }
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}
