//! Address validation for configured accounts and senders.

/// Validation error for a configured address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Address is empty.
    EmptyAddress,
    /// Address is not of the form `local@domain.tld`.
    InvalidAddress(String),
    /// The same account is configured twice.
    DuplicateAccount(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyAddress => f.write_str("address is empty"),
            Self::InvalidAddress(a) => write!(f, "invalid email address: {a:?}"),
            Self::DuplicateAccount(a) => write!(f, "account configured more than once: {a}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a set of addresses.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate a single bare address.
///
/// # Errors
///
/// Returns the reason the address is unusable.
pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ValidationError::EmptyAddress);
    }
    if !is_valid_email(address) {
        return Err(ValidationError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// Validate the monitored account list: every address well-formed, no
/// mailbox listed twice (compared case-insensitively).
///
/// # Errors
///
/// Returns every problem found, not just the first.
pub fn validate_accounts<S: AsRef<str>>(addresses: &[S]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for address in addresses {
        let address = address.as_ref().trim();
        if let Err(e) = validate_address(address) {
            errors.push(e);
        } else if !seen.insert(address.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicateAccount(address.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Basic email validation.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return false;
    }

    // Domain must contain at least one dot, with no empty labels
    domain.contains('.') && domain.split('.').all(|label| !label.is_empty())
}
