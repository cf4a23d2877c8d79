//! Account management module.
//!
//! Provides the account model, address validation, durable token storage
//! and the per-account credential store.

pub mod credentials;
mod model;
pub mod storage;
mod validation;

pub use credentials::{
    Credential, CredentialError, CredentialResult, CredentialStore, TokenRefresher,
};
pub use model::AccountId;
pub use storage::{
    FileTokenStorage, KeyringTokenStorage, MemoryTokenStorage, StorageError, TokenStorage,
};
pub use validation::{ValidationError, ValidationResult, validate_accounts, validate_address};
