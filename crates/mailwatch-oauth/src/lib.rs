//! # mailwatch-oauth
//!
//! `OAuth2` token lifecycle for mailbox watchers.
//!
//! ## Features
//!
//! - **Token model**: access/refresh token pair with expiry and a safety margin
//! - **Refresh**: refresh-token exchange against the provider's token endpoint
//! - **Provisioning**: Authorization Code Flow (with PKCE) for the one-shot
//!   browser grant that creates the first persisted token
//! - **Client secrets**: loads Google's downloaded `credentials.json` format
//!
//! ## Keeping a token fresh
//!
//! ```ignore
//! use mailwatch_oauth::{OAuthClient, Provider};
//!
//! let client = OAuthClient::new("client_id", Provider::google()?)
//!     .with_client_secret("secret");
//!
//! if token.is_expired() {
//!     token = client.refresh_token(&token).await?;
//! }
//! ```
//!
//! ## Provisioning a token
//!
//! ```ignore
//! use mailwatch_oauth::{AuthorizationCodeFlow, OAuthClient, Provider};
//!
//! let client = OAuthClient::new("client_id", Provider::google()?)
//!     .with_client_secret("secret")
//!     .with_redirect_uri("http://localhost:8080/");
//! let flow = AuthorizationCodeFlow::new(client).with_pkce();
//!
//! println!("Visit: {}", flow.authorization_url(None, Some("state"))?);
//! let token = flow.exchange_code("code_from_redirect", None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod provider;
pub mod token;

pub use error::{Error, Result};
pub use flow::{AuthorizationCodeFlow, OAuthClient, PkceChallenge};
pub use provider::{ClientSecrets, Provider};
pub use token::Token;
