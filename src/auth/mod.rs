//! OAuth2 authorization for the spreadsheet API
//!
//! Covers the persisted token set, silent access-token refresh, and the
//! one-time interactive consent flow with its local callback listener.

mod credential;
mod flow;
mod store;

pub use credential::Credential;
pub use flow::authorize;

// Construction pieces for tests that assemble a Credential by hand.
#[cfg(test)]
pub use credential::OAuthConfig;
#[cfg(test)]
pub use store::{TokenSet, TokenStore};
