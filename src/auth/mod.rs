//! OAuth2 credential lifecycle
//!
//! Holds the access/refresh token pair for the process and refreshes the
//! access token before it expires.

pub mod credential;
pub mod manager;
pub mod store;

pub use credential::{AccessCredential, IssuedCredential};
pub use manager::{CredentialManager, CredentialSettings, CredentialStatus, DEFAULT_REFRESH_BUFFER};
pub use store::CredentialStore;
