//! Dropbox API client

pub mod client;
pub mod errors;
pub mod types;

pub use client::{DropboxClient, Endpoints};
pub use errors::DropboxError;
pub use types::*;
