//! Credential authority lookups
//!
//! The authority exchanges an opaque tenant key for the concrete upstream
//! credential. Lookups are best-effort: every failure reads as "no
//! credential" to the resolver.

mod http;

pub use http::HttpAuthority;

use crate::auth::{Credential, CredentialShapeError};
use crate::Secret;
use async_trait::async_trait;
use thiserror::Error;

/// Authority lookup errors
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authority responded with status {0}")]
    Status(u16),

    #[error("Malformed authority response: {0}")]
    Malformed(String),

    #[error("No credential in authority response")]
    NoCredential,

    #[error("Invalid authority URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<CredentialShapeError> for AuthorityError {
    fn from(err: CredentialShapeError) -> Self {
        match err {
            CredentialShapeError::Invalid => AuthorityError::NoCredential,
            other => AuthorityError::Malformed(other.to_string()),
        }
    }
}

/// Trait for credential authorities
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Exchange an authority key for a credential
    ///
    /// The returned credential carries `authority_key` so it can be
    /// refreshed later. Any failure yields `None`.
    async fn fetch_credential(&self, authority_key: &Secret) -> Option<Credential>;
}
