//! Keyrelay - session-scoped credential resolution for service proxies
//!
//! Keyrelay sits in front of an upstream API on behalf of many tenants.
//! Each inbound request is tied to a session; the first request of a
//! session carries identifying headers, which are exchanged (possibly via a
//! remote credential authority) for the upstream credential. The result is
//! cached per session and lazily refreshed when it expires.

pub mod auth;
pub mod authority;
pub mod config;
pub mod server;
pub mod storage;

pub use auth::{
    AuthScheme, Credential, CredentialData, CredentialFields, InboundRequest, RequestIdentity,
    SessionResolver,
};
pub use authority::{AuthorityClient, HttpAuthority};
pub use storage::{EvictionPolicy, SessionStore};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Core error types for Keyrelay
#[derive(Error, Debug)]
pub enum KeyrelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authority error: {0}")]
    Authority(#[from] authority::AuthorityError),

    #[error("Authorization error: {0}")]
    Authorize(#[from] auth::AuthorizeError),

    #[error("Server error: {0}")]
    Server(#[from] server::ServerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A serializable secret string wrapper
#[derive(Debug, Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Create a new secret from a string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the secret value
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the underlying value is empty
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.expose_secret().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}
