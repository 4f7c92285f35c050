//! Credential resolution for Keyrelay sessions
//!
//! - Classify credentials into schemes (API key, OAuth2, basic)
//! - Extract tenant keys or bearer tokens from inbound requests
//! - Resolve, cache and lazily refresh per-session credentials
//! - Inject resolved credentials into upstream requests

mod extract;
mod inject;
mod resolver;
mod types;

pub use extract::{
    extract, session_id_from_uri, InboundRequest, RequestIdentity, API_KEY_HEADER,
    AUTHORITY_KEY_MARKER, SESSION_ID_PARAM,
};
pub use inject::{inject_credentials, HeaderStyle, InjectError};
pub use resolver::{AuthorizeError, SessionResolver};
pub use types::{AuthScheme, Credential, CredentialData, CredentialFields, CredentialShapeError};
