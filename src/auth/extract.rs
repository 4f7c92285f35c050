//! Identity extraction from inbound requests
//!
//! Provides functions for:
//! - Reading the session identifier from the request query
//! - Recognizing a tenant authority key (`x-api-key: genius...`)
//! - Recognizing a direct bearer token (`Authorization: Bearer ...`)

use crate::Secret;
use axum::http::{header, HeaderMap, Uri};

/// Header carrying the tenant authority key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Marker an authority key must start with
pub const AUTHORITY_KEY_MARKER: &str = "genius";

/// Query parameter carrying the session identifier
pub const SESSION_ID_PARAM: &str = "sessionId";

const BEARER_SCHEME: &str = "Bearer";

/// Length of `"Bearer "`, the part stripped before the token
const BEARER_PREFIX_LEN: usize = 7;

/// Identifying material found on a request
#[derive(Debug, Clone)]
pub enum RequestIdentity {
    /// Tenant key to exchange at the authority
    AuthorityKey(Secret),
    /// Token usable directly as an API key
    BearerToken(Secret),
}

/// The transport-level parts of an inbound request the resolver needs
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Session identifier, if the transport supplied one
    pub session_id: Option<String>,
    /// Request headers
    pub headers: HeaderMap,
}

impl InboundRequest {
    /// Create a request from an explicit session id and headers
    pub fn new(session_id: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            session_id: Some(session_id.into()),
            headers,
        }
    }

    /// Build from a request URI and its headers
    pub fn from_parts(uri: &Uri, headers: &HeaderMap) -> Self {
        Self {
            session_id: session_id_from_uri(uri),
            headers: headers.clone(),
        }
    }

    /// Identifying material carried by the headers
    pub fn identity(&self) -> Option<RequestIdentity> {
        extract(&self.headers)
    }
}

/// Read `sessionId` from the query string
pub fn session_id_from_uri(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == SESSION_ID_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Extract identifying material from request headers
///
/// A `genius`-prefixed `x-api-key` takes precedence over a bearer token.
pub fn extract(headers: &HeaderMap) -> Option<RequestIdentity> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with(AUTHORITY_KEY_MARKER));

    if let Some(key) = api_key {
        return Some(RequestIdentity::AuthorityKey(Secret::new(key)));
    }

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with(BEARER_SCHEME))?;

    let token = authorization.get(BEARER_PREFIX_LEN..).unwrap_or_default();
    if token.is_empty() {
        return None;
    }

    Some(RequestIdentity::BearerToken(Secret::new(token)))
}
