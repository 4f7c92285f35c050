//! Credential injection into upstream requests
//!
//! Renders a resolved credential as HTTP headers:
//! - API key: configurable header name and prefix
//! - OAuth2: `Authorization: Bearer <token>`
//! - Basic: `Authorization: Basic base64(user:password)`

use super::types::{AuthScheme, Credential, CredentialData};
use axum::http::header::{HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

/// Injection errors
#[derive(Error, Debug)]
pub enum InjectError {
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] InvalidHeaderName),

    #[error("Credential cannot be encoded as a header value")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
}

/// How API key credentials are presented upstream
#[derive(Debug, Clone)]
pub struct HeaderStyle {
    /// Header carrying the API key
    pub api_key_header: HeaderName,
    /// Prefix placed before the key
    pub api_key_prefix: String,
}

impl HeaderStyle {
    /// Create a header style from configuration strings
    pub fn new(api_key_header: &str, api_key_prefix: impl Into<String>) -> Result<Self, InjectError> {
        Ok(Self {
            api_key_header: HeaderName::try_from(api_key_header)?,
            api_key_prefix: api_key_prefix.into(),
        })
    }
}

impl Default for HeaderStyle {
    fn default() -> Self {
        Self {
            api_key_header: header::AUTHORIZATION,
            api_key_prefix: "Bearer ".to_string(),
        }
    }
}

fn sensitive(value: String) -> Result<HeaderValue, InjectError> {
    let mut value = HeaderValue::try_from(value)?;
    value.set_sensitive(true);
    Ok(value)
}

/// Inject a credential into outbound headers, returning the scheme applied
pub fn inject_credentials(
    headers: &mut HeaderMap,
    credential: &Credential,
    style: &HeaderStyle,
) -> Result<AuthScheme, InjectError> {
    match &credential.data {
        CredentialData::ApiKey { key } => {
            let value = format!("{}{}", style.api_key_prefix, key.expose());
            headers.insert(style.api_key_header.clone(), sensitive(value)?);
        }

        CredentialData::OAuth2 { access_token, .. } => {
            let value = format!("Bearer {}", access_token.expose());
            headers.insert(header::AUTHORIZATION, sensitive(value)?);
        }

        CredentialData::Basic { user_id, password } => {
            let credentials = format!("{}:{}", user_id, password.expose());
            let encoded = STANDARD.encode(credentials.as_bytes());
            headers.insert(header::AUTHORIZATION, sensitive(format!("Basic {}", encoded))?);
        }
    }

    Ok(credential.scheme())
}
