//! Credential types and scheme classification
//!
//! Provides:
//! - `Credential`, a tagged union over the supported upstream schemes
//! - `AuthScheme`, the scheme name reported to downstream callers
//! - `CredentialFields`, the raw optional-field shape returned by the authority

use crate::Secret;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The authentication scheme a credential represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthScheme {
    /// Static API key
    #[serde(rename = "apiKey")]
    ApiKey,
    /// OAuth2 access token with an expiry
    #[serde(rename = "oauth2")]
    OAuth2,
    /// User id and password
    #[serde(rename = "basic")]
    Basic,
    /// None of the known shapes
    #[serde(rename = "invalid")]
    Invalid,
}

impl AuthScheme {
    /// Whether this scheme denotes a usable credential
    pub fn is_valid(&self) -> bool {
        !matches!(self, AuthScheme::Invalid)
    }
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthScheme::ApiKey => write!(f, "apiKey"),
            AuthScheme::OAuth2 => write!(f, "oauth2"),
            AuthScheme::Basic => write!(f, "basic"),
            AuthScheme::Invalid => write!(f, "invalid"),
        }
    }
}

/// The scheme-specific part of a credential
#[derive(Debug, Clone)]
pub enum CredentialData {
    /// API key authentication
    ApiKey { key: Secret },

    /// OAuth2 bearer token, valid until `expires_at`
    OAuth2 {
        access_token: Secret,
        expires_at: DateTime<Utc>,
    },

    /// User id and password
    Basic { user_id: String, password: Secret },
}

/// A resolved upstream credential
#[derive(Debug, Clone)]
pub struct Credential {
    /// The scheme-specific data
    pub data: CredentialData,
    /// Tenant key the credential was fetched with, kept for refreshes
    pub authority_key: Option<Secret>,
}

impl Credential {
    /// Create a credential that was not obtained through the authority
    pub fn new(data: CredentialData) -> Self {
        Self {
            data,
            authority_key: None,
        }
    }

    /// Create an API key credential
    pub fn api_key(key: impl Into<Secret>) -> Self {
        Self::new(CredentialData::ApiKey { key: key.into() })
    }

    /// Create an OAuth2 credential
    pub fn oauth2(access_token: impl Into<Secret>, expires_at: DateTime<Utc>) -> Self {
        Self::new(CredentialData::OAuth2 {
            access_token: access_token.into(),
            expires_at,
        })
    }

    /// Create a basic credential
    pub fn basic(user_id: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self::new(CredentialData::Basic {
            user_id: user_id.into(),
            password: password.into(),
        })
    }

    /// Stamp the credential with the authority key it can be refreshed with
    pub fn with_authority_key(mut self, authority_key: impl Into<Secret>) -> Self {
        self.authority_key = Some(authority_key.into());
        self
    }

    /// The scheme of this credential
    pub fn scheme(&self) -> AuthScheme {
        match self.data {
            CredentialData::ApiKey { .. } => AuthScheme::ApiKey,
            CredentialData::OAuth2 { .. } => AuthScheme::OAuth2,
            CredentialData::Basic { .. } => AuthScheme::Basic,
        }
    }

    /// Expiry instant, if the scheme has one
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match &self.data {
            CredentialData::OAuth2 { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// Check if the credential has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The OAuth2 access token, if this is an OAuth2 credential
    pub fn access_token(&self) -> Option<&Secret> {
        match &self.data {
            CredentialData::OAuth2 { access_token, .. } => Some(access_token),
            _ => None,
        }
    }
}

/// Errors converting a raw shape into a credential
#[derive(Error, Debug)]
pub enum CredentialShapeError {
    #[error("no known credential shape present")]
    Invalid,

    #[error("invalid expiresAt timestamp '{0}': {1}")]
    InvalidExpiry(String, chrono::ParseError),
}

/// Raw credential fields as returned by the authority
///
/// Any combination of fields may be present; `classify` decides which
/// shape wins. Empty strings count as missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialFields {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|v| !v.is_empty())
}

/// ISO-8601 forms accepted without an offset, read as UTC
const NAIVE_EXPIRY_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse an ISO-8601 expiry: RFC 3339 first, then offset-less forms as UTC
fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let rfc3339_err = match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => return Ok(at.with_timezone(&Utc)),
        Err(e) => e,
    };

    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    for format in NAIVE_EXPIRY_FORMATS {
        if let Ok(at) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(at.and_utc());
        }
    }

    if let Some(at) = NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(at.and_utc());
    }

    Err(rfc3339_err)
}

impl CredentialFields {
    /// Classify the raw shape: ApiKey, then OAuth2, then Basic
    pub fn classify(&self) -> AuthScheme {
        if present(&self.api_key).is_some() {
            return AuthScheme::ApiKey;
        }
        if present(&self.access_token).is_some() && present(&self.expires_at).is_some() {
            return AuthScheme::OAuth2;
        }
        if present(&self.user_id).is_some() && present(&self.password).is_some() {
            return AuthScheme::Basic;
        }
        AuthScheme::Invalid
    }

    /// Convert into a typed credential stamped with `authority_key`
    pub fn into_credential(
        self,
        authority_key: Option<Secret>,
    ) -> Result<Credential, CredentialShapeError> {
        let data = match self.classify() {
            AuthScheme::ApiKey => CredentialData::ApiKey {
                key: Secret::new(self.api_key.unwrap_or_default()),
            },
            AuthScheme::OAuth2 => {
                let raw = self.expires_at.unwrap_or_default();
                let expires_at = parse_expiry(&raw)
                    .map_err(|e| CredentialShapeError::InvalidExpiry(raw.clone(), e))?;
                CredentialData::OAuth2 {
                    access_token: Secret::new(self.access_token.unwrap_or_default()),
                    expires_at,
                }
            }
            AuthScheme::Basic => CredentialData::Basic {
                user_id: self.user_id.unwrap_or_default(),
                password: Secret::new(self.password.unwrap_or_default()),
            },
            AuthScheme::Invalid => return Err(CredentialShapeError::Invalid),
        };

        Ok(Credential {
            data,
            authority_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn fields(json: &str) -> CredentialFields {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_classify_precedence() {
        assert_eq!(fields(r#"{"apiKey":"K1"}"#).classify(), AuthScheme::ApiKey);
        assert_eq!(
            fields(r#"{"accessToken":"T1","expiresAt":"2020-01-01T00:00:00Z"}"#).classify(),
            AuthScheme::OAuth2
        );
        assert_eq!(
            fields(r#"{"userId":"u","password":"p"}"#).classify(),
            AuthScheme::Basic
        );

        // ApiKey wins over everything else
        let all = fields(
            r#"{"apiKey":"K","accessToken":"T","expiresAt":"2020-01-01T00:00:00Z","userId":"u","password":"p"}"#,
        );
        assert_eq!(all.classify(), AuthScheme::ApiKey);

        // OAuth2 wins over Basic
        let both = fields(
            r#"{"accessToken":"T","expiresAt":"2020-01-01T00:00:00Z","userId":"u","password":"p"}"#,
        );
        assert_eq!(both.classify(), AuthScheme::OAuth2);
    }

    #[test]
    fn test_classify_incomplete_shapes_are_invalid() {
        assert_eq!(fields("{}").classify(), AuthScheme::Invalid);
        assert_eq!(fields(r#"{"accessToken":"T"}"#).classify(), AuthScheme::Invalid);
        assert_eq!(fields(r#"{"userId":"u"}"#).classify(), AuthScheme::Invalid);
        assert_eq!(fields(r#"{"apiKey":""}"#).classify(), AuthScheme::Invalid);
        assert_eq!(fields(r#"{"other":"x"}"#).classify(), AuthScheme::Invalid);
    }

    #[test]
    fn test_into_credential_stamps_authority_key() {
        let cred = fields(r#"{"apiKey":"K1"}"#)
            .into_credential(Some(Secret::new("G1")))
            .unwrap();

        assert_eq!(cred.scheme(), AuthScheme::ApiKey);
        assert_eq!(cred.authority_key.as_ref().unwrap().expose(), "G1");
        match &cred.data {
            CredentialData::ApiKey { key } => assert_eq!(key.expose(), "K1"),
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_into_credential_parses_expiry() {
        let cred = fields(r#"{"accessToken":"T1","expiresAt":"2020-01-01T00:00:00Z"}"#)
            .into_credential(Some(Secret::new("G2")))
            .unwrap();

        assert_eq!(cred.scheme(), AuthScheme::OAuth2);
        assert_eq!(
            cred.expires_at(),
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(cred.access_token().unwrap().expose(), "T1");
        assert!(cred.is_expired());
    }

    #[test]
    fn test_expiry_accepts_iso8601_forms() {
        let midnight = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();

        for raw in [
            "2099-01-01T00:00:00Z",
            "2099-01-01T00:00:00.000Z",
            "2099-01-01T01:00:00+01:00",
            "2099-01-01T00:00:00",
            "2099-01-01T00:00:00.000",
            "2099-01-01T00:00Z",
            "2099-01-01T00:00",
            "2099-01-01",
        ] {
            let json = format!(r#"{{"accessToken":"T1","expiresAt":"{}"}}"#, raw);
            let cred = fields(&json).into_credential(None).unwrap();
            assert_eq!(cred.expires_at(), Some(midnight), "expiresAt {}", raw);
        }

        let cred = fields(r#"{"accessToken":"T1","expiresAt":"2099-01-01T12:30:15.250"}"#)
            .into_credential(None)
            .unwrap();
        assert_eq!(
            cred.expires_at(),
            Some(Utc.with_ymd_and_hms(2099, 1, 1, 12, 30, 15).unwrap() + Duration::milliseconds(250))
        );
    }

    #[test]
    fn test_into_credential_rejects_bad_expiry() {
        let result = fields(r#"{"accessToken":"T1","expiresAt":"next tuesday"}"#)
            .into_credential(None);
        assert!(matches!(result, Err(CredentialShapeError::InvalidExpiry(..))));

        let result = fields("{}").into_credential(None);
        assert!(matches!(result, Err(CredentialShapeError::Invalid)));
    }

    #[test]
    fn test_expiry_rules() {
        let now = Utc::now();

        assert!(!Credential::api_key("k").is_expired());
        assert!(!Credential::basic("u", "p").is_expired());

        let live = Credential::oauth2("t", now + Duration::minutes(5));
        assert!(!live.is_expired_at(now));

        // Expired exactly at the boundary
        let boundary = Credential::oauth2("t", now);
        assert!(boundary.is_expired_at(now));
    }

    #[test]
    fn test_scheme_display() {
        assert_eq!(AuthScheme::ApiKey.to_string(), "apiKey");
        assert_eq!(AuthScheme::OAuth2.to_string(), "oauth2");
        assert_eq!(AuthScheme::Basic.to_string(), "basic");
        assert_eq!(AuthScheme::Invalid.to_string(), "invalid");
        assert_eq!(
            serde_json::to_string(&AuthScheme::OAuth2).unwrap(),
            "\"oauth2\""
        );
        assert!(!AuthScheme::Invalid.is_valid());
    }
}
