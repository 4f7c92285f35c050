//! HTTP credential authority
//!
//! Performs `GET <base>?mcpName=<service>` with the tenant key in the
//! `x-api-key` header and maps the JSON body onto a credential.

use super::{AuthorityClient, AuthorityError};
use crate::auth::{Credential, CredentialFields, API_KEY_HEADER};
use crate::config::AuthorityConfig;
use crate::Secret;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

/// Query parameter naming the service the credential is for
const SERVICE_NAME_PARAM: &str = "mcpName";

/// Authority reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: Client,
    base_url: Url,
    service_name: String,
}

impl HttpAuthority {
    /// Create an authority client from configuration
    pub fn new(config: &AuthorityConfig) -> Result<Self, AuthorityError> {
        let client = Client::builder()
            .user_agent(concat!("keyrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            service_name: config.service_name.clone(),
        })
    }

    /// The lookup URL, including the service name
    pub fn lookup_url(&self) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair(SERVICE_NAME_PARAM, &self.service_name);
        url
    }

    /// Look up a credential, reporting why a lookup failed
    pub async fn try_fetch(&self, authority_key: &Secret) -> Result<Credential, AuthorityError> {
        let response = self
            .client
            .get(self.lookup_url())
            .header(API_KEY_HEADER, authority_key.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthorityError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let fields: CredentialFields = serde_json::from_slice(&body)
            .map_err(|e| AuthorityError::Malformed(e.to_string()))?;

        Ok(fields.into_credential(Some(authority_key.clone()))?)
    }
}

#[async_trait]
impl AuthorityClient for HttpAuthority {
    async fn fetch_credential(&self, authority_key: &Secret) -> Option<Credential> {
        match self.try_fetch(authority_key).await {
            Ok(credential) => {
                tracing::debug!(
                    service = %self.service_name,
                    scheme = %credential.scheme(),
                    "Received credential from authority"
                );
                Some(credential)
            }
            Err(AuthorityError::NoCredential) => {
                tracing::info!(service = %self.service_name, "Authority returned no usable credential");
                None
            }
            Err(e) => {
                tracing::warn!(service = %self.service_name, error = %e, "Authority lookup failed");
                None
            }
        }
    }
}
