//! Session credential resolution
//!
//! Two entry points:
//! - `resolve_for_request` serves an inbound call: cached credential first,
//!   otherwise whatever the request headers identify
//! - `resolve_access_token` serves callers that need a live OAuth2 token and
//!   refreshes expired credentials from the authority on read

use super::extract::{InboundRequest, RequestIdentity};
use super::inject::{inject_credentials, HeaderStyle, InjectError};
use super::types::{AuthScheme, Credential, CredentialData};
use crate::authority::AuthorityClient;
use crate::storage::SessionStore;
use crate::Secret;
use axum::http::HeaderMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Errors authorizing an upstream request
#[derive(Error, Debug)]
pub enum AuthorizeError {
    #[error("No credential resolved for session: {0}")]
    NoCredential(String),

    #[error("Failed to inject credential: {0}")]
    Inject(#[from] InjectError),
}

type FlightLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Holds a session's single-flight lock; cleans the registry on drop
struct FlightGuard<'a> {
    locks: &'a FlightLocks,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}

/// Resolves and caches credentials per session
pub struct SessionResolver {
    store: Arc<SessionStore>,
    authority: Arc<dyn AuthorityClient>,
    /// Per-session locks, present only when single-flight is enabled
    inflight: Option<FlightLocks>,
}

impl SessionResolver {
    /// Create a resolver over a store and an authority
    pub fn new(store: Arc<SessionStore>, authority: Arc<dyn AuthorityClient>) -> Self {
        Self {
            store,
            authority,
            inflight: None,
        }
    }

    /// Share one authority call between concurrent resolutions of a session
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.inflight = enabled.then(|| Mutex::new(HashMap::new()));
        self
    }

    /// The session store
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    async fn begin_flight(&self, session_id: &str) -> Option<FlightGuard<'_>> {
        let locks = self.inflight.as_ref()?;
        let lock = locks
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;

        Some(FlightGuard {
            locks,
            session_id: session_id.to_string(),
            guard: Some(guard),
        })
    }

    // ==================== Inbound Requests ====================

    /// Resolve the credential for an inbound request
    ///
    /// A cached credential is returned as-is, without an expiry check.
    pub async fn resolve_for_request(&self, request: &InboundRequest) -> Option<Arc<Credential>> {
        let Some(session_id) = request.session_id.as_deref() else {
            debug!("Request has no session id, resolving without cache");
            return self.resolve_identity(request).await.map(Arc::new);
        };

        if let Some(credential) = self.store.get(session_id) {
            return Some(credential);
        }

        let flight = self.begin_flight(session_id).await;
        if flight.is_some() {
            if let Some(credential) = self.store.get(session_id) {
                return Some(credential);
            }
        }

        debug!(session_id, "No credential cached for session, checking request headers");
        let credential = self.resolve_identity(request).await?;

        info!(session_id, scheme = %credential.scheme(), "Resolved credential for session");
        Some(self.store.put(session_id, credential))
    }

    async fn resolve_identity(&self, request: &InboundRequest) -> Option<Credential> {
        match request.identity() {
            Some(RequestIdentity::AuthorityKey(key)) => {
                let credential = self.authority.fetch_credential(&key).await?;
                Some(stamp(credential, &key))
            }
            Some(RequestIdentity::BearerToken(token)) => Some(Credential::api_key(token)),
            None => {
                debug!("Request carries no recognizable credential");
                None
            }
        }
    }

    // ==================== Live Tokens ====================

    /// Get a live OAuth2 access token for a session
    ///
    /// Refreshes an expired credential through the authority first.
    pub async fn resolve_access_token(&self, session_id: &str) -> Option<Secret> {
        let mut credential = self.store.get(session_id)?;

        if SessionStore::is_expired(&credential) {
            credential = self.refresh(session_id, credential).await?;
        }

        credential.access_token().cloned()
    }

    async fn refresh(&self, session_id: &str, stale: Arc<Credential>) -> Option<Arc<Credential>> {
        let Some(authority_key) = stale.authority_key.clone() else {
            warn!(session_id, "Expired credential has no authority key, cannot refresh");
            return Some(stale);
        };

        let flight = self.begin_flight(session_id).await;
        if flight.is_some() {
            if let Some(current) = self.store.get(session_id) {
                if !SessionStore::is_expired(&current) {
                    return Some(current);
                }
            }
        }

        info!(session_id, "Credential expired, refreshing from authority");
        match self.authority.fetch_credential(&authority_key).await {
            Some(fresh) => {
                let fresh = stamp(fresh, &authority_key);
                if fresh.scheme() != stale.scheme() {
                    info!(
                        session_id,
                        from = %stale.scheme(),
                        to = %fresh.scheme(),
                        "Authority changed the credential scheme"
                    );
                }
                Some(self.store.put(session_id, fresh))
            }
            None => {
                warn!(session_id, "Credential refresh failed");
                None
            }
        }
    }

    // ==================== Scheme Accessors ====================

    /// The scheme of the session's credential (`Invalid` when there is none)
    pub fn scheme(&self, session_id: &str) -> AuthScheme {
        self.store
            .get(session_id)
            .map(|c| c.scheme())
            .unwrap_or(AuthScheme::Invalid)
    }

    /// The session's API key, if it holds one
    pub fn api_key(&self, session_id: &str) -> Option<Secret> {
        match &self.store.get(session_id)?.data {
            CredentialData::ApiKey { key } => Some(key.clone()),
            _ => None,
        }
    }

    /// The session's user id and password, if it holds them
    pub fn basic_auth(&self, session_id: &str) -> Option<(String, Secret)> {
        match &self.store.get(session_id)?.data {
            CredentialData::Basic { user_id, password } => {
                Some((user_id.clone(), password.clone()))
            }
            _ => None,
        }
    }

    /// Inject the session's credential into upstream request headers
    ///
    /// OAuth2 credentials are refreshed first if they have expired.
    pub async fn authorize(
        &self,
        session_id: &str,
        headers: &mut HeaderMap,
        style: &HeaderStyle,
    ) -> Result<AuthScheme, AuthorizeError> {
        let no_credential = || AuthorizeError::NoCredential(session_id.to_string());

        let mut credential = self.store.get(session_id).ok_or_else(no_credential)?;
        if SessionStore::is_expired(&credential) {
            credential = self
                .refresh(session_id, credential)
                .await
                .ok_or_else(no_credential)?;
        }

        Ok(inject_credentials(headers, &credential, style)?)
    }
}

/// Make sure a fetched credential remembers the key it came from
fn stamp(credential: Credential, authority_key: &Secret) -> Credential {
    if credential.authority_key.is_some() {
        credential
    } else {
        credential.with_authority_key(authority_key.clone())
    }
}
