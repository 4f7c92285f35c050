//! In-memory session credential store
//!
//! Maps session identifiers to resolved credentials for the lifetime of the
//! process. Entries are overwritten on every resolution and, unless an
//! eviction policy is configured, never removed.

use crate::auth::Credential;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Bounds on the session store (both off by default)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Maximum age of an entry since it was last written
    pub ttl: Option<Duration>,
    /// Maximum number of sessions held at once
    pub max_sessions: Option<usize>,
}

impl EvictionPolicy {
    /// No eviction at all
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Whether any bound is configured
    pub fn is_bounded(&self) -> bool {
        self.ttl.is_some() || self.max_sessions.is_some()
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    credential: Arc<Credential>,
    stored_at: DateTime<Utc>,
}

impl SessionEntry {
    fn is_stale(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        match ttl {
            Some(ttl) => now - self.stored_at >= ttl,
            None => false,
        }
    }
}

/// Session id -> credential map shared across requests
#[derive(Debug, Default)]
pub struct SessionStore {
    entries: RwLock<HashMap<String, SessionEntry>>,
    policy: EvictionPolicy,
}

impl SessionStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with an eviction policy
    pub fn with_policy(policy: EvictionPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// The configured eviction policy
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Look up the credential for a session
    ///
    /// Expiry of the credential itself is not checked here.
    pub fn get(&self, session_id: &str) -> Option<Arc<Credential>> {
        let entries = self.entries.read();
        entries
            .get(session_id)
            .filter(|entry| !entry.is_stale(self.policy.ttl, Utc::now()))
            .map(|entry| entry.credential.clone())
    }

    /// Store a credential for a session, replacing any previous one
    pub fn put(&self, session_id: impl Into<String>, credential: Credential) -> Arc<Credential> {
        let session_id = session_id.into();
        let credential = Arc::new(credential);
        let entry = SessionEntry {
            credential: credential.clone(),
            stored_at: Utc::now(),
        };

        let mut entries = self.entries.write();
        if let Some(max) = self.policy.max_sessions {
            while entries.len() >= max && !entries.contains_key(&session_id) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => {
                        entries.remove(&id);
                        debug!(session_id = %id, "Evicted oldest session to stay within bound");
                    }
                    None => break,
                }
            }
        }
        entries.insert(session_id, entry);

        credential
    }

    /// Remove a session
    pub fn remove(&self, session_id: &str) -> Option<Arc<Credential>> {
        self.entries.write().remove(session_id).map(|e| e.credential)
    }

    /// Check if a credential has expired
    pub fn is_expired(credential: &Credential) -> bool {
        credential.is_expired()
    }

    /// Drop entries older than the configured ttl, returning how many were removed
    pub fn sweep(&self) -> usize {
        let Some(ttl) = self.policy.ttl else {
            return 0;
        };

        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_stale(Some(ttl), now));
        before - entries.len()
    }

    /// Number of sessions held
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no sessions
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
