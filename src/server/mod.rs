//! Keyrelay HTTP server
//!
//! Runs the session resolver as axum middleware: every inbound request is
//! resolved before it reaches a handler, and the outcome is attached as a
//! `ResolvedCredential` request extension.

use crate::auth::{
    AuthScheme, AuthorizeError, Credential, HeaderStyle, InboundRequest, SessionResolver,
};
use crate::authority::{AuthorityError, HttpAuthority};
use crate::config::Config;
use crate::storage::SessionStore;
use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to create authority client: {0}")]
    Authority(#[from] AuthorityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<SessionResolver>,
    /// How credentials are presented upstream
    pub header_style: Arc<HeaderStyle>,
}

/// Credential resolved for the current request, if any
#[derive(Debug, Clone)]
pub struct ResolvedCredential(pub Option<Arc<Credential>>);

impl ResolvedCredential {
    /// Scheme of the resolved credential, `Invalid` when none
    pub fn scheme(&self) -> AuthScheme {
        self.0
            .as_ref()
            .map(|c| c.scheme())
            .unwrap_or(AuthScheme::Invalid)
    }
}

/// Main Keyrelay server
pub struct KeyrelayServer {
    config: Config,
    state: AppState,
}

impl KeyrelayServer {
    /// Create a server talking to the configured HTTP authority
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let authority = Arc::new(HttpAuthority::new(&config.authority)?);
        let store = Arc::new(SessionStore::with_policy(config.sessions.eviction));
        let resolver = SessionResolver::new(store, authority)
            .with_single_flight(config.sessions.single_flight);

        Ok(Self::with_resolver(config, Arc::new(resolver)))
    }

    /// Create a server around an existing resolver
    pub fn with_resolver(config: Config, resolver: Arc<SessionResolver>) -> Self {
        let header_style = Arc::new(config.upstream.header_style.clone());
        Self {
            config,
            state: AppState {
                resolver,
                header_style,
            },
        }
    }

    /// Get a reference to the resolver
    pub fn resolver(&self) -> &Arc<SessionResolver> {
        &self.state.resolver
    }

    /// Get the server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/session", get(session_info))
            .route("/authorize", get(authorize_session))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                resolve_session,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server until it fails
    pub async fn run(self) -> Result<(), ServerError> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.config.server.bind).await?;

        let sweeper = spawn_sweeper(
            self.state.resolver.store().clone(),
            self.config.sessions.sweep_interval,
        );

        info!(
            bind = %self.config.server.bind,
            authority = %self.config.authority.base_url,
            service = %self.config.authority.service_name,
            "Starting Keyrelay"
        );

        let result = axum::serve(listener, router).await;

        if let Some(handle) = sweeper {
            handle.abort();
        }

        Ok(result?)
    }
}

/// Periodically sweep stale sessions; only runs when a ttl is configured
pub fn spawn_sweeper(store: Arc<SessionStore>, every: Duration) -> Option<JoinHandle<()>> {
    if store.policy().ttl.is_none() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = store.sweep();
            if removed > 0 {
                debug!(removed, remaining = store.len(), "Swept stale sessions");
            }
        }
    }))
}

/// Middleware resolving the session credential for every request
pub async fn resolve_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let inbound = InboundRequest::from_parts(request.uri(), request.headers());
    let credential = state.resolver.resolve_for_request(&inbound).await;

    request
        .extensions_mut()
        .insert(ResolvedCredential(credential));

    next.run(request).await
}

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
    code: String,
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            code: code.to_string(),
            error: message.into(),
        }),
    )
        .into_response()
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.resolver.store().len(),
    })
}

#[derive(Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Session introspection, without secret material
#[derive(Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub scheme: AuthScheme,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

async fn session_info(
    Query(query): Query<SessionQuery>,
    Extension(resolved): Extension<ResolvedCredential>,
) -> Response {
    let Some(session_id) = query.session_id else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_session_id",
            "sessionId query parameter required",
        );
    };

    let info = SessionInfo {
        session_id,
        scheme: resolved.scheme(),
        authenticated: resolved.0.is_some(),
        expires_at: resolved.0.as_ref().and_then(|c| c.expires_at()),
    };

    Json(info).into_response()
}

/// Upstream headers a session would be authorized with, names only
#[derive(Serialize, Deserialize)]
pub struct AuthorizeInfo {
    pub session_id: String,
    pub scheme: AuthScheme,
    pub headers: Vec<String>,
}

async fn authorize_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(session_id) = query.session_id else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_session_id",
            "sessionId query parameter required",
        );
    };

    let mut headers = HeaderMap::new();
    match state
        .resolver
        .authorize(&session_id, &mut headers, &state.header_style)
        .await
    {
        Ok(scheme) => Json(AuthorizeInfo {
            session_id,
            scheme,
            headers: headers.keys().map(|name| name.as_str().to_string()).collect(),
        })
        .into_response(),
        Err(e @ AuthorizeError::NoCredential(_)) => {
            error_response(StatusCode::UNAUTHORIZED, "no_credential", e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "inject_failed", e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::AuthorityClient;
    use crate::Secret;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Authority that hands out one OAuth2 token per lookup
    struct StaticAuthority;

    #[async_trait]
    impl AuthorityClient for StaticAuthority {
        async fn fetch_credential(&self, authority_key: &Secret) -> Option<Credential> {
            if authority_key.expose() == "genius_known" {
                let expires = Utc::now() + chrono::Duration::hours(1);
                Some(Credential::oauth2("T1", expires).with_authority_key(authority_key.clone()))
            } else {
                None
            }
        }
    }

    fn server() -> KeyrelayServer {
        let resolver = SessionResolver::new(Arc::new(SessionStore::new()), Arc::new(StaticAuthority));
        KeyrelayServer::with_resolver(Config::default(), Arc::new(resolver))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        router: Router,
        request: axum::http::Request<Body>,
    ) -> (StatusCode, T) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_session_resolved_by_middleware() {
        let server = server();

        let request = axum::http::Request::builder()
            .uri("/session?sessionId=s1")
            .header("x-api-key", "genius_known")
            .body(Body::empty())
            .unwrap();
        let (status, info): (_, SessionInfo) = get_json(server.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(info.session_id, "s1");
        assert_eq!(info.scheme, AuthScheme::OAuth2);
        assert!(info.authenticated);
        assert!(info.expires_at.is_some());

        // Same session, no headers: served from the store
        let request = axum::http::Request::builder()
            .uri("/session?sessionId=s1")
            .body(Body::empty())
            .unwrap();
        let (_, info): (_, SessionInfo) = get_json(server.router(), request).await;
        assert_eq!(info.scheme, AuthScheme::OAuth2);

        let token = server.resolver().resolve_access_token("s1").await.unwrap();
        assert_eq!(token.expose(), "T1");
    }

    #[tokio::test]
    async fn test_unknown_session_is_unauthenticated() {
        let server = server();

        let request = axum::http::Request::builder()
            .uri("/session?sessionId=nobody")
            .header("x-api-key", "genius_unknown")
            .body(Body::empty())
            .unwrap();
        let (status, info): (_, SessionInfo) = get_json(server.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(info.scheme, AuthScheme::Invalid);
        assert!(!info.authenticated);
        assert!(server.resolver().store().is_empty());
    }

    #[tokio::test]
    async fn test_session_requires_id() {
        let server = server();
        let request = axum::http::Request::builder()
            .uri("/session")
            .body(Body::empty())
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_authorize_uses_configured_header_style() {
        let config = Config::parse(
            "[upstream]\napi_key_header = \"Ocp-Apim-Subscription-Key\"\napi_key_prefix = \"\"",
        )
        .unwrap();
        let resolver = SessionResolver::new(Arc::new(SessionStore::new()), Arc::new(StaticAuthority));
        let server = KeyrelayServer::with_resolver(config, Arc::new(resolver));
        assert_eq!(
            server.state.header_style.api_key_header.as_str(),
            "ocp-apim-subscription-key"
        );

        let request = axum::http::Request::builder()
            .uri("/authorize?sessionId=s1")
            .header("authorization", "Bearer abc123")
            .body(Body::empty())
            .unwrap();
        let (status, info): (_, AuthorizeInfo) = get_json(server.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(info.scheme, AuthScheme::ApiKey);
        assert_eq!(info.headers, vec!["ocp-apim-subscription-key".to_string()]);

        let mut headers = HeaderMap::new();
        server
            .resolver()
            .authorize("s1", &mut headers, &server.state.header_style)
            .await
            .unwrap();
        assert_eq!(headers.get("ocp-apim-subscription-key").unwrap(), "abc123");
    }

    #[tokio::test]
    async fn test_authorize_oauth2_default_style() {
        let server = server();
        let request = axum::http::Request::builder()
            .uri("/authorize?sessionId=s2")
            .header("x-api-key", "genius_known")
            .body(Body::empty())
            .unwrap();
        let (status, info): (_, AuthorizeInfo) = get_json(server.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(info.scheme, AuthScheme::OAuth2);
        assert_eq!(info.headers, vec!["authorization".to_string()]);
    }

    #[tokio::test]
    async fn test_authorize_unknown_session_is_unauthorized() {
        let server = server();
        let request = axum::http::Request::builder()
            .uri("/authorize?sessionId=nobody")
            .body(Body::empty())
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_reports_session_count() {
        let server = server();

        let request = axum::http::Request::builder()
            .uri("/health?sessionId=s9")
            .header("authorization", "Bearer abc123")
            .body(Body::empty())
            .unwrap();
        let (status, health): (_, HealthResponse) = get_json(server.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "ok");
        assert_eq!(health.sessions, 1);
    }

    #[tokio::test]
    async fn test_sweeper_only_runs_with_ttl() {
        let unbounded = Arc::new(SessionStore::new());
        assert!(spawn_sweeper(unbounded, Duration::from_millis(10)).is_none());

        let bounded = Arc::new(SessionStore::with_policy(crate::EvictionPolicy {
            ttl: Some(chrono::Duration::zero()),
            max_sessions: None,
        }));
        bounded.put("s1", Credential::api_key("K1"));

        let handle = spawn_sweeper(bounded.clone(), Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(bounded.is_empty());
    }
}
