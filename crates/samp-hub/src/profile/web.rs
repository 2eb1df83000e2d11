//! The web profile: a browser-reachable listener with cross-origin
//! controls, pluggable registration authorization, and a URL
//! dereference policy.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use url::Url;

use samp_core::HubError;

use crate::broker::HubService;
use crate::keys::ProfileScope;

use super::{error_response, operation_routes, ConnectionProfile, ProfileContext, ServerHandle};

/// Well-known port browsers expect a web-profile hub on.
pub const WEB_PROFILE_PORT: u16 = 21012;

/// Admission decision for a registration arriving from a non-trusted
/// origin. Implementations may consult an allow-list, a policy file, or
/// a human; only the decision function is part of the hub.
#[async_trait]
pub trait ClientAuthorizer: Send + Sync {
    async fn authorize(&self, origin: Option<&str>, app_name: &str) -> bool;
}

/// Admits everyone. Only sensible behind an origin allow-list or in
/// tests.
pub struct AcceptAllAuthorizer;

#[async_trait]
impl ClientAuthorizer for AcceptAllAuthorizer {
    async fn authorize(&self, _origin: Option<&str>, _app_name: &str) -> bool {
        true
    }
}

/// Admits registrations whose `Origin` header is on a fixed list.
pub struct OriginListAuthorizer {
    allowed: Vec<String>,
}

impl OriginListAuthorizer {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl ClientAuthorizer for OriginListAuthorizer {
    async fn authorize(&self, origin: Option<&str>, _app_name: &str) -> bool {
        match origin {
            Some(origin) => self.allowed.iter().any(|allowed| allowed == origin),
            None => false,
        }
    }
}

/// Decorates another authorizer with an audit log line per decision.
pub struct LoggingAuthorizer<A> {
    inner: A,
}

impl<A> LoggingAuthorizer<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<A: ClientAuthorizer> ClientAuthorizer for LoggingAuthorizer<A> {
    async fn authorize(&self, origin: Option<&str>, app_name: &str) -> bool {
        let decision = self.inner.authorize(origin, app_name).await;
        tracing::info!(
            origin = origin.unwrap_or("<none>"),
            app_name,
            decision,
            "web registration authorization"
        );
        decision
    }
}

/// Tracks which URLs the hub will dereference on a web client's behalf.
///
/// A URL becomes eligible once the hub itself has mentioned it to a web
/// client (serving another client's metadata); a URL first volunteered
/// by a web client is blocked for good, which keeps the hub from acting
/// as an open relay into the local network.
#[derive(Default)]
pub struct UrlTracker {
    permitted: Mutex<HashSet<String>>,
    blocked: Mutex<HashSet<String>>,
}

impl UrlTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_hub_url(&self, raw: &str) {
        let Some(normalised) = normalise(raw) else {
            return;
        };
        if self.blocked.lock().expect("tracker lock").contains(&normalised) {
            return;
        }
        self.permitted.lock().expect("tracker lock").insert(normalised);
    }

    pub fn note_client_url(&self, raw: &str) {
        let Some(normalised) = normalise(raw) else {
            return;
        };
        self.permitted.lock().expect("tracker lock").remove(&normalised);
        self.blocked.lock().expect("tracker lock").insert(normalised);
    }

    pub fn is_permitted(&self, raw: &str) -> bool {
        let Some(normalised) = normalise(raw) else {
            return false;
        };
        !self.blocked.lock().expect("tracker lock").contains(&normalised)
            && self.permitted.lock().expect("tracker lock").contains(&normalised)
    }
}

fn normalise(raw: &str) -> Option<String> {
    Url::parse(raw).ok().map(|url| url.to_string())
}

/// Configuration knobs of the web listener.
#[derive(Debug, Clone)]
pub struct WebProfileConfig {
    pub port: u16,
    /// CORS origin allow-list; empty admits any origin.
    pub origins: Vec<String>,
    /// Serve a legacy `crossdomain.xml` for old browser plugins.
    pub allow_flash: bool,
    /// Enforce the [`UrlTracker`] policy and expose `/translate`.
    pub control_urls: bool,
}

impl Default for WebProfileConfig {
    fn default() -> Self {
        Self {
            port: WEB_PROFILE_PORT,
            origins: Vec::new(),
            allow_flash: false,
            control_urls: true,
        }
    }
}

#[derive(Clone)]
struct WebContext {
    ctx: ProfileContext,
    authorizer: Arc<dyn ClientAuthorizer>,
    tracker: Option<Arc<UrlTracker>>,
    fetcher: reqwest::Client,
}

/// Browser-reachable transport guarded by CORS and an authorizer.
pub struct WebProfile {
    config: WebProfileConfig,
    authorizer: Arc<dyn ClientAuthorizer>,
    callback_timeout: Duration,
    handle: Option<ServerHandle>,
}

impl WebProfile {
    pub fn new(
        config: WebProfileConfig,
        authorizer: Arc<dyn ClientAuthorizer>,
        callback_timeout: Duration,
    ) -> Self {
        Self {
            config,
            authorizer,
            callback_timeout,
            handle: None,
        }
    }

    fn cors_layer(&self) -> CorsLayer {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([CONTENT_TYPE]);
        if self.config.origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<HeaderValue> = self
                .config
                .origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
    }
}

#[async_trait]
impl ConnectionProfile for WebProfile {
    fn profile_name(&self) -> &'static str {
        "web"
    }

    async fn start(&mut self, hub: &HubService) -> Result<()> {
        if self.handle.is_some() {
            bail!("web profile already running");
        }
        let tracker = self
            .config
            .control_urls
            .then(|| Arc::new(UrlTracker::new()));
        let ctx = ProfileContext {
            hub: hub.clone(),
            scope: ProfileScope::Web,
            callback_timeout: self.callback_timeout,
            url_tracker: tracker.clone(),
        };
        let fetcher = reqwest::Client::builder()
            .timeout(self.callback_timeout)
            .no_proxy()
            .build()
            .context("building web profile fetch client")?;
        let web_ctx = WebContext {
            ctx: ctx.clone(),
            authorizer: self.authorizer.clone(),
            tracker,
            fetcher,
        };

        let mut app = operation_routes(ctx)
            .route("/register", post(handle_register).with_state(web_ctx.clone()));
        if self.config.control_urls {
            app = app.route(
                "/translate",
                get(handle_translate).with_state(web_ctx.clone()),
            );
        }
        if self.config.allow_flash {
            tracing::info!("web profile permits legacy cross-domain policy access");
            app = app.route("/crossdomain.xml", get(handle_crossdomain));
        }
        let app = app.layer(self.cors_layer());

        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], self.config.port)))
            .await
            .with_context(|| format!("binding web profile on port {}", self.config.port))?;
        let handle = ServerHandle::spawn(listener, app).await?;
        tracing::info!(addr = %handle.addr(), "web profile listening");
        self.handle = Some(handle);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
            tracing::info!("web profile stopped");
        }
    }

    fn bound_addr(&self) -> Option<SocketAddr> {
        self.handle.as_ref().map(ServerHandle::addr)
    }
}

#[derive(Debug, Deserialize)]
struct WebRegisterRequest {
    /// Name the application claims for itself, shown to the authorizer.
    app_name: String,
}

async fn handle_register(
    State(web): State<WebContext>,
    headers: HeaderMap,
    Json(request): Json<WebRegisterRequest>,
) -> AxumResponse {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !web.authorizer.authorize(origin, &request.app_name).await {
        return error_response(&HubError::AuthenticationFailure);
    }
    match web.ctx.hub.register(web.ctx.scope, None).await {
        Ok(registration) => Json(registration).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct TranslateQuery {
    url: String,
}

/// Fetches a tracked URL on the client's behalf; anything the hub never
/// mentioned to web clients is refused.
async fn handle_translate(
    State(web): State<WebContext>,
    Query(query): Query<TranslateQuery>,
) -> AxumResponse {
    let permitted = web
        .tracker
        .as_ref()
        .map(|tracker| tracker.is_permitted(&query.url))
        .unwrap_or(false);
    if !permitted {
        tracing::warn!(url = %query.url, "refusing translation of untracked url");
        return (StatusCode::FORBIDDEN, "url not available for translation").into_response();
    }
    let upstream = match web.fetcher.get(&query.url).send().await {
        Ok(response) => response,
        Err(err) => {
            return (StatusCode::BAD_GATEWAY, format!("fetch failed: {err}")).into_response()
        }
    };
    if !upstream.status().is_success() {
        return (
            StatusCode::BAD_GATEWAY,
            format!("upstream returned {}", upstream.status()),
        )
            .into_response();
    }
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_owned();
    match upstream.bytes().await {
        Ok(body) => ([(CONTENT_TYPE, content_type)], body).into_response(),
        Err(err) => (StatusCode::BAD_GATEWAY, format!("fetch failed: {err}")).into_response(),
    }
}

const CROSSDOMAIN_XML: &str = r#"<?xml version="1.0"?>
<!DOCTYPE cross-domain-policy SYSTEM "http://www.adobe.com/xml/dtds/cross-domain-policy.dtd">
<cross-domain-policy>
  <allow-access-from domain="*"/>
</cross-domain-policy>
"#;

async fn handle_crossdomain() -> AxumResponse {
    (
        [(CONTENT_TYPE, "application/xml")],
        CROSSDOMAIN_XML,
    )
        .into_response()
}
