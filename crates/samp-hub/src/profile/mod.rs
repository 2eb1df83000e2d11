//! Connection profiles: transport adapters binding the broker's
//! operation set onto concrete wire listeners.
//!
//! Both profiles speak the same JSON-over-HTTP operation envelopes; they
//! differ in reachability and admission policy. The standard profile
//! listens on loopback and admits anyone holding the lock-record secret;
//! the web profile is browser-reachable, guarded by CORS, a pluggable
//! authorizer, and a URL dereference policy.

pub mod standard;
pub mod web;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use samp_core::{ClientId, HubError, Message, Metadata, MsgId, MsgTag, Response, Subscriptions};

use crate::broker::HubService;
use crate::keys::ProfileScope;
use crate::sink::HttpCallbackSink;

use self::web::UrlTracker;

/// A transport adapter with an owned listener lifecycle.
///
/// Variant behaviour (logging, CORS, URL tracking) is composed by
/// wrapping, not by a type hierarchy.
#[async_trait]
pub trait ConnectionProfile: Send + Sync {
    fn profile_name(&self) -> &'static str;

    /// Binds the listener and starts serving the broker. Starting a
    /// running profile is an error; use [`is_running`](Self::is_running).
    async fn start(&mut self, hub: &HubService) -> Result<()>;

    /// Idempotent liveness query.
    fn is_running(&self) -> bool;

    /// Stops the listener. Stopping an already-stopped profile is a
    /// no-op.
    async fn stop(&mut self);

    /// The bound address while running.
    fn bound_addr(&self) -> Option<SocketAddr>;
}

/// Handle to one spawned axum server, shut down through a oneshot.
pub(crate) struct ServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<Result<()>>,
    addr: SocketAddr,
}

impl ServerHandle {
    pub(crate) async fn spawn(listener: TcpListener, app: AxumRouter) -> Result<Self> {
        let addr = listener
            .local_addr()
            .context("reading bound listener address")?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(
            async {
                let _ = shutdown_rx.await;
            },
        );
        let join = tokio::spawn(async move {
            server
                .await
                .map_err(|err| anyhow::anyhow!("profile listener failed: {err}"))
        });
        Ok(Self {
            shutdown: Some(shutdown_tx),
            join,
            addr,
        })
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.join.await {
            tracing::warn!(error = %err, "awaiting profile shutdown failed");
        }
    }
}

/// Shared state handed to every operation handler.
#[derive(Clone)]
pub(crate) struct ProfileContext {
    pub hub: HubService,
    pub scope: ProfileScope,
    pub callback_timeout: Duration,
    /// Present on the web profile only: the URL dereference policy.
    pub url_tracker: Option<Arc<UrlTracker>>,
}

impl ProfileContext {
    /// Secrets are scoped to the transport that issued them; a key from
    /// the other profile is rejected here before it ever reaches the
    /// broker.
    fn check_key(&self, private_key: &str) -> Result<(), HubError> {
        if private_key.starts_with(self.scope.prefix()) {
            Ok(())
        } else {
            Err(HubError::AuthenticationFailure)
        }
    }
}

/// Maps a broker rejection onto a wire status with a stable error code
/// in the body.
pub(crate) fn error_response(err: &HubError) -> AxumResponse {
    let status = match err {
        HubError::AuthenticationFailure => StatusCode::FORBIDDEN,
        HubError::UnknownClient(_) | HubError::UnknownPendingCall(_) => StatusCode::NOT_FOUND,
        HubError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        HubError::Transport(_) => StatusCode::BAD_GATEWAY,
        HubError::HubAlreadyRunning(_) => StatusCode::CONFLICT,
        HubError::NotCallable(_)
        | HubError::NotSubscribed { .. }
        | HubError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(serde_json::json!({ "code": err.code(), "error": err.to_string() })),
    )
        .into_response()
}

fn respond<T: Serialize>(result: Result<T, HubError>) -> AxumResponse {
    match result {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => {
            tracing::debug!(code = err.code(), error = %err, "operation rejected");
            error_response(&err)
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthedRequest {
    pub private_key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeclareMetadataRequest {
    pub private_key: String,
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClientQuery {
    pub private_key: String,
    pub client_id: ClientId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeclareSubscriptionsRequest {
    pub private_key: String,
    pub subscriptions: Subscriptions,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MTypeQuery {
    pub private_key: String,
    pub mtype: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetCallableRequest {
    pub private_key: String,
    /// Callback endpoint; `null` withdraws callability.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotifyRequest {
    pub private_key: String,
    pub recipient_id: ClientId,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotifyAllRequest {
    pub private_key: String,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallRequest {
    pub private_key: String,
    pub recipient_id: ClientId,
    #[serde(default)]
    pub msg_tag: MsgTag,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallAllRequest {
    pub private_key: String,
    #[serde(default)]
    pub msg_tag: MsgTag,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallAndWaitRequest {
    pub private_key: String,
    pub recipient_id: ClientId,
    pub message: Message,
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReplyRequest {
    pub private_key: String,
    pub msg_id: MsgId,
    pub response: Response,
}

/// Routes shared by every profile: the full operation set minus
/// `register`, whose admission policy is profile-specific.
pub(crate) fn operation_routes(ctx: ProfileContext) -> AxumRouter {
    AxumRouter::new()
        .route("/ping", get(handle_ping))
        .route("/unregister", post(handle_unregister))
        .route("/declare_metadata", post(handle_declare_metadata))
        .route("/get_metadata", post(handle_get_metadata))
        .route("/declare_subscriptions", post(handle_declare_subscriptions))
        .route("/get_subscriptions", post(handle_get_subscriptions))
        .route("/get_registered_clients", post(handle_get_registered_clients))
        .route("/get_subscribed_clients", post(handle_get_subscribed_clients))
        .route("/set_callable", post(handle_set_callable))
        .route("/notify", post(handle_notify))
        .route("/notify_all", post(handle_notify_all))
        .route("/call", post(handle_call))
        .route("/call_all", post(handle_call_all))
        .route("/call_and_wait", post(handle_call_and_wait))
        .route("/reply", post(handle_reply))
        .with_state(ctx)
}

async fn handle_ping(State(ctx): State<ProfileContext>) -> AxumResponse {
    respond(ctx.hub.ping().await)
}

async fn handle_unregister(
    State(ctx): State<ProfileContext>,
    Json(request): Json<AuthedRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(ctx.hub.unregister(&request.private_key).await)
}

async fn handle_declare_metadata(
    State(ctx): State<ProfileContext>,
    Json(request): Json<DeclareMetadataRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    if let Some(tracker) = &ctx.url_tracker {
        // URLs first mentioned by a web client are never dereferenced
        // on its behalf.
        for url in request.metadata.urls() {
            tracker.note_client_url(url);
        }
    }
    respond(
        ctx.hub
            .declare_metadata(&request.private_key, request.metadata)
            .await,
    )
}

async fn handle_get_metadata(
    State(ctx): State<ProfileContext>,
    Json(request): Json<ClientQuery>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    let result = ctx
        .hub
        .get_metadata(&request.private_key, &request.client_id)
        .await;
    if let (Some(tracker), Ok(metadata)) = (&ctx.url_tracker, &result) {
        // The hub is mentioning these URLs to a web client; that makes
        // them fair game for later translation requests.
        for url in metadata.urls() {
            tracker.note_hub_url(url);
        }
    }
    respond(result)
}

async fn handle_declare_subscriptions(
    State(ctx): State<ProfileContext>,
    Json(request): Json<DeclareSubscriptionsRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(
        ctx.hub
            .declare_subscriptions(&request.private_key, request.subscriptions)
            .await,
    )
}

async fn handle_get_subscriptions(
    State(ctx): State<ProfileContext>,
    Json(request): Json<ClientQuery>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(
        ctx.hub
            .get_subscriptions(&request.private_key, &request.client_id)
            .await,
    )
}

async fn handle_get_registered_clients(
    State(ctx): State<ProfileContext>,
    Json(request): Json<AuthedRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(ctx.hub.get_registered_clients(&request.private_key).await)
}

async fn handle_get_subscribed_clients(
    State(ctx): State<ProfileContext>,
    Json(request): Json<MTypeQuery>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(
        ctx.hub
            .get_subscribed_clients(&request.private_key, &request.mtype)
            .await,
    )
}

async fn handle_set_callable(
    State(ctx): State<ProfileContext>,
    Json(request): Json<SetCallableRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    let sink = match &request.url {
        Some(raw) => {
            let parsed = match Url::parse(raw) {
                Ok(url) => url,
                Err(err) => {
                    return error_response(&HubError::InvalidArgument(format!(
                        "malformed callback url {raw:?}: {err}"
                    )))
                }
            };
            match HttpCallbackSink::new(
                parsed,
                request.private_key.clone(),
                ctx.callback_timeout,
            ) {
                Ok(sink) => Some(Arc::new(sink) as crate::sink::SharedSink),
                Err(err) => return error_response(&err),
            }
        }
        None => None,
    };
    respond(ctx.hub.set_callable(&request.private_key, sink).await)
}

async fn handle_notify(
    State(ctx): State<ProfileContext>,
    Json(request): Json<NotifyRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(
        ctx.hub
            .notify(&request.private_key, &request.recipient_id, request.message)
            .await,
    )
}

async fn handle_notify_all(
    State(ctx): State<ProfileContext>,
    Json(request): Json<NotifyAllRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(ctx.hub.notify_all(&request.private_key, request.message).await)
}

async fn handle_call(
    State(ctx): State<ProfileContext>,
    Json(request): Json<CallRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(
        ctx.hub
            .call(
                &request.private_key,
                &request.recipient_id,
                request.msg_tag,
                request.message,
            )
            .await,
    )
}

async fn handle_call_all(
    State(ctx): State<ProfileContext>,
    Json(request): Json<CallAllRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(
        ctx.hub
            .call_all(&request.private_key, request.msg_tag, request.message)
            .await,
    )
}

async fn handle_call_and_wait(
    State(ctx): State<ProfileContext>,
    Json(request): Json<CallAndWaitRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(
        ctx.hub
            .call_and_wait(
                &request.private_key,
                &request.recipient_id,
                request.message,
                request.timeout_ms,
            )
            .await,
    )
}

async fn handle_reply(
    State(ctx): State<ProfileContext>,
    Json(request): Json<ReplyRequest>,
) -> AxumResponse {
    if let Err(err) = ctx.check_key(&request.private_key) {
        return error_response(&err);
    }
    respond(
        ctx.hub
            .reply(&request.private_key, &request.msg_id, request.response)
            .await,
    )
}
