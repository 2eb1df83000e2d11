#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use samp_core::{ClientId, Message, MsgId, MsgTag, Response};
use samp_hub::broker::Registration;
use samp_hub::config::{HubRuntimeConfig, WebSettings};
use samp_hub::runtime::HubRuntime;

/// A hub bound to OS-assigned ports with its lock record in a private
/// temp directory.
pub struct TestHub {
    pub runtime: HubRuntime,
    dir: TempDir,
}

impl TestHub {
    pub fn std_url(&self) -> String {
        let addr = self.runtime.standard_addr().expect("standard profile bound");
        format!("http://{addr}/")
    }

    pub fn web_url(&self) -> String {
        let addr = self.runtime.web_addr().expect("web profile bound");
        format!("http://{addr}/")
    }

    pub fn secret(&self) -> &str {
        &self.runtime.lock_info().secret
    }

    pub fn lockfile(&self) -> PathBuf {
        self.runtime.lockfile_path().clone()
    }

    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn base_config(lockfile: PathBuf) -> HubRuntimeConfig {
    HubRuntimeConfig {
        port: 0,
        lockfile: Some(lockfile),
        web: WebSettings {
            enabled: false,
            port: 0,
            origins: Vec::new(),
            allow_flash: false,
            control_urls: true,
        },
        probe_timeout: Duration::from_millis(500),
        callback_timeout: Duration::from_secs(5),
        config_path: None,
    }
}

pub async fn start_hub() -> Result<TestHub> {
    let dir = TempDir::new().context("creating hub temp directory")?;
    let config = base_config(dir.path().join("samp.lock"));
    let runtime = HubRuntime::start(config).await?;
    Ok(TestHub { runtime, dir })
}

pub async fn start_hub_with_web(web: WebSettings) -> Result<TestHub> {
    let dir = TempDir::new().context("creating hub temp directory")?;
    let mut config = base_config(dir.path().join("samp.lock"));
    config.web = web;
    let runtime = HubRuntime::start(config).await?;
    Ok(TestHub { runtime, dir })
}

pub fn web_settings() -> WebSettings {
    WebSettings {
        enabled: true,
        port: 0,
        origins: Vec::new(),
        allow_flash: false,
        control_urls: true,
    }
}

/// Thin JSON client for one profile endpoint.
pub struct WireClient {
    pub http: reqwest::Client,
    pub base: String,
}

impl WireClient {
    pub fn new(base: String) -> Self {
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("building test http client");
        Self { http, base }
    }

    pub async fn post_raw(&self, op: &str, body: JsonValue) -> Result<reqwest::Response> {
        self.http
            .post(format!("{}{op}", self.base))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("posting {op}"))
    }

    pub async fn post_ok<T: DeserializeOwned>(&self, op: &str, body: JsonValue) -> Result<T> {
        self.post_raw(op, body)
            .await?
            .error_for_status()
            .with_context(|| format!("{op} rejected"))?
            .json()
            .await
            .with_context(|| format!("decoding {op} response"))
    }

    pub async fn register(&self, secret: &str) -> Result<Registration> {
        self.post_ok("register", serde_json::json!({ "secret": secret }))
            .await
    }

    pub async fn ping(&self) -> Result<reqwest::Response> {
        self.http
            .get(format!("{}ping", self.base))
            .send()
            .await
            .context("pinging hub")
    }
}

/// Stable error code carried in a rejection body.
pub async fn error_code(response: reqwest::Response) -> Result<String> {
    let body: JsonValue = response.json().await.context("decoding error body")?;
    body.get("code")
        .and_then(JsonValue::as_str)
        .map(str::to_owned)
        .context("error body missing code")
}

/// One callback pushed by the hub into a client's endpoint.
#[derive(Debug)]
pub enum CallbackEvent {
    Notification {
        sender_id: ClientId,
        message: Message,
    },
    Call {
        sender_id: ClientId,
        msg_id: MsgId,
        message: Message,
    },
    Response {
        responder_id: ClientId,
        msg_tag: MsgTag,
        response: Response,
    },
}

#[derive(Deserialize)]
struct NotificationEnvelope {
    sender_id: ClientId,
    message: Message,
}

#[derive(Deserialize)]
struct CallEnvelope {
    sender_id: ClientId,
    msg_id: MsgId,
    message: Message,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    responder_id: ClientId,
    msg_tag: MsgTag,
    response: Response,
}

/// A client-side callback endpoint recording everything the hub pushes.
pub struct Recorder {
    pub url: String,
    pub events: mpsc::UnboundedReceiver<CallbackEvent>,
    handle: JoinHandle<()>,
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_recorder() -> Result<Recorder> {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/receive_notification", post(record_notification))
        .route("/receive_call", post(record_call))
        .route("/receive_response", post(record_response))
        .with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("binding recorder")?;
    let addr = listener.local_addr().context("recorder address")?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    Ok(Recorder {
        url: format!("http://{addr}/"),
        events: rx,
        handle,
    })
}

async fn record_notification(
    State(tx): State<mpsc::UnboundedSender<CallbackEvent>>,
    Json(envelope): Json<NotificationEnvelope>,
) -> impl IntoResponse {
    let _ = tx.send(CallbackEvent::Notification {
        sender_id: envelope.sender_id,
        message: envelope.message,
    });
    Json(serde_json::json!({}))
}

async fn record_call(
    State(tx): State<mpsc::UnboundedSender<CallbackEvent>>,
    Json(envelope): Json<CallEnvelope>,
) -> impl IntoResponse {
    let _ = tx.send(CallbackEvent::Call {
        sender_id: envelope.sender_id,
        msg_id: envelope.msg_id,
        message: envelope.message,
    });
    Json(serde_json::json!({}))
}

async fn record_response(
    State(tx): State<mpsc::UnboundedSender<CallbackEvent>>,
    Json(envelope): Json<ResponseEnvelope>,
) -> impl IntoResponse {
    let _ = tx.send(CallbackEvent::Response {
        responder_id: envelope.responder_id,
        msg_tag: envelope.msg_tag,
        response: envelope.response,
    });
    Json(serde_json::json!({}))
}

/// Waits up to two seconds for the next recorded callback.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<CallbackEvent>) -> Option<CallbackEvent> {
    timeout(Duration::from_secs(2), events.recv()).await.ok()?
}

/// Asserts no callback arrives within the grace window.
pub async fn assert_no_event(events: &mut mpsc::UnboundedReceiver<CallbackEvent>) {
    let outcome = timeout(Duration::from_millis(400), events.recv()).await;
    assert!(outcome.is_err(), "unexpected callback: {:?}", outcome);
}

/// Registers a callable client subscribed to `patterns`, with its own
/// recorder endpoint.
pub async fn callable_client(
    client: &WireClient,
    hub_secret: &str,
    patterns: &[&str],
) -> Result<(Registration, Recorder)> {
    let registration = client.register(hub_secret).await?;
    let recorder = spawn_recorder().await?;
    client
        .post_ok::<JsonValue>(
            "set_callable",
            serde_json::json!({
                "private_key": registration.private_key,
                "url": recorder.url.clone(),
            }),
        )
        .await?;
    let mut subscriptions = serde_json::Map::new();
    for pattern in patterns {
        subscriptions.insert((*pattern).to_owned(), serde_json::json!({}));
    }
    client
        .post_ok::<JsonValue>(
            "declare_subscriptions",
            serde_json::json!({
                "private_key": registration.private_key,
                "subscriptions": subscriptions,
            }),
        )
        .await?;
    Ok((registration, recorder))
}

/// Serves one static resource over HTTP; used to exercise the web
/// profile's URL translation.
pub struct StaticServer {
    pub url: String,
    handle: JoinHandle<()>,
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_static(content_type: &'static str, body: &'static str) -> Result<StaticServer> {
    let app = Router::new().route(
        "/resource",
        get(move || async move { ([(CONTENT_TYPE, content_type)], body) }),
    );
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("binding static server")?;
    let addr = listener.local_addr().context("static server address")?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    Ok(StaticServer {
        url: format!("http://{addr}/resource"),
        handle,
    })
}
