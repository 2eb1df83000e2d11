use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use samp_core::{ClientId, HubError, Message, MsgId, MsgTag, Response};

/// Delivery path for pushing traffic from the hub to one client.
///
/// One implementation exists per transport; the hub core never knows how
/// a recipient is reached. All methods are fire-and-forget from the
/// router's point of view: an error means the transport could not hand
/// the payload over, and the caller decides whether that matters.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    /// One-way notification; the client sends nothing back.
    async fn notify(&self, sender: &ClientId, message: &Message) -> Result<(), HubError>;

    /// Call expecting the client to eventually invoke `reply` with
    /// `msg_id`.
    async fn call(
        &self,
        sender: &ClientId,
        msg_id: &MsgId,
        message: &Message,
    ) -> Result<(), HubError>;

    /// Response delivery for an earlier asynchronous call made by this
    /// client.
    async fn reply(
        &self,
        responder: &ClientId,
        tag: &MsgTag,
        response: &Response,
    ) -> Result<(), HubError>;
}

#[derive(Serialize)]
struct NotificationEnvelope<'a> {
    private_key: &'a str,
    sender_id: &'a ClientId,
    message: &'a Message,
}

#[derive(Serialize)]
struct CallEnvelope<'a> {
    private_key: &'a str,
    sender_id: &'a ClientId,
    msg_id: &'a MsgId,
    message: &'a Message,
}

#[derive(Serialize)]
struct ResponseEnvelope<'a> {
    private_key: &'a str,
    responder_id: &'a ClientId,
    msg_tag: &'a MsgTag,
    response: &'a Response,
}

/// Sink that re-enters the transport layer: POSTs JSON envelopes to the
/// callback endpoint a client declared via `set_callable`.
///
/// The client's own private key rides along in every envelope so the
/// client can verify the push really came from its hub.
pub struct HttpCallbackSink {
    http: reqwest::Client,
    base: Url,
    private_key: String,
}

impl HttpCallbackSink {
    pub fn new(base: Url, private_key: String, timeout: Duration) -> Result<Self, HubError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|err| HubError::Transport(format!("building callback client: {err}")))?;
        Ok(Self {
            http,
            base,
            private_key,
        })
    }

    fn endpoint(&self, op: &str) -> Result<Url, HubError> {
        self.base
            .join(op)
            .map_err(|err| HubError::Transport(format!("callback url join failed: {err}")))
    }

    async fn post<T: Serialize>(&self, op: &str, body: &T) -> Result<(), HubError> {
        let endpoint = self.endpoint(op)?;
        self.http
            .post(endpoint.clone())
            .json(body)
            .send()
            .await
            .map_err(|err| HubError::Transport(format!("posting to {endpoint}: {err}")))?
            .error_for_status()
            .map_err(|err| HubError::Transport(format!("callback endpoint rejected: {err}")))?;
        Ok(())
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn notify(&self, sender: &ClientId, message: &Message) -> Result<(), HubError> {
        self.post(
            "receive_notification",
            &NotificationEnvelope {
                private_key: &self.private_key,
                sender_id: sender,
                message,
            },
        )
        .await
    }

    async fn call(
        &self,
        sender: &ClientId,
        msg_id: &MsgId,
        message: &Message,
    ) -> Result<(), HubError> {
        self.post(
            "receive_call",
            &CallEnvelope {
                private_key: &self.private_key,
                sender_id: sender,
                msg_id,
                message,
            },
        )
        .await
    }

    async fn reply(
        &self,
        responder: &ClientId,
        tag: &MsgTag,
        response: &Response,
    ) -> Result<(), HubError> {
        self.post(
            "receive_response",
            &ResponseEnvelope {
                private_key: &self.private_key,
                responder_id: responder,
                msg_tag: tag,
                response,
            },
        )
        .await
    }
}

/// Shared handle to a client's sink as stored in the registry.
pub type SharedSink = Arc<dyn CallbackSink>;
