use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use samp_core::value::{MapValue, Value};
use samp_core::{
    ClientId, HubError, MType, Message, Metadata, MsgId, MsgTag, Response, Subscriptions,
};

use crate::keys::{constant_time_secret_eq, generate_secret, KeyAuthority, ProfileScope};
use crate::observability::HubObservability;
use crate::registry::Registry;
use crate::router::{BroadcastIds, Delivery, Router, SubscriberInfo};
use crate::sink::SharedSink;

/// Reserved lifecycle event types, sent only by the hub itself.
pub const EVENT_SHUTDOWN: &str = "samp.hub.event.shutdown";
pub const EVENT_REGISTER: &str = "samp.hub.event.register";
pub const EVENT_UNREGISTER: &str = "samp.hub.event.unregister";
pub const EVENT_METADATA: &str = "samp.hub.event.metadata";
pub const EVENT_SUBSCRIPTIONS: &str = "samp.hub.event.subscriptions";

/// What a successful registration hands back to the new client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub self_id: ClientId,
    pub private_key: String,
    pub hub_id: ClientId,
}

struct HubState {
    registry: Registry,
    keys: KeyAuthority,
    router: Router,
    closed: bool,
}

/// The hub service façade: the full client-facing operation set over
/// registry, key authority, and router.
///
/// All shared state lives behind one async mutex; callback deliveries
/// are planned under the lock and dispatched after it is released, so a
/// slow or hanging client transport never stalls the broker.
#[derive(Clone)]
pub struct HubService {
    inner: Arc<Mutex<HubState>>,
    observability: HubObservability,
    hub_id: ClientId,
    std_credential: String,
}

impl HubService {
    pub fn new(hub_metadata: Metadata) -> Self {
        let registry = Registry::new(hub_metadata);
        let hub_id = registry.hub_id().clone();
        Self {
            inner: Arc::new(Mutex::new(HubState {
                registry,
                keys: KeyAuthority::new(),
                router: Router::new(),
                closed: false,
            })),
            observability: HubObservability::new(),
            hub_id,
            std_credential: generate_secret(ProfileScope::Standard),
        }
    }

    pub fn hub_id(&self) -> &ClientId {
        &self.hub_id
    }

    /// The registration credential advertised through the lock record;
    /// possession of it is what authorises standard-profile registration.
    pub fn lock_secret(&self) -> &str {
        &self.std_credential
    }

    pub fn observability(&self) -> HubObservability {
        self.observability.clone()
    }

    fn track<T>(&self, op: &'static str, result: Result<T, HubError>) -> Result<T, HubError> {
        match &result {
            Ok(_) => self.observability.record_ok(op),
            Err(err) => self.observability.record_err(err.code()),
        }
        result
    }

    /// Registers a new client arriving through `scope`.
    ///
    /// On the standard profile the caller proves itself with the
    /// lock-record secret; on the web profile the connection profile has
    /// already run its authorizer before calling in, so no credential is
    /// expected here.
    pub async fn register(
        &self,
        scope: ProfileScope,
        credential: Option<&str>,
    ) -> Result<Registration, HubError> {
        let result = self.do_register(scope, credential).await;
        self.track("register", result)
    }

    async fn do_register(
        &self,
        scope: ProfileScope,
        credential: Option<&str>,
    ) -> Result<Registration, HubError> {
        let (registration, events) = {
            let mut state = self.inner.lock().await;
            if state.closed {
                return Err(HubError::Shutdown);
            }
            if scope == ProfileScope::Standard {
                let presented = credential.ok_or(HubError::AuthenticationFailure)?;
                if !constant_time_secret_eq(presented, &self.std_credential) {
                    return Err(HubError::AuthenticationFailure);
                }
            }
            let id = state.registry.register();
            let private_key = state.keys.issue(scope, id.clone());
            tracing::info!(client = %id, scope = scope.name(), "client registered");
            let events = self.plan_event(
                &state,
                EVENT_REGISTER,
                &id,
                [("id".to_owned(), Value::Str(id.to_string()))].into(),
            );
            (
                Registration {
                    self_id: id,
                    private_key,
                    hub_id: self.hub_id.clone(),
                },
                events,
            )
        };
        self.spawn_notifications(events);
        Ok(registration)
    }

    pub async fn unregister(&self, secret: &str) -> Result<(), HubError> {
        let result = self.do_unregister(secret).await;
        self.track("unregister", result)
    }

    async fn do_unregister(&self, secret: &str) -> Result<(), HubError> {
        let events = {
            let mut state = self.inner.lock().await;
            let id = self.auth(&state, secret)?;
            state.registry.unregister(&id)?;
            state.keys.revoke(&id);
            state.router.sweep_client(&id);
            tracing::info!(client = %id, "client unregistered");
            self.plan_event(
                &state,
                EVENT_UNREGISTER,
                &id,
                [("id".to_owned(), Value::Str(id.to_string()))].into(),
            )
        };
        self.spawn_notifications(events);
        Ok(())
    }

    /// Liveness no-op. Unauthenticated: the discovery probe uses it
    /// before any registration exists. Fails only once the hub is shut
    /// down.
    pub async fn ping(&self) -> Result<(), HubError> {
        let state = self.inner.lock().await;
        if state.closed {
            return Err(HubError::Shutdown);
        }
        Ok(())
    }

    pub async fn declare_metadata(&self, secret: &str, metadata: Metadata) -> Result<(), HubError> {
        let result = self.do_declare_metadata(secret, metadata).await;
        self.track("declare_metadata", result)
    }

    async fn do_declare_metadata(&self, secret: &str, metadata: Metadata) -> Result<(), HubError> {
        let events = {
            let mut state = self.inner.lock().await;
            let id = self.auth(&state, secret)?;
            state.registry.set_metadata(&id, metadata.clone())?;
            self.plan_event(
                &state,
                EVENT_METADATA,
                &id,
                [
                    ("id".to_owned(), Value::Str(id.to_string())),
                    ("metadata".to_owned(), Value::Map(metadata.into_map())),
                ]
                .into(),
            )
        };
        self.spawn_notifications(events);
        Ok(())
    }

    pub async fn get_metadata(&self, secret: &str, id: &ClientId) -> Result<Metadata, HubError> {
        let state = self.inner.lock().await;
        self.auth(&state, secret)?;
        Ok(state.registry.get(id)?.metadata().clone())
    }

    pub async fn declare_subscriptions(
        &self,
        secret: &str,
        subscriptions: Subscriptions,
    ) -> Result<(), HubError> {
        let result = self.do_declare_subscriptions(secret, subscriptions).await;
        self.track("declare_subscriptions", result)
    }

    async fn do_declare_subscriptions(
        &self,
        secret: &str,
        subscriptions: Subscriptions,
    ) -> Result<(), HubError> {
        let events = {
            let mut state = self.inner.lock().await;
            let id = self.auth(&state, secret)?;
            state
                .registry
                .set_subscriptions(&id, subscriptions.clone())?;
            let subs_value = Value::Map(
                subscriptions
                    .entries()
                    .iter()
                    .map(|(pattern, annotations)| {
                        (pattern.clone(), Value::Map(annotations.clone()))
                    })
                    .collect(),
            );
            self.plan_event(
                &state,
                EVENT_SUBSCRIPTIONS,
                &id,
                [
                    ("id".to_owned(), Value::Str(id.to_string())),
                    ("subscriptions".to_owned(), subs_value),
                ]
                .into(),
            )
        };
        self.spawn_notifications(events);
        Ok(())
    }

    pub async fn get_subscriptions(
        &self,
        secret: &str,
        id: &ClientId,
    ) -> Result<Subscriptions, HubError> {
        let state = self.inner.lock().await;
        self.auth(&state, secret)?;
        Ok(state.registry.get(id)?.subscriptions().clone())
    }

    /// Ids of every other registered client, the hub included.
    pub async fn get_registered_clients(&self, secret: &str) -> Result<Vec<ClientId>, HubError> {
        let state = self.inner.lock().await;
        let caller = self.auth(&state, secret)?;
        Ok(state
            .registry
            .ids()
            .into_iter()
            .filter(|id| id != &caller)
            .collect())
    }

    pub async fn get_subscribed_clients(
        &self,
        secret: &str,
        mtype: &str,
    ) -> Result<SubscriberInfo, HubError> {
        let state = self.inner.lock().await;
        let caller = self.auth(&state, secret)?;
        let mtype = MType::parse(mtype)?;
        Ok(state
            .registry
            .subscribers_of(&mtype, Some(&caller))
            .into_iter()
            .collect())
    }

    /// Declares (or withdraws, with `None`) the caller's callback sink,
    /// flipping its callable flag.
    pub async fn set_callable(
        &self,
        secret: &str,
        sink: Option<SharedSink>,
    ) -> Result<(), HubError> {
        let result = self.do_set_callable(secret, sink).await;
        self.track("set_callable", result)
    }

    async fn do_set_callable(
        &self,
        secret: &str,
        sink: Option<SharedSink>,
    ) -> Result<(), HubError> {
        let mut state = self.inner.lock().await;
        let id = self.auth(&state, secret)?;
        state.registry.set_callable(&id, sink)
    }

    pub async fn notify(
        &self,
        secret: &str,
        recipient: &ClientId,
        message: Message,
    ) -> Result<(), HubError> {
        let result = self.do_notify(secret, recipient, message).await;
        self.track("notify", result)
    }

    async fn do_notify(
        &self,
        secret: &str,
        recipient: &ClientId,
        message: Message,
    ) -> Result<(), HubError> {
        check_client_message(&message)?;
        let delivery = {
            let state = self.inner.lock().await;
            let sender = self.auth(&state, secret)?;
            state
                .router
                .route_notify(&state.registry, &sender, recipient, message)?
        };
        self.spawn_notifications(vec![delivery]);
        Ok(())
    }

    /// Broadcast notification; returns the recipients of the snapshot.
    pub async fn notify_all(
        &self,
        secret: &str,
        message: Message,
    ) -> Result<Vec<ClientId>, HubError> {
        let result = self.do_notify_all(secret, message).await;
        self.track("notify_all", result)
    }

    async fn do_notify_all(
        &self,
        secret: &str,
        message: Message,
    ) -> Result<Vec<ClientId>, HubError> {
        check_client_message(&message)?;
        let deliveries = {
            let state = self.inner.lock().await;
            let sender = self.auth(&state, secret)?;
            state
                .router
                .route_notify_all(&state.registry, &sender, message, None)
        };
        let recipients = deliveries.iter().map(|d| d.recipient().clone()).collect();
        self.spawn_notifications(deliveries);
        Ok(recipients)
    }

    pub async fn call(
        &self,
        secret: &str,
        recipient: &ClientId,
        tag: MsgTag,
        message: Message,
    ) -> Result<MsgId, HubError> {
        let result = self.do_call(secret, recipient, tag, message).await;
        self.track("call", result)
    }

    async fn do_call(
        &self,
        secret: &str,
        recipient: &ClientId,
        tag: MsgTag,
        message: Message,
    ) -> Result<MsgId, HubError> {
        check_client_message(&message)?;
        let (msg_id, delivery) = {
            let mut state = self.inner.lock().await;
            let sender = self.auth(&state, secret)?;
            let HubState {
                registry, router, ..
            } = &mut *state;
            router.route_call(registry, &sender, recipient, tag, message)?
        };
        self.spawn_call_delivery(msg_id.clone(), delivery);
        Ok(msg_id)
    }

    pub async fn call_all(
        &self,
        secret: &str,
        tag: MsgTag,
        message: Message,
    ) -> Result<BroadcastIds, HubError> {
        let result = self.do_call_all(secret, tag, message).await;
        self.track("call_all", result)
    }

    async fn do_call_all(
        &self,
        secret: &str,
        tag: MsgTag,
        message: Message,
    ) -> Result<BroadcastIds, HubError> {
        check_client_message(&message)?;
        let routed = {
            let mut state = self.inner.lock().await;
            let sender = self.auth(&state, secret)?;
            let HubState {
                registry, router, ..
            } = &mut *state;
            router.route_call_all(registry, &sender, tag, message)
        };
        let mut ids = BroadcastIds::new();
        for (recipient, msg_id, delivery) in routed {
            ids.insert(recipient, msg_id.clone());
            self.spawn_call_delivery(msg_id, delivery);
        }
        Ok(ids)
    }

    /// Synchronous call: suspends the calling task until the recipient
    /// replies or `timeout_ms` elapses (`0` waits forever).
    ///
    /// Timeout and orphaning surface as ERROR-status responses, so the
    /// caller can always distinguish a remote ERROR from a local
    /// transport fault (which is a `HubError`).
    pub async fn call_and_wait(
        &self,
        secret: &str,
        recipient: &ClientId,
        message: Message,
        timeout_ms: u64,
    ) -> Result<Response, HubError> {
        let result = self
            .do_call_and_wait(secret, recipient, message, timeout_ms)
            .await;
        self.track("call_and_wait", result)
    }

    async fn do_call_and_wait(
        &self,
        secret: &str,
        recipient: &ClientId,
        message: Message,
        timeout_ms: u64,
    ) -> Result<Response, HubError> {
        check_client_message(&message)?;
        let (msg_id, mut rx, delivery) = {
            let mut state = self.inner.lock().await;
            let sender = self.auth(&state, secret)?;
            let HubState {
                registry, router, ..
            } = &mut *state;
            router.begin_call_and_wait(registry, &sender, recipient, message)?
        };

        if let Err(err) = delivery.dispatch().await {
            let mut state = self.inner.lock().await;
            state.router.fail_delivery(&msg_id, &err.to_string());
            return Err(err);
        }

        if timeout_ms == 0 {
            return rx
                .await
                .map_err(|_| HubError::Transport("pending call abandoned".into()));
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(HubError::Transport("pending call abandoned".into())),
            Err(_elapsed) => {
                let mut state = self.inner.lock().await;
                if state.router.take_expired(&msg_id) {
                    Ok(Router::timeout_response(timeout_ms))
                } else {
                    // The reply won the race while we were timing out;
                    // its value is already in the channel.
                    drop(state);
                    rx.try_recv()
                        .map_err(|_| HubError::Transport("pending call abandoned".into()))
                }
            }
        }
    }

    pub async fn reply(
        &self,
        secret: &str,
        msg_id: &MsgId,
        response: Response,
    ) -> Result<(), HubError> {
        let result = self.do_reply(secret, msg_id, response).await;
        self.track("reply", result)
    }

    async fn do_reply(
        &self,
        secret: &str,
        msg_id: &MsgId,
        response: Response,
    ) -> Result<(), HubError> {
        response.validate()?;
        let delivery = {
            let mut state = self.inner.lock().await;
            let recipient = self.auth(&state, secret)?;
            let HubState {
                registry, router, ..
            } = &mut *state;
            router.resolve_reply(registry, &recipient, msg_id, response)?
        };
        if let Some(delivery) = delivery {
            self.spawn_notifications(vec![delivery]);
        }
        Ok(())
    }

    /// Stops the hub: no further registrations, every client
    /// unregistered with lifecycle events, all key material released.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let deliveries = {
            let mut state = self.inner.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            let shutdown_event = Message::new(
                MType::parse(EVENT_SHUTDOWN).expect("reserved mtype is well-formed"),
            );
            let mut deliveries = state.router.route_notify_all(
                &state.registry,
                &self.hub_id,
                shutdown_event,
                None,
            );
            for id in state.registry.ids() {
                if id == self.hub_id {
                    continue;
                }
                if state.registry.unregister(&id).is_err() {
                    continue;
                }
                state.keys.revoke(&id);
                state.router.sweep_client(&id);
                deliveries.extend(self.plan_event(
                    &state,
                    EVENT_UNREGISTER,
                    &id,
                    [("id".to_owned(), Value::Str(id.to_string()))].into(),
                ));
            }
            state.keys.clear();
            tracing::info!("hub service shut down");
            deliveries
        };
        // Dispatched in order so the shutdown event lands before the
        // unregister churn; sink timeouts bound the total wait.
        for delivery in deliveries {
            let recipient = delivery.recipient().clone();
            if let Err(err) = delivery.dispatch().await {
                tracing::warn!(recipient = %recipient, error = %err, "shutdown event delivery failed");
            }
        }
    }

    pub async fn is_shut_down(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Count of outstanding calls; used by tests and the runtime's
    /// shutdown log line.
    pub async fn outstanding_calls(&self) -> usize {
        self.inner.lock().await.router.outstanding()
    }

    fn auth(&self, state: &HubState, secret: &str) -> Result<ClientId, HubError> {
        if state.closed {
            return Err(HubError::Shutdown);
        }
        state.keys.authenticate(secret)
    }

    /// Builds the deliveries for one reserved lifecycle event, excluding
    /// the client that caused it.
    fn plan_event(
        &self,
        state: &HubState,
        mtype: &str,
        cause: &ClientId,
        params: MapValue,
    ) -> Vec<Delivery> {
        let mut message =
            Message::new(MType::parse(mtype).expect("reserved mtype is well-formed"));
        message.params = params;
        state
            .router
            .route_notify_all(&state.registry, &self.hub_id, message, Some(cause))
    }

    fn spawn_notifications(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            tokio::spawn(async move {
                let recipient = delivery.recipient().clone();
                if let Err(err) = delivery.dispatch().await {
                    tracing::warn!(recipient = %recipient, error = %err, "notification delivery failed");
                }
            });
        }
    }

    /// Async call delivery: a transport failure retracts the pending
    /// entry so the sender is never left waiting on a call that was
    /// never received.
    fn spawn_call_delivery(&self, msg_id: MsgId, delivery: Delivery) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let recipient = delivery.recipient().clone();
            if let Err(err) = delivery.dispatch().await {
                tracing::warn!(recipient = %recipient, error = %err, "call delivery failed");
                inner
                    .lock()
                    .await
                    .router
                    .fail_delivery(&msg_id, &err.to_string());
            }
        });
    }
}

/// Validation applied to every client-supplied message: structural
/// soundness plus the reserved-namespace fence.
fn check_client_message(message: &Message) -> Result<(), HubError> {
    message.validate()?;
    if message.mtype.is_hub_reserved() {
        return Err(HubError::InvalidArgument(format!(
            "mtype {} is reserved for the hub",
            message.mtype
        )));
    }
    Ok(())
}
