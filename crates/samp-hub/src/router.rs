use std::collections::HashMap;

use tokio::sync::oneshot;

use samp_core::value::MapValue;
use samp_core::{ClientId, HubError, MType, Message, MsgId, MsgTag, Response};

use crate::registry::Registry;
use crate::sink::SharedSink;

/// How the response to a pending call finds its way back.
enum ReplyRoute {
    /// A `call_and_wait` caller suspended on this channel.
    Waiter(oneshot::Sender<Response>),
    /// An asynchronous `call`; the response is pushed to the sender's
    /// sink tagged with its own correlation token.
    Forward { sender: ClientId, tag: MsgTag },
}

struct PendingCall {
    sender: ClientId,
    recipient: ClientId,
    route: ReplyRoute,
}

/// A delivery planned under the state lock, executed after it is
/// released. Holding the sink handle (not the registry entry) keeps
/// slow or hanging transports out of the critical section.
pub struct Delivery {
    recipient: ClientId,
    sink: SharedSink,
    kind: DeliveryKind,
}

enum DeliveryKind {
    Notify {
        sender: ClientId,
        message: Message,
    },
    Call {
        sender: ClientId,
        msg_id: MsgId,
        message: Message,
    },
    Reply {
        responder: ClientId,
        tag: MsgTag,
        response: Response,
    },
}

impl Delivery {
    pub fn recipient(&self) -> &ClientId {
        &self.recipient
    }

    /// Pushes the payload through the recipient's callback sink.
    pub async fn dispatch(self) -> Result<(), HubError> {
        match &self.kind {
            DeliveryKind::Notify { sender, message } => {
                self.sink.notify(sender, message).await
            }
            DeliveryKind::Call {
                sender,
                msg_id,
                message,
            } => self.sink.call(sender, msg_id, message).await,
            DeliveryKind::Reply {
                responder,
                tag,
                response,
            } => self.sink.reply(responder, tag, response).await,
        }
    }
}

/// Routes concrete messages to recipients and owns the pending-call
/// table that correlates calls with their replies.
///
/// The router never performs I/O itself: every method computes routing
/// decisions against the registry and hands back [`Delivery`] values for
/// the broker to dispatch outside the lock.
#[derive(Default)]
pub struct Router {
    next_serial: u64,
    pending: HashMap<MsgId, PendingCall>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, msg_id: &MsgId) -> bool {
        self.pending.contains_key(msg_id)
    }

    fn allocate_msg_id(&mut self) -> MsgId {
        self.next_serial += 1;
        MsgId::new(format!("mid-{}", self.next_serial))
    }

    /// Resolves a call/notify target: registered, callable, and
    /// subscribed, with errors reported in that order of precedence.
    fn resolve_target(
        registry: &Registry,
        recipient: &ClientId,
        mtype: &MType,
    ) -> Result<SharedSink, HubError> {
        let entry = registry.get(recipient)?;
        let sink = entry
            .sink()
            .ok_or_else(|| HubError::NotCallable(recipient.clone()))?;
        if !entry.subscriptions().is_subscribed(mtype) {
            return Err(HubError::NotSubscribed {
                recipient: recipient.clone(),
                mtype: mtype.to_string(),
            });
        }
        Ok(sink.clone())
    }

    /// One-way notification to a single recipient. No msg-id is ever
    /// allocated for a notify.
    pub fn route_notify(
        &self,
        registry: &Registry,
        sender: &ClientId,
        recipient: &ClientId,
        message: Message,
    ) -> Result<Delivery, HubError> {
        let sink = Self::resolve_target(registry, recipient, &message.mtype)?;
        Ok(Delivery {
            recipient: recipient.clone(),
            sink,
            kind: DeliveryKind::Notify {
                sender: sender.clone(),
                message,
            },
        })
    }

    /// Notification to every subscriber, computed over a snapshot of the
    /// subscriber set taken now. The sender and `also_exclude` (the
    /// client that caused a hub event) never appear in the result.
    pub fn route_notify_all(
        &self,
        registry: &Registry,
        sender: &ClientId,
        message: Message,
        also_exclude: Option<&ClientId>,
    ) -> Vec<Delivery> {
        registry
            .subscribers_of(&message.mtype, Some(sender))
            .into_iter()
            .filter(|(id, _)| Some(id) != also_exclude)
            .filter_map(|(id, _)| {
                let sink = registry.get(&id).ok()?.sink()?.clone();
                Some(Delivery {
                    recipient: id,
                    sink,
                    kind: DeliveryKind::Notify {
                        sender: sender.clone(),
                        message: message.clone(),
                    },
                })
            })
            .collect()
    }

    /// Asynchronous call: records a pending entry routed back through
    /// the sender's sink and returns the fresh msg-id with the delivery
    /// to dispatch.
    pub fn route_call(
        &mut self,
        registry: &Registry,
        sender: &ClientId,
        recipient: &ClientId,
        tag: MsgTag,
        message: Message,
    ) -> Result<(MsgId, Delivery), HubError> {
        let sink = Self::resolve_target(registry, recipient, &message.mtype)?;
        let msg_id = self.allocate_msg_id();
        self.pending.insert(
            msg_id.clone(),
            PendingCall {
                sender: sender.clone(),
                recipient: recipient.clone(),
                route: ReplyRoute::Forward {
                    sender: sender.clone(),
                    tag,
                },
            },
        );
        Ok((
            msg_id.clone(),
            Delivery {
                recipient: recipient.clone(),
                sink,
                kind: DeliveryKind::Call {
                    sender: sender.clone(),
                    msg_id,
                    message,
                },
            },
        ))
    }

    /// Asynchronous call to every subscriber over a snapshot of the
    /// subscriber set; one msg-id per recipient.
    pub fn route_call_all(
        &mut self,
        registry: &Registry,
        sender: &ClientId,
        tag: MsgTag,
        message: Message,
    ) -> Vec<(ClientId, MsgId, Delivery)> {
        let recipients = registry.subscribers_of(&message.mtype, Some(sender));
        let mut routed = Vec::with_capacity(recipients.len());
        for (id, _) in recipients {
            match self.route_call(registry, sender, &id, tag.clone(), message.clone()) {
                Ok((msg_id, delivery)) => routed.push((id, msg_id, delivery)),
                // The snapshot said subscribed; a failure here means the
                // registry changed shape mid-iteration, which the broker
                // lock rules out. Skip rather than fail the broadcast.
                Err(err) => {
                    tracing::warn!(recipient = %id, error = %err, "dropping broadcast recipient")
                }
            }
        }
        routed
    }

    /// Synchronous call: as [`route_call`](Self::route_call) but the
    /// pending entry carries a oneshot the caller suspends on.
    pub fn begin_call_and_wait(
        &mut self,
        registry: &Registry,
        sender: &ClientId,
        recipient: &ClientId,
        message: Message,
    ) -> Result<(MsgId, oneshot::Receiver<Response>, Delivery), HubError> {
        let sink = Self::resolve_target(registry, recipient, &message.mtype)?;
        let (tx, rx) = oneshot::channel();
        let msg_id = self.allocate_msg_id();
        self.pending.insert(
            msg_id.clone(),
            PendingCall {
                sender: sender.clone(),
                recipient: recipient.clone(),
                route: ReplyRoute::Waiter(tx),
            },
        );
        Ok((
            msg_id.clone(),
            rx,
            Delivery {
                recipient: recipient.clone(),
                sink,
                kind: DeliveryKind::Call {
                    sender: sender.clone(),
                    msg_id,
                    message,
                },
            },
        ))
    }

    /// Resolves one pending call with the recipient's response.
    ///
    /// Fails with `UnknownPendingCall` when the msg-id is not
    /// outstanding or was addressed to a different recipient, which also
    /// makes a second reply for the same msg-id a reported no-op.
    /// Returns a delivery for asynchronous calls whose sender is still
    /// reachable, `None` when a waiter was completed directly or the
    /// sender has gone away.
    pub fn resolve_reply(
        &mut self,
        registry: &Registry,
        recipient: &ClientId,
        msg_id: &MsgId,
        response: Response,
    ) -> Result<Option<Delivery>, HubError> {
        match self.pending.get(msg_id) {
            Some(call) if &call.recipient == recipient => {}
            _ => return Err(HubError::UnknownPendingCall(msg_id.clone())),
        }
        let call = self.pending.remove(msg_id).expect("entry checked above");
        match call.route {
            ReplyRoute::Waiter(tx) => {
                // A send failure means the waiter already gave up
                // (timeout won the race); the response is dropped.
                if tx.send(response).is_err() {
                    tracing::debug!(%msg_id, "reply arrived after waiter gave up");
                }
                Ok(None)
            }
            ReplyRoute::Forward { sender, tag } => {
                let Some(sink) = registry.get(&sender).ok().and_then(|e| e.sink().cloned())
                else {
                    tracing::debug!(%msg_id, %sender, "response suppressed: sender gone");
                    return Ok(None);
                };
                Ok(Some(Delivery {
                    recipient: sender,
                    sink,
                    kind: DeliveryKind::Reply {
                        responder: recipient.clone(),
                        tag,
                        response,
                    },
                }))
            }
        }
    }

    /// Timeout side of the reply/timeout race: removes the entry if it
    /// is still outstanding. Returns false when a reply got there first,
    /// in which case the waiter's channel already holds the response.
    pub fn take_expired(&mut self, msg_id: &MsgId) -> bool {
        self.pending.remove(msg_id).is_some()
    }

    /// Drops a pending entry whose outbound delivery failed, unblocking
    /// a waiter with an ERROR response if one is suspended on it.
    pub fn fail_delivery(&mut self, msg_id: &MsgId, reason: &str) {
        if let Some(call) = self.pending.remove(msg_id) {
            if let ReplyRoute::Waiter(tx) = call.route {
                let _ = tx.send(Response::error(format!("delivery failed: {reason}")));
            }
        }
    }

    /// Resolves every pending call touching a departing client.
    ///
    /// Calls addressed *to* the client unblock their waiters with an
    /// ERROR response; asynchronous entries are dropped so the sender is
    /// never notified. Calls *from* the client are dropped too: their
    /// eventual responses would have nowhere to go.
    pub fn sweep_client(&mut self, id: &ClientId) {
        let affected: Vec<MsgId> = self
            .pending
            .iter()
            .filter(|(_, call)| &call.sender == id || &call.recipient == id)
            .map(|(msg_id, _)| msg_id.clone())
            .collect();
        for msg_id in affected {
            let call = self.pending.remove(&msg_id).expect("listed above");
            match call.route {
                ReplyRoute::Waiter(tx) => {
                    let _ = tx.send(Response::error(format!(
                        "client {} unregistered before replying",
                        call.recipient
                    )));
                }
                ReplyRoute::Forward { .. } => {
                    tracing::debug!(%msg_id, client = %id, "pending call orphaned");
                }
            }
        }
    }

    /// Timeout response handed to `call_and_wait` callers.
    pub fn timeout_response(timeout_ms: u64) -> Response {
        Response::error(format!("no response within {timeout_ms} ms"))
    }
}

/// Hub-side view of a broadcast: recipients mapped to their msg-ids.
pub type BroadcastIds = std::collections::BTreeMap<ClientId, MsgId>;

/// Annotation maps returned by subscriber queries.
pub type SubscriberInfo = std::collections::BTreeMap<ClientId, MapValue>;
