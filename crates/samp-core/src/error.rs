use thiserror::Error;

use crate::{ClientId, MsgId};

/// Protocol-level failures surfaced to hub callers.
///
/// Validation errors are returned synchronously from the violating
/// operation. Delivery failures to third parties during broadcasts are
/// logged and isolated per recipient; they never take this form from the
/// initiating caller's point of view.
#[derive(Debug, Error)]
pub enum HubError {
    /// The presented secret is unknown, revoked, or was issued for a
    /// different connection profile.
    #[error("authentication failed: unknown or invalid private key")]
    AuthenticationFailure,

    /// An operation referenced a client id that is not registered.
    #[error("no registered client with id {0}")]
    UnknownClient(ClientId),

    /// The call target has not registered a callback endpoint.
    #[error("client {0} is not callable")]
    NotCallable(ClientId),

    /// The call target holds no subscription matching the message type.
    #[error("client {recipient} is not subscribed to {mtype}")]
    NotSubscribed { recipient: ClientId, mtype: String },

    /// Malformed metadata, subscriptions, or message payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A reply referenced a msg-id that is not outstanding, or that was
    /// addressed to a different recipient.
    #[error("no pending call with msg-id {0} for this client")]
    UnknownPendingCall(MsgId),

    /// Startup found a lock record advertising a hub that answered a
    /// liveness probe.
    #[error("a hub is already running at {0}")]
    HubAlreadyRunning(String),

    /// Delivery to a remote client could not be completed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The hub has been shut down and accepts no further operations.
    #[error("hub is shut down")]
    Shutdown,
}

impl HubError {
    /// Stable machine-readable code for wire envelopes and counters.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::AuthenticationFailure => "authentication_failure",
            HubError::UnknownClient(_) => "unknown_client",
            HubError::NotCallable(_) => "not_callable",
            HubError::NotSubscribed { .. } => "not_subscribed",
            HubError::InvalidArgument(_) => "invalid_argument",
            HubError::UnknownPendingCall(_) => "unknown_pending_call",
            HubError::HubAlreadyRunning(_) => "hub_already_running",
            HubError::Transport(_) => "transport_failure",
            HubError::Shutdown => "shutdown",
        }
    }
}
