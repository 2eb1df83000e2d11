//! Core data model for the SAMP message hub.
//!
//! This crate holds the pure, I/O-free vocabulary shared by the hub and its
//! clients: the nested [`Value`] type carried in message parameters and
//! metadata, [`MType`] strings and subscription patterns, the
//! message/response envelopes, and the line-oriented lock record used for
//! hub discovery. Everything here is deterministic and synchronous; the
//! hub service in `samp-hub` builds on top of it.

mod error;
pub mod lock;
pub mod message;
pub mod metadata;
pub mod mtype;
pub mod value;

pub use crate::error::HubError;
pub use crate::lock::LockInfo;
pub use crate::message::{Message, Response, ResponseStatus};
pub use crate::metadata::Metadata;
pub use crate::mtype::{MType, SubscriptionPattern, Subscriptions};
pub use crate::value::{MapValue, Value};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hub-assigned public identifier of a registered client.
///
/// Ids are unique for the lifetime of the registration and are never reused
/// while the hub process runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Hub-generated correlation id for one outstanding call.
///
/// Opaque to clients; a recipient hands it back verbatim in `reply`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(String);

impl MsgId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sender-chosen correlation token attached to asynchronous calls.
///
/// The hub never interprets it; it is echoed back to the sender alongside
/// the response so the sender can match responses to its own bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgTag(String);

impl MsgTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MsgTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
