//! The SAMP hub service.
//!
//! A hub is the rendezvous point through which independently launched
//! applications discover each other and exchange typed messages. Clients
//! register, declare metadata and subscriptions, and send notifications,
//! asynchronous calls, and synchronous calls; the hub authenticates every
//! request with a per-registration secret, routes by subscription, and
//! advertises itself through an on-disk lock record.
//!
//! [`runtime::HubRuntime`] ties the pieces together: the
//! [`broker::HubService`] state machine, one or more connection profiles
//! ([`profile::standard`], [`profile::web`]), and the
//! [`discovery`] lock-record lifecycle.

pub mod broker;
pub mod config;
pub mod discovery;
pub mod keys;
pub mod observability;
pub mod profile;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod sink;
