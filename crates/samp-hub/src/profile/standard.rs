//! The standard profile: a loopback-only listener admitting clients
//! that present the lock-record secret.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::post;
use axum::Json;
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::broker::HubService;
use crate::keys::ProfileScope;

use super::{error_response, operation_routes, ConnectionProfile, ProfileContext, ServerHandle};

#[derive(Debug, Deserialize)]
struct StandardRegisterRequest {
    /// The hub secret read from the lock record.
    secret: String,
}

/// Loopback transport for desktop clients that discovered the hub
/// through the lock record.
pub struct StandardProfile {
    port: u16,
    callback_timeout: Duration,
    handle: Option<ServerHandle>,
}

impl StandardProfile {
    /// `port` 0 asks the OS for an unused port, reported afterwards via
    /// [`bound_addr`](ConnectionProfile::bound_addr).
    pub fn new(port: u16, callback_timeout: Duration) -> Self {
        Self {
            port,
            callback_timeout,
            handle: None,
        }
    }

    /// Base URL clients reach this profile at; advertised in the lock
    /// record.
    pub fn base_url(&self) -> Option<String> {
        self.handle
            .as_ref()
            .map(|handle| format!("http://{}/", handle.addr()))
    }
}

#[async_trait]
impl ConnectionProfile for StandardProfile {
    fn profile_name(&self) -> &'static str {
        "standard"
    }

    async fn start(&mut self, hub: &HubService) -> Result<()> {
        if self.handle.is_some() {
            bail!("standard profile already running");
        }
        let ctx = ProfileContext {
            hub: hub.clone(),
            scope: ProfileScope::Standard,
            callback_timeout: self.callback_timeout,
            url_tracker: None,
        };
        let app = operation_routes(ctx.clone())
            .route("/register", post(handle_register).with_state(ctx));
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], self.port)))
            .await
            .with_context(|| format!("binding standard profile on loopback port {}", self.port))?;
        let handle = ServerHandle::spawn(listener, app).await?;
        tracing::info!(addr = %handle.addr(), "standard profile listening");
        self.handle = Some(handle);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
            tracing::info!("standard profile stopped");
        }
    }

    fn bound_addr(&self) -> Option<SocketAddr> {
        self.handle.as_ref().map(ServerHandle::addr)
    }
}

async fn handle_register(
    State(ctx): State<ProfileContext>,
    Json(request): Json<StandardRegisterRequest>,
) -> AxumResponse {
    match ctx
        .hub
        .register(ctx.scope, Some(&request.secret))
        .await
    {
        Ok(registration) => Json(registration).into_response(),
        Err(err) => error_response(&err),
    }
}
