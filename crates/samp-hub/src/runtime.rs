use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};

use samp_core::{LockInfo, Metadata};

use crate::broker::HubService;
use crate::config::HubRuntimeConfig;
use crate::discovery::DiscoveryService;
use crate::observability::ObservabilitySnapshot;
use crate::profile::standard::StandardProfile;
use crate::profile::web::{
    AcceptAllAuthorizer, ClientAuthorizer, LoggingAuthorizer, OriginListAuthorizer, WebProfile,
    WebProfileConfig,
};
use crate::profile::ConnectionProfile;

/// One running hub: broker, connection profiles, and the published lock
/// record, with explicit start/stop.
///
/// An owned value rather than process-global state, so tests run
/// several independent hubs in one process.
pub struct HubRuntime {
    hub: HubService,
    standard: StandardProfile,
    web: Option<WebProfile>,
    discovery: DiscoveryService,
    lockfile: PathBuf,
    lock_info: LockInfo,
}

impl HubRuntime {
    pub async fn start(config: HubRuntimeConfig) -> Result<Self> {
        let mut metadata = Metadata::new();
        metadata.set_name("samp-hub");
        metadata.set_description("SAMP message hub");
        let hub = HubService::new(metadata);

        let lockfile = config
            .lockfile
            .clone()
            .or_else(DiscoveryService::default_lockfile_path)
            .context("no lock record path configured and no home directory found")?;
        let discovery = DiscoveryService::new(config.probe_timeout)?;

        let mut standard = StandardProfile::new(config.port, config.callback_timeout);
        standard.start(&hub).await?;
        let url = standard
            .base_url()
            .context("standard profile reported no bound address")?;

        let lock_info = LockInfo::new(hub.lock_secret(), url)
            .with_extra("hub.impl", env!("CARGO_PKG_NAME"))
            .with_extra(
                "hub.start.date",
                humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
            );
        if let Err(err) = discovery.publish(&lock_info, &lockfile).await {
            standard.stop().await;
            return Err(err);
        }

        let web = if config.web.enabled {
            let mut profile = WebProfile::new(
                WebProfileConfig {
                    port: config.web.port,
                    origins: config.web.origins.clone(),
                    allow_flash: config.web.allow_flash,
                    control_urls: config.web.control_urls,
                },
                web_authorizer(&config.web.origins),
                config.callback_timeout,
            );
            if let Err(err) = profile.start(&hub).await {
                discovery.withdraw(&lockfile, hub.lock_secret()).await;
                standard.stop().await;
                return Err(err);
            }
            Some(profile)
        } else {
            None
        };

        Ok(Self {
            hub,
            standard,
            web,
            discovery,
            lockfile,
            lock_info,
        })
    }

    pub fn hub(&self) -> &HubService {
        &self.hub
    }

    pub fn lock_info(&self) -> &LockInfo {
        &self.lock_info
    }

    pub fn lockfile_path(&self) -> &PathBuf {
        &self.lockfile
    }

    pub fn standard_addr(&self) -> Option<SocketAddr> {
        self.standard.bound_addr()
    }

    pub fn web_addr(&self) -> Option<SocketAddr> {
        self.web.as_ref().and_then(ConnectionProfile::bound_addr)
    }

    pub fn metrics_snapshot(&self) -> ObservabilitySnapshot {
        self.hub.observability().snapshot()
    }

    /// Withdraws the lock record, shuts the broker down (emitting
    /// lifecycle events), and stops the listeners.
    pub async fn shutdown(mut self) -> Result<()> {
        self.discovery
            .withdraw(&self.lockfile, self.hub.lock_secret())
            .await;
        self.hub.shutdown().await;
        self.standard.stop().await;
        if let Some(web) = self.web.as_mut() {
            web.stop().await;
        }
        tracing::info!(snapshot = ?self.metrics_snapshot(), "hub runtime stopped");
        Ok(())
    }
}

/// Default web admission policy: an origin allow-list when one is
/// configured, otherwise open admission (with every decision logged).
fn web_authorizer(origins: &[String]) -> Arc<dyn ClientAuthorizer> {
    if origins.is_empty() {
        tracing::warn!("web profile admits any origin; configure an allow-list to restrict it");
        Arc::new(LoggingAuthorizer::new(AcceptAllAuthorizer))
    } else {
        Arc::new(LoggingAuthorizer::new(OriginListAuthorizer::new(
            origins.to_vec(),
        )))
    }
}
