use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;

/// Runtime configuration for the hub process, merged from an optional
/// TOML file under explicit overrides (typically CLI flags).
#[derive(Debug, Clone)]
pub struct HubRuntimeConfig {
    /// Standard-profile port; 0 asks the OS for an unused one.
    pub port: u16,
    /// Lock-record path; `None` falls back to the per-user default.
    pub lockfile: Option<PathBuf>,
    pub web: WebSettings,
    /// Bound on the liveness probe of a pre-existing lock record.
    pub probe_timeout: Duration,
    /// Bound on each callback delivery to a client.
    pub callback_timeout: Duration,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WebSettings {
    pub enabled: bool,
    pub port: u16,
    pub origins: Vec<String>,
    pub allow_flash: bool,
    pub control_urls: bool,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: crate::profile::web::WEB_PROFILE_PORT,
            origins: Vec::new(),
            allow_flash: false,
            control_urls: true,
        }
    }
}

/// Explicit overrides that win over file values.
#[derive(Debug, Clone, Default)]
pub struct HubConfigOverrides {
    pub port: Option<u16>,
    pub lockfile: Option<PathBuf>,
    pub web_enabled: Option<bool>,
    pub web_port: Option<u16>,
    pub web_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    hub: HubSection,
    #[serde(default)]
    web: WebSection,
    #[serde(default)]
    timeouts: TimeoutSection,
}

#[derive(Debug, Deserialize, Default)]
struct HubSection {
    port: Option<u16>,
    lockfile: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct WebSection {
    enabled: Option<bool>,
    port: Option<u16>,
    origins: Option<Vec<String>>,
    allow_flash: Option<bool>,
    control_urls: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TimeoutSection {
    probe_ms: Option<u64>,
    callback_ms: Option<u64>,
}

impl HubRuntimeConfig {
    pub async fn from_sources(
        overrides: HubConfigOverrides,
        config_path: Option<PathBuf>,
    ) -> Result<Self> {
        let file_cfg = if let Some(path) = config_path.as_ref() {
            let contents = fs::read_to_string(path)
                .await
                .with_context(|| format!("reading hub configuration from {}", path.display()))?;
            parse_config(&contents, path)?
        } else {
            FileConfig::default()
        };

        let web_defaults = WebSettings::default();
        let web = WebSettings {
            enabled: overrides
                .web_enabled
                .or(file_cfg.web.enabled)
                .unwrap_or(web_defaults.enabled),
            port: overrides
                .web_port
                .or(file_cfg.web.port)
                .unwrap_or(web_defaults.port),
            origins: overrides
                .web_origins
                .or(file_cfg.web.origins)
                .unwrap_or(web_defaults.origins),
            allow_flash: file_cfg.web.allow_flash.unwrap_or(web_defaults.allow_flash),
            control_urls: file_cfg
                .web
                .control_urls
                .unwrap_or(web_defaults.control_urls),
        };

        Ok(Self {
            port: overrides.port.or(file_cfg.hub.port).unwrap_or(0),
            lockfile: overrides.lockfile.or(file_cfg.hub.lockfile),
            web,
            probe_timeout: Duration::from_millis(file_cfg.timeouts.probe_ms.unwrap_or(2_000)),
            callback_timeout: Duration::from_millis(
                file_cfg.timeouts.callback_ms.unwrap_or(10_000),
            ),
            config_path,
        })
    }
}

fn parse_config(contents: &str, path: &PathBuf) -> Result<FileConfig> {
    let deserializer = toml::Deserializer::new(contents);
    let parsed = serde_path_to_error::deserialize(deserializer)
        .with_context(|| format!("parsing hub configuration at {}", path.display()))?;
    Ok(parsed)
}
