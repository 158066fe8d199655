//! Configuration management
//!
//! Handles:
//! - Kernel server address (hostname or IPv4, port, https)
//! - Client identity (name) and heartbeat interval
//! - OS-specific config file with environment overrides

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub hostname: Option<String>,
    pub ip: Option<Ipv4Addr>,
    pub port: u16,
    #[serde(default)]
    pub https: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                hostname: Some("localhost".to_string()),
                ip: None,
                port: 8080,
                https: false,
            },
            client: ClientConfig {
                name: hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or_else(|_| "healthnet-agent".to_string()),
                interval_secs: 60,
            },
        }
    }
}

impl ServerConfig {
    /// Hostname or IP must be set, port must be non-zero
    pub fn validate(&self) -> Result<()> {
        let has_host = self.hostname.as_deref().is_some_and(|h| !h.trim().is_empty());
        if !has_host && self.ip.is_none() {
            bail!("hostname or ip must be set");
        }
        if self.port == 0 {
            bail!("invalid port value: 0");
        }
        Ok(())
    }

    /// Base URL of the kernel API; hostname wins over ip
    pub fn base_url(&self) -> Result<String> {
        self.validate()?;
        let host = match self.hostname.as_deref().filter(|h| !h.trim().is_empty()) {
            Some(hostname) => hostname.to_string(),
            None => self.ip.map(|ip| ip.to_string()).unwrap_or_default(),
        };
        let scheme = if self.https { "https" } else { "http" };
        Ok(format!("{scheme}://{host}:{}", self.port))
    }
}

impl AgentConfig {
    /// Load config from OS-specific location, then apply environment overrides
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content).context("Invalid agent config file")?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.server.validate()?;
        Ok(config)
    }

    /// Override fields from `HEALTHNET_*` variables
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HEALTHNET_SERVER_HOST") {
            self.server.hostname = Some(host).filter(|h| !h.trim().is_empty());
        }
        if let Some(ip) = lookup("HEALTHNET_SERVER_IP") {
            self.server.ip = Some(ip.trim().parse().with_context(|| format!("Invalid HEALTHNET_SERVER_IP: {ip}"))?);
        }
        if let Some(port) = lookup("HEALTHNET_SERVER_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid HEALTHNET_SERVER_PORT: {port}"))?;
        }
        if let Some(https) = lookup("HEALTHNET_SERVER_HTTPS") {
            self.server.https = https.eq_ignore_ascii_case("true");
        }
        if let Some(name) = lookup("HEALTHNET_CLIENT_NAME") {
            if name.trim().is_empty() {
                bail!("HEALTHNET_CLIENT_NAME must not be empty");
            }
            self.client.name = name;
        }
        if let Some(interval) = lookup("HEALTHNET_MESSAGE_INTERVAL") {
            self.client.interval_secs = interval
                .trim()
                .parse()
                .with_context(|| format!("Invalid HEALTHNET_MESSAGE_INTERVAL: {interval}"))?;
        }
        if self.client.interval_secs == 0 {
            bail!("heartbeat interval must be greater than 0");
        }
        Ok(())
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("healthnet-agent");
        path.push("config.toml");
        Ok(path)
    }
}
