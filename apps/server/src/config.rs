//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides,
//! following the same layering the playout-core tunables themselves use
//! (`EngineConfig::validate`).

use std::path::Path;

use anyhow::{Context, Result};
use playout_core::EngineConfig;
use serde::Deserialize;

/// One channel to auto-start at boot, useful for bring-up and integration
/// testing without a live RPC caller.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSpec {
    pub id: i32,
    pub plan: String,
    pub asset: String,
    // Mirrors the domain API's `start_channel(id, plan, port, uds?)` shape;
    // the engine itself has no transport-port concept, so this is parsed
    // and never forwarded, same as `StartChannelRequest::port` in api.rs.
    #[serde(default = "default_port")]
    #[allow(dead_code)]
    pub port: i32,
}

fn default_port() -> i32 {
    1
}

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP RPC adapter to.
    /// Override: `PLAYOUT_BIND_PORT`
    pub bind_port: u16,

    /// Log level, forwarded to `env_logger` unless overridden on the CLI.
    /// Override: `PLAYOUT_LOG_LEVEL`
    pub log_level: String,

    /// Tunables shared by every channel this process starts.
    pub engine: EngineConfig,

    /// Channels to start automatically at boot.
    pub channels: Vec<ChannelSpec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 8080,
            log_level: "info".to_string(),
            engine: EngineConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
            .engine
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid engine config: {e}"))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PLAYOUT_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("PLAYOUT_LOG_LEVEL") {
            self.log_level = val;
        }
    }
}
