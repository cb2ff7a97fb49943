//! Config file support
//!
//! Loads the bridge configuration from ~/.wabridge/config.toml, then lets
//! command-line flags win.

use anyhow::{Context, Result};
use std::path::Path;
use wabridge_core::BridgeConfig;
use wabridge_core::paths;

use crate::cli::OverrideArgs;

/// Load configuration from `path`, or the default location when `None`.
/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => paths::config_path()?,
    };
    load_from_path(&path)
}

fn load_from_path(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(BridgeConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    BridgeConfig::from_toml_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn apply_overrides(mut config: BridgeConfig, overrides: &OverrideArgs) -> BridgeConfig {
    if let Some(url) = &overrides.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(url) = &overrides.gateway_url {
        config.gateway_url = url.clone();
    }
    if let Some(path) = &overrides.credentials_path {
        config.credentials_path = Some(path.clone());
    }
    if let Some(secs) = overrides.backend_timeout_secs {
        config.backend_timeout_secs = secs;
    }
    if let Some(attempts) = overrides.max_forward_attempts {
        config.max_forward_attempts = attempts;
    }
    if let Some(attempts) = overrides.max_reconnect_attempts {
        config.max_reconnect_attempts = attempts;
    }
    if let Some(secs) = overrides.reconnect_interval_secs {
        config.reconnect_interval_secs = secs;
    }
    if overrides.no_presence {
        config.presence_signals = false;
    }
    config
}
