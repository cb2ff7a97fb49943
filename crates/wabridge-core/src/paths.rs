use anyhow::Result;
use std::path::PathBuf;

const WABRIDGE_DIR: &str = ".wabridge";
const CONFIG_FILE: &str = "config.toml";
const AUTH_DIR: &str = "auth";
const CREDENTIALS_FILE: &str = "creds.json";
const LOGS_DIR: &str = "logs";

/// Environment variable to override the bridge directory.
const WABRIDGE_DIR_ENV: &str = "WABRIDGE_DIR";

/// Resolve the bridge state directory.
/// Priority: WABRIDGE_DIR env var > ~/.wabridge/
pub fn resolve_wabridge_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(WABRIDGE_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(WABRIDGE_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the bridge directory exists and return its path.
pub fn ensure_wabridge_dir() -> Result<PathBuf> {
    let dir = resolve_wabridge_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the config file path: ~/.wabridge/config.toml
pub fn config_path() -> Result<PathBuf> {
    Ok(resolve_wabridge_dir()?.join(CONFIG_FILE))
}

/// Get the credential file path: ~/.wabridge/auth/creds.json
pub fn credentials_path() -> Result<PathBuf> {
    Ok(resolve_wabridge_dir()?.join(AUTH_DIR).join(CREDENTIALS_FILE))
}

/// Get the logs directory: ~/.wabridge/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = ensure_wabridge_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
