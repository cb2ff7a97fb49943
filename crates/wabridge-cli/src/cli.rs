use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "wabridge")]
#[command(version, about = "wabridge - WhatsApp to backend messaging bridge")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path (defaults to ~/.wabridge/config.toml)
    #[arg(long, global = true, env = "WABRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to daily-rotated files (defaults to ~/.wabridge/logs)
    #[arg(long, global = true, num_args = 0..=1, value_name = "DIR")]
    pub log_dir: Option<Option<PathBuf>>,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge (default)
    Run,

    /// Check the backend health endpoint
    Health,

    /// Print the effective configuration
    Config,
}

/// Flags that take precedence over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Backend base URL
    #[arg(long, global = true, env = "WABRIDGE_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Transport gateway WebSocket URL
    #[arg(long, global = true, env = "WABRIDGE_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Credential file path
    #[arg(long = "credentials", global = true, env = "WABRIDGE_CREDENTIALS")]
    pub credentials_path: Option<PathBuf>,

    /// Per-attempt backend timeout in seconds
    #[arg(long, global = true, env = "WABRIDGE_BACKEND_TIMEOUT_SECS")]
    pub backend_timeout_secs: Option<u64>,

    /// Backend attempts per message
    #[arg(long, global = true, env = "WABRIDGE_MAX_FORWARD_ATTEMPTS")]
    pub max_forward_attempts: Option<u32>,

    /// Reconnects allowed before giving up
    #[arg(long, global = true, env = "WABRIDGE_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,

    /// Seconds to wait before each reconnect
    #[arg(long, global = true, env = "WABRIDGE_RECONNECT_INTERVAL_SECS")]
    pub reconnect_interval_secs: Option<u64>,

    /// Don't send composing/paused presence around replies
    #[arg(long, global = true)]
    pub no_presence: bool,
}
