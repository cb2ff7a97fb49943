use anyhow::Result;
use colored::Colorize;
use wabridge_core::BridgeConfig;

/// Print the effective configuration as TOML. Invalid values are shown, not rejected.
pub fn run(mut config: BridgeConfig) -> Result<i32> {
    if config.credentials_path.is_none() {
        config.credentials_path = Some(config.resolved_credentials_path()?);
    }

    print!("{}", toml::to_string_pretty(&config)?);

    if let Err(e) = config.validate() {
        eprintln!("\n{} {}", "Warning:".yellow().bold(), e);
    }
    Ok(0)
}
