use anyhow::{Context, Result};
use colored::Colorize;
use wabridge_core::BridgeConfig;
use wabridge_core::runtime::HttpBackend;

pub async fn run(config: BridgeConfig) -> Result<i32> {
    config.validate().context("Invalid configuration")?;

    let backend = HttpBackend::new(&config)?;
    match backend.health().await {
        Ok(()) => {
            println!("{} Backend healthy ({})", "✓".green(), config.health_url());
            Ok(0)
        }
        Err(e) => {
            println!(
                "{} Backend unhealthy ({}): {}",
                "✗".red(),
                config.health_url(),
                e
            );
            Ok(1)
        }
    }
}
