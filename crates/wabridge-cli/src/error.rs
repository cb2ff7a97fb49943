use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = format!("{:#}", err).to_lowercase();

    if msg.contains("invalid config") || msg.contains("invalid configuration") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Inspect the effective configuration with:");
        eprintln!("  {} wabridge config", "$".dimmed());
    }

    if msg.contains("corrupt credentials") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Remove the credential file and pair the device again.");
    }

    if msg.contains("connection refused") || msg.contains("error sending request") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check that the backend is running and reachable, or set:");
        eprintln!("  {} wabridge run --backend-url <url>", "$".dimmed());
    }

    std::process::exit(1);
}
