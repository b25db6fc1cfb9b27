//! Marquee CLI - Command-line interface
//!
//! Provides command-line access to provider management and link resolution.

mod commands;
mod demo;

use std::path::PathBuf;

use clap::Parser;
use marquee_core::config::MarqueeConfig;
use marquee_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "marquee")]
#[command(about = "Provider plugins and media link resolution")]
struct Cli {
    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Root directory holding installed providers
    #[arg(long, global = true)]
    providers_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None)?;

    let result = match MarqueeConfig::from_env() {
        Ok(mut config) => {
            if let Some(dir) = cli.providers_dir {
                config.storage.providers_root = dir;
            }
            commands::handle_command(cli.command, config).await
        }
        Err(error) => Err(error),
    };

    if let Err(error) = result {
        tracing::debug!("Command failed: {}", error);
        eprintln!("Error: {}", error.user_message());
        std::process::exit(if error.is_user_error() { 2 } else { 1 });
    }

    Ok(())
}
