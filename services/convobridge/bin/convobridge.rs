//! Main entrypoint for the ConvoBridge terminal client
//!
//! This binary is responsible for:
//! 1. Parsing the command line.
//! 2. Loading configuration from the environment.
//! 3. Initializing logging on stderr so it stays out of the call transcript.
//! 4. Running a live call or listing audio devices.

use anyhow::Context;
use clap::Parser;
use convobridge_service::{
    audio::list_devices,
    cli::{Cli, CliCommand},
    config::{Config, load_dotenv, log_level_from_env},
    terminal::run_call,
};
use tracing::{Level, info};

fn init_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Devices => {
            load_dotenv();
            init_logging(log_level_from_env().context("Failed to load configuration")?);
            for device in list_devices()? {
                println!("{device}");
            }
        }
        CliCommand::Call(args) => {
            // --- 1. Load Configuration ---
            let config = Config::from_env().context("Failed to load configuration")?;

            // --- 2. Initialize Logging ---
            init_logging(config.log_level);
            info!(model = %config.gemini_model, "Configuration loaded. Starting call...");

            // --- 3. Run the call until the user quits ---
            run_call(config, args).await?;
            info!("Goodbye.");
        }
    }
    Ok(())
}
