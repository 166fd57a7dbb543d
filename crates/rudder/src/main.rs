use clap::Parser;
use eyre::Result;

use rudder::cli::{Cli, Commands, ConfigCommands};
use rudder::commands::{
    Command,
    config::{ConfigAction, ConfigCommand},
    replay::ReplayCommand,
};
use rudder_core::config::EngineConfig;
use rudder_core::utils::tracing::{default_log_dir, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let log_dir = if cli.log_stderr {
        None
    } else {
        cli.log_dir.clone().or_else(default_log_dir)
    };
    init_tracing(log_dir.as_deref())?;

    match cli.command {
        Commands::Replay {
            file,
            session,
            json,
        } => {
            let config = match &cli.config {
                Some(path) => EngineConfig::load_from(path)?,
                None => EngineConfig::load()?,
            };
            ReplayCommand {
                file,
                session,
                json,
                config,
            }
            .execute()
            .await
        }
        Commands::Config { action } => {
            let action = match action {
                ConfigCommands::Path => ConfigAction::Path,
                ConfigCommands::Show => ConfigAction::Show,
                ConfigCommands::Init { force } => ConfigAction::Init { force },
            };
            ConfigCommand {
                action,
                path: cli.config,
            }
            .execute()
            .await
        }
    }
}
