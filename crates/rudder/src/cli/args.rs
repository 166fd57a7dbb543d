use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Offline driver for the Rudder session engine
#[derive(Parser)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// Directory for log files (defaults to the config directory)
    #[arg(long, env = "RUDDER_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log to stderr instead of a file
    #[arg(long)]
    pub log_stderr: bool,

    /// Path to the engine configuration file
    #[arg(long, env = "RUDDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Replay newline-delimited backend events and print the resulting conversation
    Replay {
        /// File of JSON events, one per line
        file: PathBuf,
        /// Session to replay (defaults to the session of the first event)
        #[arg(long)]
        session: Option<String>,
        /// Print the full session snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
