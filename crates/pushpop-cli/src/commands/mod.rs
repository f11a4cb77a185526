//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod config;
pub mod pop;
pub mod push;
pub mod scan;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> pushpop_core::config::Config {
    match pushpop_core::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring configuration file: {}", e);
            pushpop_core::config::Config::default()
        }
    }
}

/// PushPop - resumable file transfer on the local network
#[derive(Parser)]
#[command(name = "pushpop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Announce a file and serve it until interrupted
    Push(PushArgs),

    /// Pull the file a user is offering
    Pop(PopArgs),

    /// List the files currently offered on the network
    Scan(ScanArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

/// Arguments for the push command
#[derive(Parser)]
pub struct PushArgs {
    /// File to offer
    pub file: PathBuf,

    /// User name to advertise (defaults to the configured user)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Arguments for the pop command
#[derive(Parser)]
pub struct PopArgs {
    /// User whose offer to pull (defaults to the configured user)
    pub user: Option<String>,

    /// Overwrite existing files without asking
    #[arg(short, long)]
    pub force: bool,

    /// Never prompt; existing files abort the transfer unless --force
    #[arg(short, long)]
    pub batch: bool,

    /// Directory to save the file in
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// How long to look for the offer (e.g., 10s)
    #[arg(short, long)]
    pub timeout: Option<String>,
}

/// Arguments for the scan command
#[derive(Parser)]
pub struct ScanArgs {
    /// Duration to scan (e.g., 5s, 10s)
    #[arg(short, long, default_value = "5s")]
    pub duration: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_pop_flags() {
        let cli = Cli::parse_from(["pushpop", "pop", "alice", "--force", "--batch", "-o", "/tmp"]);
        let Command::Pop(args) = cli.command else {
            panic!("expected pop");
        };
        assert_eq!(args.user.as_deref(), Some("alice"));
        assert!(args.force);
        assert!(args.batch);
        assert_eq!(args.output, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_pop_user_is_optional() {
        let cli = Cli::parse_from(["pushpop", "-v", "pop"]);
        assert!(cli.verbose);
        let Command::Pop(args) = cli.command else {
            panic!("expected pop");
        };
        assert!(args.user.is_none());
    }
}
