//! Command-line interface for nicfw
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// nicfw - NIC firmware installation automation
#[derive(Parser)]
#[command(name = "nicfw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (defaults to ./nicfw.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Force debug logging
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Install firmware with pre/post health checks and automatic recovery
    Install {
        /// Firmware image (looked up in firmware_path when not found as given)
        firmware: PathBuf,

        /// Back up current firmware information before installing (default)
        #[arg(long, overrides_with = "no_backup")]
        backup: bool,

        /// Skip the firmware backup
        #[arg(long, overrides_with = "backup")]
        no_backup: bool,
    },

    /// Run NIC health checks
    Health {
        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Watch mode - repeat the checks until interrupted
        #[arg(short, long)]
        watch: bool,

        /// Seconds between passes in watch mode (defaults to health_check_interval)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Handle one failure scenario: diagnostics, techsupport and its recipe
    Recover {
        /// Failure type (e.g. interrupt_storm, core_dump)
        failure_type: String,
    },

    /// Execute a recovery recipe directly
    Recipe {
        /// Recipe id (e.g. network_recovery)
        recipe: String,
    },

    /// Capture diagnostics and build a techsupport bundle
    Debug {
        /// Also write the captured diagnostics to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List failure scenarios and their recipes
    Scenarios {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show configuration, recent runs and a quick health snapshot
    Status,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "nicfw", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_backup_flags() {
        let cli = Cli::try_parse_from(["nicfw", "install", "fw.bin"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Install { backup: false, no_backup: false, .. }
        ));

        let cli = Cli::try_parse_from(["nicfw", "install", "fw.bin", "--no-backup"]).unwrap();
        assert!(matches!(cli.command, Commands::Install { no_backup: true, .. }));

        // Last flag wins
        let cli = Cli::try_parse_from(["nicfw", "install", "fw.bin", "--no-backup", "--backup"]).unwrap();
        assert!(matches!(cli.command, Commands::Install { backup: true, no_backup: false, .. }));
    }

    #[test]
    fn test_global_options() {
        let cli = Cli::try_parse_from(["nicfw", "-c", "lab.toml", "--debug", "health", "--json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("lab.toml")));
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Health { json: true, watch: false, interval: None }));
    }

    #[test]
    fn test_recover_requires_failure_type() {
        assert!(Cli::try_parse_from(["nicfw", "recover"]).is_err());
    }
}
