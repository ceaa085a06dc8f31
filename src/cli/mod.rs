//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for peerchat.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "peerchat")]
#[command(about = "Peer-to-peer chat client")]
#[command(long_about = "A peer-to-peer session client that negotiates chats over a signaling server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "peerchat.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Connect to the signaling server and chat interactively
    Run {
        /// Override the configured signaling server URL
        #[arg(long)]
        server: Option<String>,

        /// Override the configured access token
        #[arg(long)]
        token: Option<String>,

        /// Extra remote ids to allow (repeatable)
        #[arg(long = "allow")]
        allow: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Two in-process clients chatting over the loopback transport
    Demo,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run {
            server: None,
            token: None,
            allow: Vec::new(),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the actual command, using default if none provided
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Adjust log level based on verbose flag
    pub fn effective_log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::parse_from(["peerchat"]);
        assert!(matches!(cli.command(), Commands::Run { .. }));
        assert_eq!(cli.config_file, "peerchat.toml");
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "peerchat",
            "-v",
            "run",
            "--server",
            "ws://example.org/signaling",
            "--allow",
            "bob",
            "--allow",
            "carol",
        ]);
        assert_eq!(cli.effective_log_level(), "debug");
        match cli.command() {
            Commands::Run { server, allow, .. } => {
                assert_eq!(server.as_deref(), Some("ws://example.org/signaling"));
                assert_eq!(allow, vec!["bob".to_string(), "carol".to_string()]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_config_subcommand() {
        let cli = Cli::parse_from(["peerchat", "config", "reset"]);
        assert!(matches!(
            cli.command(),
            Commands::Config {
                action: Some(ConfigAction::Reset)
            }
        ));
    }
}
