//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CliOverrides;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Data directory for identity and chat history
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Bluetooth adapter index
    #[arg(long)]
    pub adapter: Option<usize>,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_file: self.config.clone(),
            data_dir: self.data_dir.clone(),
            verbose: self.verbose.then_some(true),
            adapter_index: self.adapter,
        }
    }

    /// Whether the command needs the Bluetooth radio
    pub fn needs_radio(&self) -> bool {
        matches!(
            self.command,
            Commands::Host | Commands::Scan { .. } | Commands::Chat { .. }
        )
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show this installation's identity
    Identity,
    /// Advertise and accept messages until interrupted
    Host,
    /// List nearby BlueChat peers
    Scan {
        /// Seconds to scan; the configured scan timeout by default
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Connect to a peer and chat interactively
    Chat {
        /// Peer identity (8 hex characters or full identifier)
        peer: String,
    },
    /// List known peers
    Peers,
    /// Show messages exchanged with a peer
    History {
        /// Peer identity (8 hex characters or full identifier)
        peer: String,
    },
    /// Forget a known peer
    Forget {
        /// Peer identity (8 hex characters or full identifier)
        peer: String,
    },
    /// Delete all chat messages
    Clear,
    /// Print an example configuration file
    ExampleConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::parse_from(["bluechat", "-v", "chat", "1a2b3c4d"]);
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Commands::Chat {
                peer: "1a2b3c4d".to_string()
            }
        );
        assert!(cli.needs_radio());

        let cli = Cli::parse_from(["bluechat", "--data-dir", "/tmp/x", "history", "1a2b3c4d"]);
        assert!(!cli.needs_radio());
        let overrides = cli.overrides();
        assert_eq!(overrides.data_dir, Some(PathBuf::from("/tmp/x")));
        assert_eq!(overrides.verbose, None);

        let cli = Cli::parse_from(["bluechat", "scan", "--timeout", "3"]);
        assert_eq!(cli.command, Commands::Scan { timeout: Some(3) });
    }
}
