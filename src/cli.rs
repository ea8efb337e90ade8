use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::config::DeviceKind;

/// Hardware wallet CLI (library-facing definitions)
#[derive(Debug, Parser)]
#[command(name = "hw_wallet", about = "Ethereum accounts and signing on Ledger / Trezor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (defaults to $CONFIG_PATH or config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Device family, overrides the configuration
    #[arg(long, value_enum, global = true)]
    pub device: Option<DeviceKind>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the addresses of the configured derivation window
    Accounts {
        /// Derivation path template, e.g. 44'/60'/0'/0
        #[arg(long)]
        path: Option<String>,
        /// Number of accounts to derive
        #[arg(long)]
        count: Option<u32>,
        /// Show each address on the device
        #[arg(long)]
        confirm: bool,
    },
    /// Sign a transaction given as web3-style JSON
    Sign {
        /// JSON file, `-` for stdin
        #[arg(long)]
        tx: PathBuf,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        count: Option<u32>,
        /// Sign for this chain id instead of asking the RPC endpoint
        #[arg(long)]
        chain_id: Option<u64>,
    },
    /// Show the device application name and version
    AppConfig,
}
