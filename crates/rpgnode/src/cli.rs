use std::path::PathBuf;

use clap::Parser;

use rpgnode_core::ChainNetwork;

/// rpgnode: supervises rpgd daemons and serves address-indexed chain data.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to the JSON service configuration.
    #[arg(long, env = "RPGNODE_CONFIG")]
    pub config: PathBuf,

    /// Override the configured network (livenet, testnet or regtest).
    #[arg(long, env = "RPGNODE_NETWORK")]
    pub network: Option<ChainNetwork>,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}
