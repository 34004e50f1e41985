//! Per-network constants for the rpgd chain: RPC ports, data directory
//! layout, daemon command-line flags and base58 address versions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainNetwork {
    #[default]
    #[serde(alias = "mainnet")]
    Livenet,
    Testnet,
    Regtest,
}

impl ChainNetwork {
    pub fn name(self) -> &'static str {
        match self {
            Self::Livenet => "livenet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    pub fn default_rpc_port(self) -> u16 {
        match self {
            Self::Livenet => 7210,
            Self::Testnet | Self::Regtest => 17210,
        }
    }

    /// Subdirectory of the datadir the daemon uses for this network.
    /// Mainnet lives directly in the datadir.
    pub fn data_subdir(self) -> Option<&'static str> {
        match self {
            Self::Livenet => None,
            Self::Testnet => Some("testnet3"),
            Self::Regtest => Some("regtest"),
        }
    }

    /// Flag passed to the daemon binary to select this network.
    pub fn cli_flag(self) -> Option<&'static str> {
        match self {
            Self::Livenet => None,
            Self::Testnet => Some("--testnet"),
            Self::Regtest => Some("--regtest"),
        }
    }

    pub fn pubkey_hash_version(self) -> u8 {
        match self {
            Self::Livenet => 60,
            Self::Testnet | Self::Regtest => 111,
        }
    }

    pub fn script_hash_version(self) -> u8 {
        match self {
            Self::Livenet => 122,
            Self::Testnet | Self::Regtest => 196,
        }
    }

    /// Map the `chain` field of `getblockchaininfo` to a network.
    pub fn from_chain_name(chain: &str) -> Option<Self> {
        match chain {
            "main" | "livenet" | "mainnet" => Some(Self::Livenet),
            "test" | "testnet" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }
}

impl fmt::Display for ChainNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChainNetwork {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_chain_name(s)
            .ok_or_else(|| CoreError::Config(format!("unknown network `{s}`")))
    }
}
