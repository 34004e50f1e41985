//! RPC result shapes that stay inside the RPC layer or are reshaped by the
//! query facade before reaching callers.
//!
//! Address index records decode directly into the domain structs in
//! `crate::types`; this module only covers the verbose block, transaction
//! and status payloads.

use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Deserializer};

// ==============================================================================
// Chain Info
// ==============================================================================

/// Result of `getblockchaininfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
    /// Fraction of the chain verified, `0.0..=1.0`. Some daemon builds
    /// report it as a string.
    #[serde(rename = "verificationprogress", deserialize_with = "lenient_f64")]
    pub verification_progress: f64,
}

// ==============================================================================
// Blocks
// ==============================================================================

/// Result of `getblock <hash> true` and `getblockheader <hash> true`.
/// Header calls leave `tx` empty.
#[derive(Debug, Clone, Deserialize)]
pub struct VerboseBlock {
    pub hash: BlockHash,
    pub version: i32,
    pub confirmations: i64,
    pub height: u32,
    #[serde(rename = "chainwork", default)]
    pub chain_work: String,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: Option<BlockHash>,
    #[serde(rename = "nextblockhash")]
    pub next_block_hash: Option<BlockHash>,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: u64,
    #[serde(rename = "mediantime", default)]
    pub median_time: u64,
    pub nonce: u64,
    pub bits: String,
    pub difficulty: f64,
    #[serde(default)]
    pub tx: Vec<Txid>,
}

// ==============================================================================
// Transactions
// ==============================================================================

/// Result of `getrawtransaction <txid> 1` on a daemon with the address and
/// spent indexes enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct VerboseTransaction {
    pub hex: String,
    #[serde(rename = "blockhash")]
    pub block_hash: Option<BlockHash>,
    pub height: Option<i64>,
    pub time: Option<u64>,
    pub version: i32,
    pub locktime: u32,
    pub vin: Vec<VerboseInput>,
    pub vout: Vec<VerboseOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerboseInput {
    pub coinbase: Option<String>,
    pub txid: Option<Txid>,
    pub vout: Option<u32>,
    #[serde(rename = "scriptSig")]
    pub script_sig: Option<ScriptPair>,
    #[serde(default = "final_sequence")]
    pub sequence: u32,
    pub address: Option<String>,
    #[serde(rename = "valueSat")]
    pub value_sat: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerboseOutput {
    #[serde(rename = "valueSat")]
    pub value_sat: i64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
    #[serde(rename = "spentTxId")]
    pub spent_tx_id: Option<Txid>,
    #[serde(rename = "spentIndex")]
    pub spent_index: Option<u32>,
    #[serde(rename = "spentHeight")]
    pub spent_height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPair {
    pub hex: String,
    pub asm: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPubKey {
    pub hex: String,
    pub asm: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

fn final_sequence() -> u32 {
    u32::MAX
}

/// Result of `getspentinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct SpentInfoResult {
    pub txid: Txid,
    pub index: u32,
    pub height: Option<u32>,
}

// ==============================================================================
// Node Status
// ==============================================================================

/// Result of `getinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct InfoResult {
    pub version: i64,
    #[serde(rename = "protocolversion")]
    pub protocol_version: i64,
    pub blocks: u64,
    #[serde(rename = "timeoffset")]
    pub time_offset: i64,
    pub connections: u32,
    #[serde(default)]
    pub proxy: String,
    pub difficulty: f64,
    #[serde(default)]
    pub testnet: bool,
    #[serde(rename = "relayfee")]
    pub relay_fee: f64,
    #[serde(default)]
    pub errors: String,
}

/// The subset of `getnetworkinfo` merged into service info.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfoResult {
    pub subversion: String,
    #[serde(rename = "localservices")]
    pub local_services: String,
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_progress_accepts_string() {
        let info: BlockchainInfo = serde_json::from_value(serde_json::json!({
            "chain": "test",
            "blocks": 10,
            "bestblockhash": "00000000050a6d07f583beba2d803296eb1e9d4980c4a20f206c584e89a4f02b",
            "verificationprogress": "0.983821387"
        }))
        .expect("string progress must decode");
        assert!((info.verification_progress - 0.983821387).abs() < 1e-12);
    }

    #[test]
    fn verbose_input_defaults_sequence_for_missing_field() {
        let input: VerboseInput =
            serde_json::from_value(serde_json::json!({ "coinbase": "abcdef" }))
                .expect("coinbase input must decode");
        assert_eq!(input.sequence, u32::MAX);
        assert!(input.txid.is_none());
    }
}
