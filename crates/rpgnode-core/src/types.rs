//! Domain types shared by the RPC layer and the query facade.
//!
//! Daemon index payloads (`AddressUtxo`, `MempoolDelta`, `AddressBalance`) are
//! decoded straight into these structs, so their serde names follow the
//! daemon's camelCase JSON.

use std::collections::BTreeMap;

use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ==============================================================================
// Address Index Records
// ==============================================================================

/// An unspent output paying one of the queried addresses.
///
/// Confirmed entries carry `height`; entries reconciled in from the mempool
/// carry `timestamp` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxo {
    pub address: String,
    pub txid: Txid,
    pub output_index: u32,
    /// Locking script, hex encoded.
    pub script: String,
    pub satoshis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// A pending transaction's effect on one address, as reported by
/// `getaddressmempool`.
///
/// A delta that carries `prevtxid`/`prevout` spends that outpoint. One
/// without them is a candidate new output at `(txid, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolDelta {
    pub address: String,
    pub txid: Txid,
    pub index: u32,
    pub satoshis: i64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevtxid: Option<Txid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl MempoolDelta {
    /// The outpoint this delta spends, if it is a spend.
    pub fn spent_outpoint(&self) -> Option<(Txid, u32)> {
        match (self.prevtxid, self.prevout) {
            (Some(txid), Some(vout)) => Some((txid, vout)),
            _ => None,
        }
    }
}

/// Confirmed balance totals from `getaddressbalance`, in satoshis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub balance: i64,
    pub received: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSummary {
    pub total_received: i64,
    pub total_spent: i64,
    pub balance: i64,
    pub appearances: usize,
    pub unconfirmed_balance: i64,
    pub unconfirmed_appearances: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txids: Option<Vec<Txid>>,
}

/// Which inputs and outputs of a transaction touch one address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressIndexes {
    pub input_indexes: Vec<u32>,
    pub output_indexes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub addresses: BTreeMap<String, AddressIndexes>,
    /// Net effect on the queried addresses: their outputs minus their inputs.
    pub satoshis: i64,
    pub confirmations: u32,
    pub tx: DetailedTransaction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressHistory {
    pub total_count: usize,
    pub items: Vec<HistoryItem>,
}

// ==============================================================================
// Transactions
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedTransaction {
    pub hash: Txid,
    pub hex: String,
    pub block_hash: Option<BlockHash>,
    /// `-1` while the transaction is unconfirmed.
    pub height: i64,
    pub block_timestamp: Option<u64>,
    pub version: i32,
    pub locktime: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub coinbase: bool,
    pub input_satoshis: i64,
    pub output_satoshis: i64,
    pub fee_satoshis: i64,
    pub inputs: Vec<DetailedInput>,
    pub outputs: Vec<DetailedOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedInput {
    pub prev_tx_id: Option<Txid>,
    pub output_index: Option<u32>,
    pub script: Option<String>,
    pub script_asm: Option<String>,
    pub sequence: u32,
    pub address: Option<String>,
    pub satoshis: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedOutput {
    pub satoshis: i64,
    pub script: String,
    pub script_asm: Option<String>,
    /// Set only when the script pays exactly one address.
    pub address: Option<String>,
    pub spent_tx_id: Option<Txid>,
    pub spent_index: Option<u32>,
    pub spent_height: Option<u32>,
}

/// Where an output was spent. Empty when the daemon has no record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentInfo {
    pub txid: Option<Txid>,
    pub index: Option<u32>,
    pub height: Option<u32>,
}

// ==============================================================================
// Blocks
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub hash: BlockHash,
    pub version: i32,
    pub confirmations: i64,
    pub height: u32,
    pub chain_work: String,
    pub prev_hash: Option<BlockHash>,
    pub next_hash: Option<BlockHash>,
    pub merkle_root: String,
    pub time: u64,
    pub median_time: u64,
    pub nonce: u64,
    pub bits: String,
    pub difficulty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockOverview {
    #[serde(flatten)]
    pub header: BlockHeader,
    pub txids: Vec<Txid>,
}

/// Daemon status merged from `getinfo` and `getnetworkinfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub version: i64,
    pub protocol_version: i64,
    pub blocks: u64,
    pub time_offset: i64,
    pub connections: u32,
    pub proxy: String,
    pub difficulty: f64,
    pub testnet: bool,
    pub relay_fee: f64,
    pub errors: String,
    pub network: String,
    pub subversion: String,
    pub local_services: String,
}

// ==============================================================================
// Query Options
// ==============================================================================

/// A block hash given directly, or a height to resolve through the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    Hash(BlockHash),
    Height(u32),
}

impl BlockRef {
    /// Interpret user input: all-digit strings are heights, anything else
    /// must be a block hash.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
            return input
                .parse()
                .map(Self::Height)
                .map_err(|e| CoreError::InvalidArgument(format!("invalid height `{input}`: {e}")));
        }
        input
            .parse()
            .map(Self::Hash)
            .map_err(|e| CoreError::InvalidArgument(format!("invalid block hash `{input}`: {e}")))
    }
}

impl From<BlockHash> for BlockRef {
    fn from(hash: BlockHash) -> Self {
        Self::Hash(hash)
    }
}

impl From<u32> for BlockRef {
    fn from(height: u32) -> Self {
        Self::Height(height)
    }
}

/// A pagination bound, accepted as a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageBound {
    Index(usize),
    Text(String),
}

impl PageBound {
    pub fn resolve(&self, name: &str) -> Result<usize, CoreError> {
        match self {
            Self::Index(index) => Ok(*index),
            Self::Text(text) => text.trim().parse().map_err(|_| {
                CoreError::InvalidArgument(format!("\"{name}\" ({text}) is expected to be a number"))
            }),
        }
    }
}

impl From<usize> for PageBound {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for PageBound {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Options recognised by the address queries.
///
/// `start`/`end` are block height bounds; supplying both makes the call a
/// range query, which skips caches and mempool data. `from`/`to` paginate
/// txid lists and history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddressQueryOptions {
    /// Include unconfirmed mempool data. Defaults to `true`.
    pub query_mempool: bool,
    /// Return only mempool txids from `get_address_txids`.
    pub query_mempool_only: bool,
    pub start: Option<u32>,
    pub end: Option<u32>,
    pub from: Option<PageBound>,
    pub to: Option<PageBound>,
    /// Leave the txid list out of `get_address_summary`.
    pub no_tx_list: bool,
}

impl Default for AddressQueryOptions {
    fn default() -> Self {
        Self {
            query_mempool: true,
            query_mempool_only: false,
            start: None,
            end: None,
            from: None,
            to: None,
            no_tx_list: false,
        }
    }
}

/// Inclusive block height bounds for `getaddresstxids`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightRange {
    pub start: u32,
    pub end: u32,
}

impl AddressQueryOptions {
    /// The height range, if this is a range query. Only both bounds
    /// together make a range; `end` below `start` is rejected.
    pub fn height_range(&self) -> Result<Option<HeightRange>, CoreError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => {
                if end < start {
                    return Err(CoreError::InvalidArgument(format!(
                        "\"end\" ({end}) is expected to be greater than or equal to \"start\" ({start})"
                    )));
                }
                Ok(Some(HeightRange { start, end }))
            }
            _ => Ok(None),
        }
    }
}

/// Confirmations for a transaction mined at `tx_height` with the tip at
/// `tip_height`. Unconfirmed (`-1`) yields zero; a transaction above the tip
/// is clamped to zero.
pub fn confirmations(tip_height: u32, tx_height: i64) -> Option<u32> {
    if tx_height < 0 {
        return Some(0);
    }
    let count = i64::from(tip_height) - tx_height + 1;
    if count < 0 {
        return None;
    }
    u32::try_from(count).ok()
}
