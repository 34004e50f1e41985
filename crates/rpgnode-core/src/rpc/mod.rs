//! Daemon RPC abstraction layer.
//!
//! Defines the [`DaemonRpc`] trait and provides an HTTP JSON-RPC
//! implementation ([`HttpRpcClient`]) plus a scripted test mock
//! (`mock::MockRpc`).

mod http_adapter;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use http_adapter::HttpRpcClient;
pub use types::{BlockchainInfo, VerboseBlock, VerboseTransaction};

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::types::{AddressBalance, AddressUtxo, HeightRange, MempoolDelta};

use self::types::{InfoResult, NetworkInfoResult, SpentInfoResult};

/// The daemon RPC methods this service relies on.
///
/// Implementations supply the transport through [`DaemonRpc::call`]; the
/// typed methods build parameters and decode results on top of it, so the
/// HTTP client and the test mock share one decoding path.
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// Issue one JSON-RPC call and return its `result` member.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError>;

    async fn get_best_block_hash(&self) -> Result<BlockHash, CoreError> {
        decode("getbestblockhash", self.call("getbestblockhash", Vec::new()).await?)
    }

    async fn get_block_hash(&self, height: u32) -> Result<BlockHash, CoreError> {
        decode("getblockhash", self.call("getblockhash", vec![json!(height)]).await?)
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<VerboseBlock, CoreError> {
        let raw = self
            .call("getblock", vec![json!(hash.to_string()), json!(true)])
            .await?;
        decode("getblock", raw)
    }

    /// Serialized block bytes (`getblock <hash> false`).
    async fn get_raw_block(&self, hash: &BlockHash) -> Result<Vec<u8>, CoreError> {
        let raw = self
            .call("getblock", vec![json!(hash.to_string()), json!(false)])
            .await?;
        decode_hex("getblock", raw)
    }

    async fn get_block_header(&self, hash: &BlockHash) -> Result<VerboseBlock, CoreError> {
        let raw = self
            .call("getblockheader", vec![json!(hash.to_string()), json!(true)])
            .await?;
        decode("getblockheader", raw)
    }

    /// Hashes of blocks with timestamps in `[low, high)`.
    async fn get_block_hashes(&self, high: u64, low: u64) -> Result<Vec<BlockHash>, CoreError> {
        let raw = self
            .call("getblockhashes", vec![json!(high), json!(low)])
            .await?;
        decode("getblockhashes", raw)
    }

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, CoreError> {
        decode("getblockchaininfo", self.call("getblockchaininfo", Vec::new()).await?)
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, CoreError> {
        let raw = self
            .call("getrawtransaction", vec![json!(txid.to_string()), json!(0)])
            .await?;
        decode_hex("getrawtransaction", raw)
    }

    async fn get_raw_transaction_verbose(
        &self,
        txid: &Txid,
    ) -> Result<VerboseTransaction, CoreError> {
        let raw = self
            .call("getrawtransaction", vec![json!(txid.to_string()), json!(1)])
            .await?;
        decode("getrawtransaction", raw)
    }

    async fn send_raw_transaction(
        &self,
        tx_hex: &str,
        allow_absurd_fees: bool,
    ) -> Result<Txid, CoreError> {
        let raw = self
            .call("sendrawtransaction", vec![json!(tx_hex), json!(allow_absurd_fees)])
            .await?;
        decode("sendrawtransaction", raw)
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<f64, CoreError> {
        decode("estimatefee", self.call("estimatefee", vec![json!(blocks)]).await?)
    }

    async fn generate(&self, blocks: u32) -> Result<Vec<BlockHash>, CoreError> {
        decode("generate", self.call("generate", vec![json!(blocks)]).await?)
    }

    async fn get_info(&self) -> Result<InfoResult, CoreError> {
        decode("getinfo", self.call("getinfo", Vec::new()).await?)
    }

    async fn get_network_info(&self) -> Result<NetworkInfoResult, CoreError> {
        decode("getnetworkinfo", self.call("getnetworkinfo", Vec::new()).await?)
    }

    async fn get_spent_info(&self, txid: &Txid, index: u32) -> Result<SpentInfoResult, CoreError> {
        let raw = self
            .call(
                "getspentinfo",
                vec![json!({ "txid": txid.to_string(), "index": index })],
            )
            .await?;
        decode("getspentinfo", raw)
    }

    async fn get_address_balance(&self, addresses: &[String]) -> Result<AddressBalance, CoreError> {
        let raw = self
            .call("getaddressbalance", vec![json!({ "addresses": addresses })])
            .await?;
        decode("getaddressbalance", raw)
    }

    async fn get_address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, CoreError> {
        let raw = self
            .call("getaddressutxos", vec![json!({ "addresses": addresses })])
            .await?;
        decode("getaddressutxos", raw)
    }

    /// Confirmed txids for the addresses, oldest first as the daemon
    /// returns them.
    async fn get_address_txids(
        &self,
        addresses: &[String],
        range: Option<HeightRange>,
    ) -> Result<Vec<Txid>, CoreError> {
        let params = match range {
            Some(HeightRange { start, end }) => {
                json!({ "addresses": addresses, "start": start, "end": end })
            }
            None => json!({ "addresses": addresses }),
        };
        let raw = self.call("getaddresstxids", vec![params]).await?;
        decode("getaddresstxids", raw)
    }

    async fn get_address_mempool(&self, addresses: &[String]) -> Result<Vec<MempoolDelta>, CoreError> {
        let raw = self
            .call("getaddressmempool", vec![json!({ "addresses": addresses })])
            .await?;
        decode("getaddressmempool", raw)
    }
}

fn decode<T: DeserializeOwned>(method: &str, raw: Value) -> Result<T, CoreError> {
    serde_json::from_value(raw)
        .map_err(|e| CoreError::InvalidData(format!("invalid {method} result: {e}")))
}

fn decode_hex(method: &str, raw: Value) -> Result<Vec<u8>, CoreError> {
    let text = raw
        .as_str()
        .ok_or_else(|| CoreError::InvalidData(format!("{method} result is not a hex string")))?;
    hex::decode(text).map_err(|e| CoreError::InvalidData(format!("invalid {method} hex: {e}")))
}
