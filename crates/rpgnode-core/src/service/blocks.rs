use bitcoin::{Block, BlockHash, Transaction, Txid};

use crate::error::CoreError;
use crate::rpc::types::{VerboseBlock, VerboseTransaction};
use crate::types::{
    BlockHeader, BlockOverview, BlockRef, DetailedInput, DetailedOutput, DetailedTransaction,
    ServiceInfo, SpentInfo,
};

use super::NodeService;

fn header_from_verbose(block: &VerboseBlock) -> BlockHeader {
    BlockHeader {
        hash: block.hash,
        version: block.version,
        confirmations: block.confirmations,
        height: block.height,
        chain_work: block.chain_work.clone(),
        prev_hash: block.previous_block_hash,
        next_hash: block.next_block_hash,
        merkle_root: block.merkle_root.clone(),
        time: block.time,
        median_time: block.median_time,
        nonce: block.nonce,
        bits: block.bits.clone(),
        difficulty: block.difficulty,
    }
}

fn detailed_from_verbose(txid: Txid, tx: VerboseTransaction) -> DetailedTransaction {
    let coinbase = tx.vin.iter().any(|input| input.coinbase.is_some());

    let inputs: Vec<DetailedInput> = tx
        .vin
        .into_iter()
        .map(|input| {
            let (script, script_asm) = match input.script_sig {
                Some(pair) => (Some(pair.hex), pair.asm),
                None => (None, None),
            };
            DetailedInput {
                prev_tx_id: input.txid,
                output_index: input.vout,
                script,
                script_asm,
                sequence: input.sequence,
                address: input.address,
                satoshis: input.value_sat,
            }
        })
        .collect();

    let outputs: Vec<DetailedOutput> = tx
        .vout
        .into_iter()
        .map(|output| {
            let mut addresses = output.script_pub_key.addresses;
            let address = if addresses.len() == 1 { addresses.pop() } else { None };
            DetailedOutput {
                satoshis: output.value_sat,
                script: output.script_pub_key.hex,
                script_asm: output.script_pub_key.asm,
                address,
                spent_tx_id: output.spent_tx_id,
                spent_index: output.spent_index,
                spent_height: output.spent_height,
            }
        })
        .collect();

    let input_satoshis: i64 = inputs.iter().filter_map(|input| input.satoshis).sum();
    let output_satoshis: i64 = outputs.iter().map(|output| output.satoshis).sum();
    let fee_satoshis = if coinbase { 0 } else { input_satoshis - output_satoshis };

    DetailedTransaction {
        hash: txid,
        hex: tx.hex,
        block_hash: tx.block_hash,
        height: tx.height.unwrap_or(-1),
        block_timestamp: tx.time,
        version: tx.version,
        locktime: tx.locktime,
        coinbase,
        input_satoshis,
        output_satoshis,
        fee_satoshis,
        inputs,
        outputs,
    }
}

impl NodeService {
    // ==========================================================================
    // Blocks
    // ==========================================================================

    /// Resolve a height to its block hash. Hashes pass through.
    pub async fn maybe_get_block_hash(&self, block: &BlockRef) -> Result<BlockHash, CoreError> {
        match *block {
            BlockRef::Hash(hash) => Ok(hash),
            BlockRef::Height(height) => {
                self.pool
                    .try_all(|client| async move { client.get_block_hash(height).await })
                    .await
            }
        }
    }

    pub async fn get_raw_block(&self, block: &BlockRef) -> Result<Vec<u8>, CoreError> {
        let hash = self.maybe_get_block_hash(block).await?;
        self.raw_block_by_hash(hash).await
    }

    pub async fn get_block(&self, block: &BlockRef) -> Result<Block, CoreError> {
        let hash = self.maybe_get_block_hash(block).await?;
        if let Some(block) = self.caches.block.get(&hash).await {
            return Ok(block);
        }
        let raw = self.raw_block_by_hash(hash).await?;
        let decoded: Block = bitcoin::consensus::deserialize(&raw)
            .map_err(|e| CoreError::InvalidData(format!("block {hash} does not decode: {e}")))?;
        self.caches.block.put(hash, decoded.clone()).await;
        Ok(decoded)
    }

    pub async fn get_block_header(&self, block: &BlockRef) -> Result<BlockHeader, CoreError> {
        let hash = self.maybe_get_block_hash(block).await?;
        if let Some(header) = self.caches.block_header.get(&hash).await {
            return Ok(header);
        }
        let verbose = self
            .pool
            .try_all(|client| async move { client.get_block_header(&hash).await })
            .await?;
        let header = header_from_verbose(&verbose);
        self.caches.block_header.put(hash, header.clone()).await;
        Ok(header)
    }

    /// Header fields plus the block's txids.
    pub async fn get_block_overview(&self, block: &BlockRef) -> Result<BlockOverview, CoreError> {
        let hash = self.maybe_get_block_hash(block).await?;
        if let Some(overview) = self.caches.block_overview.get(&hash).await {
            return Ok(overview);
        }
        let verbose = self
            .pool
            .try_all(|client| async move { client.get_block(&hash).await })
            .await?;
        let overview = BlockOverview {
            header: header_from_verbose(&verbose),
            txids: verbose.tx,
        };
        self.caches.block_overview.put(hash, overview.clone()).await;
        Ok(overview)
    }

    /// Hashes of blocks with timestamps between `low` and `high`.
    pub async fn get_block_hashes_by_timestamp(
        &self,
        high: u64,
        low: u64,
    ) -> Result<Vec<BlockHash>, CoreError> {
        self.pool
            .try_all(|client| async move { client.get_block_hashes(high, low).await })
            .await
    }

    async fn raw_block_by_hash(&self, hash: BlockHash) -> Result<Vec<u8>, CoreError> {
        if let Some(raw) = self.caches.raw_block.get(&hash).await {
            return Ok(raw);
        }
        let raw = self
            .pool
            .try_all(|client| async move { client.get_raw_block(&hash).await })
            .await?;
        self.caches.raw_block.put(hash, raw.clone()).await;
        Ok(raw)
    }

    // ==========================================================================
    // Transactions
    // ==========================================================================

    pub async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, CoreError> {
        if let Some(raw) = self.caches.raw_transaction.get(txid).await {
            return Ok(raw);
        }
        let raw = self
            .pool
            .try_all(|client| async move { client.get_raw_transaction(txid).await })
            .await?;
        self.caches.raw_transaction.put(*txid, raw.clone()).await;
        Ok(raw)
    }

    pub async fn get_transaction(&self, txid: &Txid) -> Result<Transaction, CoreError> {
        if let Some(tx) = self.caches.transaction.get(txid).await {
            return Ok(tx);
        }
        let raw = self.get_raw_transaction(txid).await?;
        let tx: Transaction = bitcoin::consensus::deserialize(&raw)
            .map_err(|e| CoreError::InvalidData(format!("transaction {txid} does not decode: {e}")))?;
        self.caches.transaction.put(*txid, tx.clone()).await;
        Ok(tx)
    }

    /// The transaction with input values, addresses and spent-output data
    /// from the daemon's indexes.
    pub async fn get_detailed_transaction(&self, txid: &Txid) -> Result<DetailedTransaction, CoreError> {
        if let Some(tx) = self.caches.transaction_detailed.get(txid).await {
            return Ok(tx);
        }
        let verbose = self
            .pool
            .try_all(|client| async move { client.get_raw_transaction_verbose(txid).await })
            .await?;
        let detailed = detailed_from_verbose(*txid, verbose);
        self.caches
            .transaction_detailed
            .put(*txid, detailed.clone())
            .await;
        Ok(detailed)
    }

    pub async fn send_transaction(
        &self,
        tx_hex: &str,
        allow_absurd_fees: bool,
    ) -> Result<Txid, CoreError> {
        self.pool
            .try_all(|client| async move { client.send_raw_transaction(tx_hex, allow_absurd_fees).await })
            .await
    }

    // ==========================================================================
    // Node
    // ==========================================================================

    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64, CoreError> {
        self.pool
            .try_all(|client| async move { client.estimate_fee(blocks).await })
            .await
    }

    pub async fn get_best_block_hash(&self) -> Result<BlockHash, CoreError> {
        self.pool
            .try_all(|client| async move { client.get_best_block_hash().await })
            .await
    }

    /// Where `txid:index` was spent. Unknown outputs yield an empty record.
    pub async fn get_spent_info(&self, txid: &Txid, index: u32) -> Result<SpentInfo, CoreError> {
        let found = self
            .pool
            .try_all(|client| async move { client.get_spent_info(txid, index).await })
            .await;
        match found {
            Ok(info) => Ok(SpentInfo {
                txid: Some(info.txid),
                index: Some(info.index),
                height: info.height,
            }),
            Err(e) if e.is_not_found() => Ok(SpentInfo::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_info(&self) -> Result<ServiceInfo, CoreError> {
        let (info, network_info) = self
            .pool
            .try_all(|client| async move {
                let info = client.get_info().await?;
                let network_info = client.get_network_info().await?;
                Ok((info, network_info))
            })
            .await?;
        Ok(ServiceInfo {
            version: info.version,
            protocol_version: info.protocol_version,
            blocks: info.blocks,
            time_offset: info.time_offset,
            connections: info.connections,
            proxy: info.proxy,
            difficulty: info.difficulty,
            testnet: info.testnet,
            relay_fee: info.relay_fee,
            errors: info.errors,
            network: self.config.network.name().to_owned(),
            subversion: network_info.subversion,
            local_services: network_info.local_services,
        })
    }

    /// Mine `blocks` blocks on a regtest daemon.
    pub async fn generate_block(&self, blocks: u32) -> Result<Vec<BlockHash>, CoreError> {
        self.pool
            .try_all(|client| async move { client.generate(blocks).await })
            .await
    }
}
