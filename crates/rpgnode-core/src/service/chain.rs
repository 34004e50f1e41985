use std::sync::Arc;

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction};
use tracing::{error, info, warn};

use crate::address::addresses_from_transaction;
use crate::error::CoreError;
use crate::events::ServiceEvent;
use crate::pool::Node;
use crate::zmq::{ZmqFeed, ZmqMessage, ZmqTopic};

use super::NodeService;

/// Sync percentage at or above which the chain counts as synced.
pub const SYNCED_PERCENTAGE: f64 = 99.9995;

/// Verification progress (`0.0..=1.0`) as a percentage rounded to four
/// decimal places.
pub(crate) fn progress_percentage(progress: f64) -> f64 {
    (progress * 100.0 * 10_000.0).round() / 10_000.0
}

/// ZMQ and `getbestblockhash` deliver hashes in display byte order.
fn block_hash_from_display_bytes(bytes: &[u8]) -> Option<BlockHash> {
    let mut array: [u8; 32] = bytes.try_into().ok()?;
    array.reverse();
    Some(BlockHash::from_byte_array(array))
}

fn display_bytes(hash: &BlockHash) -> Vec<u8> {
    let mut bytes = hash.to_byte_array().to_vec();
    bytes.reverse();
    bytes
}

impl NodeService {
    /// Read the best block height and keep the genesis block.
    pub async fn init_chain(&self) -> Result<(), CoreError> {
        let client = self.pool.current().await?;
        let best = client.get_best_block_hash().await?;
        let block = client.get_block(&best).await?;
        self.set_height(block.height);

        let genesis_hash = client.get_block_hash(0).await?;
        let genesis = client.get_raw_block(&genesis_hash).await?;
        if self.genesis.set(genesis).is_err() {
            warn!("genesis block already loaded");
        }

        info!(height = block.height, "daemon chain height");
        Ok(())
    }

    // ==========================================================================
    // Sync Status
    // ==========================================================================

    pub async fn sync_percentage(&self) -> Result<f64, CoreError> {
        let info = self
            .pool
            .try_all(|client| async move { client.get_blockchain_info().await })
            .await?;
        Ok(progress_percentage(info.verification_progress))
    }

    pub async fn is_synced(&self) -> Result<bool, CoreError> {
        Ok(self.sync_percentage().await? >= SYNCED_PERCENTAGE)
    }

    /// Poll the node until it reports full sync, driving tip updates for
    /// each best block seen, then subscribe to its ZMQ events.
    pub(crate) async fn check_synced_and_subscribe(self: &Arc<Self>, node: Arc<Node>) {
        let interval = self.config.timings.tip_update_interval;
        loop {
            if self.is_stopping() {
                return;
            }
            match self.poll_sync(&node).await {
                Ok(true) => {
                    if let Err(e) = self.subscribe_zmq_events(&node) {
                        error!(error = %e, "failed to subscribe to zmq events");
                        self.emit_error(e);
                    }
                    return;
                }
                Ok(false) => {}
                Err(e) => error!(error = %e, "failed to check daemon sync status"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn poll_sync(self: &Arc<Self>, node: &Arc<Node>) -> Result<bool, CoreError> {
        let client = node.client();
        let best = client.get_best_block_hash().await?;
        self.zmq_block_handler(node, display_bytes(&best));
        let info = client.get_blockchain_info().await?;
        Ok(progress_percentage(info.verification_progress) >= SYNCED_PERCENTAGE)
    }

    // ==========================================================================
    // ZMQ Events
    // ==========================================================================

    pub(crate) fn init_zmq(&self, node: &Node, url: &str) -> Result<(), CoreError> {
        node.attach_zmq(ZmqFeed::connect(url)?);
        Ok(())
    }

    /// Subscribe the node's feed and dispatch its messages until shutdown.
    pub(crate) fn subscribe_zmq_events(self: &Arc<Self>, node: &Arc<Node>) -> Result<(), CoreError> {
        let Some(mut messages) = node.zmq().map(ZmqFeed::subscribe).transpose()?.flatten() else {
            return Ok(());
        };
        let service = Arc::clone(self);
        let node = Arc::clone(node);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    message = messages.recv() => message,
                };
                match message {
                    Some(message) => service.handle_zmq_message(&node, message).await,
                    None => break,
                }
            }
        });
        Ok(())
    }

    pub(crate) async fn handle_zmq_message(self: &Arc<Self>, node: &Arc<Node>, message: ZmqMessage) {
        match message.topic {
            ZmqTopic::HashBlock => self.zmq_block_handler(node, message.payload),
            ZmqTopic::RawTx => self.zmq_transaction_handler(message.payload).await,
        }
    }

    /// Handle a block hash notification. Repeats of the last hash are
    /// ignored.
    pub(crate) fn zmq_block_handler(self: &Arc<Self>, node: &Arc<Node>, hash_bytes: Vec<u8>) {
        {
            let mut tip = self.lock_tip();
            if tip.last_seen.as_deref() == Some(hash_bytes.as_slice()) {
                return;
            }
            tip.last_seen = Some(hash_bytes.clone());
        }

        let hash_hex = hex::encode(&hash_bytes);
        let hash = block_hash_from_display_bytes(&hash_bytes);
        self.emit(ServiceEvent::Block(hash_bytes));
        self.subscriptions.notify_hash_block(&hash_hex);

        match hash {
            Some(hash) => self.rapid_protected_update_tip(Arc::clone(node), hash),
            None => {
                warn!(hash = %hash_hex, "ignoring malformed block hash");
                self.emit_error(CoreError::InvalidData(format!(
                    "malformed block hash notification {hash_hex}"
                )));
            }
        }
    }

    /// Run `update_tip` with at most one call in flight and one queued.
    /// Requests arriving while busy collapse into the queued slot.
    pub(crate) fn rapid_protected_update_tip(self: &Arc<Self>, node: Arc<Node>, hash: BlockHash) {
        let Some(first) = self.tip_updates.submit((node, hash)) else {
            return;
        };
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut next = Some(first);
            while let Some((node, hash)) = next {
                service.update_tip(&node, hash).await;
                next = service.tip_updates.finish();
            }
        });
    }

    /// Fetch the block, refresh height and caches, and announce the new tip.
    pub(crate) async fn update_tip(&self, node: &Node, hash: BlockHash) {
        if self.lock_tip().processed == Some(hash) {
            return;
        }

        let block = match node.client().get_block(&hash).await {
            Ok(block) => block,
            Err(e) => {
                error!(block = %hash, error = %e, "failed to update tip");
                self.emit_error(e);
                return;
            }
        };
        self.lock_tip().processed = Some(hash);

        let mut synced = false;
        if !self.is_stopping() {
            match self.sync_percentage().await {
                Ok(percentage) => {
                    info!(height = block.height, percentage, "daemon chain tip");
                    synced = percentage >= SYNCED_PERCENTAGE;
                }
                Err(e) => {
                    error!(error = %e, "failed to read sync percentage");
                    self.emit_error(e);
                }
            }
        }

        self.caches.reset_tip_scoped().await;
        self.set_height(block.height);
        self.emit(ServiceEvent::Tip(block.height));
        if synced {
            self.emit(ServiceEvent::Synced);
        }
    }

    /// Relay a new mempool transaction to listeners and to subscribers of
    /// the addresses it touches. Each txid is relayed once.
    pub(crate) async fn zmq_transaction_handler(&self, raw: Vec<u8>) {
        let tx: Transaction = match bitcoin::consensus::deserialize(&raw) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, "ignoring undecodable zmq transaction");
                return;
            }
        };
        let txid = tx.compute_txid();
        if !self.caches.zmq_known_transactions.insert_new(txid, ()).await {
            return;
        }

        let tx_hex = hex::encode(&raw);
        self.emit(ServiceEvent::Tx(raw));
        self.subscriptions.notify_raw_transaction(&tx_hex);
        for address in addresses_from_transaction(&tx, self.config.network) {
            self.subscriptions.notify_address_txid(&address, txid);
        }
    }
}
