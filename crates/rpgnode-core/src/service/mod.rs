//! The node service: daemon lifecycle, chain tip tracking and the query
//! facade, all routed through one [`ClientPool`].

mod address;
mod blocks;
mod chain;
mod lifecycle;

pub use address::paginate_txids;
pub use chain::SYNCED_PERCENTAGE;

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use bitcoin::BlockHash;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::QueryCaches;
use crate::config::ServiceConfig;
use crate::error::CoreError;
use crate::events::{ServiceEvent, SubscriptionRegistry};
use crate::network::ChainNetwork;
use crate::pool::{ClientPool, Node};
use crate::supervisor::ProcessSupervisor;
use crate::tip::{ChainTip, Coalescer};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct NodeService {
    config: ServiceConfig,
    pool: ClientPool,
    caches: QueryCaches,
    subscriptions: SubscriptionRegistry,
    events: broadcast::Sender<ServiceEvent>,
    tip: Mutex<ChainTip>,
    tip_updates: Coalescer<(Arc<Node>, BlockHash)>,
    shutdown: CancellationToken,
    supervisor: OnceLock<Arc<ProcessSupervisor>>,
    genesis: OnceLock<Vec<u8>>,
}

impl NodeService {
    pub fn new(config: ServiceConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            pool: ClientPool::new(config.timings.try_all_interval),
            caches: QueryCaches::new(&config.cache_sizes),
            subscriptions: SubscriptionRegistry::new(config.network),
            events,
            tip: Mutex::new(ChainTip::default()),
            tip_updates: Coalescer::new(),
            shutdown: CancellationToken::new(),
            supervisor: OnceLock::new(),
            genesis: OnceLock::new(),
            config,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn network(&self) -> ChainNetwork {
        self.config.network
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Current chain height as last reported by a node.
    pub fn height(&self) -> u32 {
        self.lock_tip().height
    }

    /// Serialized genesis block, once the chain has been initialised.
    pub fn genesis_block(&self) -> Option<&[u8]> {
        self.genesis.get().map(Vec::as_slice)
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn supervisor(&self) -> Option<&Arc<ProcessSupervisor>> {
        self.supervisor.get()
    }

    /// Bring up the configured nodes, then read the chain tip and genesis
    /// block.
    pub async fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        if self.config.spawn.is_none() && self.config.connect.is_empty() {
            return Err(CoreError::Config(
                "either \"spawn\" or \"connect\" is expected in the service configuration"
                    .to_owned(),
            ));
        }

        if let Some(spawn) = &self.config.spawn {
            self.spawn_child_process(spawn).await?;
            self.supervise(spawn.clone());
        }
        for connect in &self.config.connect {
            let node = self.connect_process(connect).await?;
            self.pool.push(node).await;
        }

        self.init_chain().await
    }

    /// Stop polling and ZMQ readers, then interrupt the spawned daemon and
    /// wait for it. Safe to call more than once.
    pub async fn stop(&self) -> Result<(), CoreError> {
        if !self.shutdown.is_cancelled() {
            info!("stopping node service");
        }
        self.shutdown.cancel();
        for node in self.pool.nodes().await {
            node.close();
        }

        let Some(supervisor) = self.supervisor.get() else {
            return Ok(());
        };
        let result = supervisor
            .interrupt_and_wait(self.config.timings.shutdown_timeout)
            .await;
        supervisor.mark_stopped();
        result
    }

    fn emit(&self, event: ServiceEvent) {
        // No receivers is normal before anyone subscribes.
        if self.events.send(event).is_err() {
            debug!("service event dropped, no listeners");
        }
    }

    fn emit_error(&self, err: CoreError) {
        self.emit(ServiceEvent::Error(Arc::new(err)));
    }

    fn set_height(&self, height: u32) {
        self.lock_tip().height = height;
    }

    fn lock_tip(&self) -> MutexGuard<'_, ChainTip> {
        self.tip
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{service_with, verbose_block};
    use super::*;
    use crate::rpc::mock::MockRpc;
    use crate::test_util::{block_hash_from_byte, fast_config};
    use serde_json::json;

    #[tokio::test]
    async fn start_without_nodes_is_a_config_error() {
        let service = NodeService::new(fast_config());
        let err = service.start().await.expect_err("nothing to start");
        assert!(matches!(err, CoreError::Config(_)));
        assert!(err.to_string().contains("\"spawn\" or \"connect\""));
    }

    #[tokio::test]
    async fn stop_is_idempotent_without_a_daemon() {
        let service = NodeService::new(fast_config());
        service.stop().await.expect("first stop");
        service.stop().await.expect("second stop");
        assert!(service.is_stopping());
    }

    #[tokio::test]
    async fn init_chain_reads_height_and_genesis() {
        let best = block_hash_from_byte(2);
        let genesis = block_hash_from_byte(0);
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getbestblockhash", json!(best.to_string()))
                .with_result("getblock", verbose_block(best, 42))
                .with_result("getblockhash", json!(genesis.to_string()))
                .then_result("getblock", verbose_block(best, 42))
                .then_result("getblock", json!("0100"))
                .build(),
        );
        let (service, _node) = service_with(rpc).await;

        service.init_chain().await.expect("init chain");
        assert_eq!(service.height(), 42);
        assert_eq!(service.genesis_block(), Some(&[0x01, 0x00][..]));
    }
}
