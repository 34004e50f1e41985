//! The set of daemon nodes queries are routed to.
//!
//! Nodes are tried one after another starting at the pool cursor; the first
//! success wins. Nothing advances the cursor on its own, so a healthy first
//! node keeps receiving every request.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CoreError;
use crate::rpc::DaemonRpc;
use crate::zmq::ZmqFeed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOrigin {
    /// Child process started and supervised by this service.
    Spawned,
    /// Externally managed daemon.
    Remote,
}

/// One daemon: its RPC client plus per-node state.
pub struct Node {
    client: Arc<dyn DaemonRpc>,
    origin: NodeOrigin,
    reindex: AtomicBool,
    zmq: OnceLock<ZmqFeed>,
}

impl Node {
    pub fn new(client: Arc<dyn DaemonRpc>, origin: NodeOrigin) -> Self {
        Self {
            client,
            origin,
            reindex: AtomicBool::new(false),
            zmq: OnceLock::new(),
        }
    }

    pub fn client(&self) -> Arc<dyn DaemonRpc> {
        Arc::clone(&self.client)
    }

    pub fn origin(&self) -> NodeOrigin {
        self.origin
    }

    pub fn is_reindexing(&self) -> bool {
        self.reindex.load(Ordering::Acquire)
    }

    pub fn set_reindexing(&self, reindex: bool) {
        self.reindex.store(reindex, Ordering::Release);
    }

    /// Attach the node's ZMQ feed. A second feed is closed and dropped.
    pub fn attach_zmq(&self, feed: ZmqFeed) {
        if let Err(extra) = self.zmq.set(feed) {
            extra.close();
        }
    }

    pub fn zmq(&self) -> Option<&ZmqFeed> {
        self.zmq.get()
    }

    /// Close the node's ZMQ feed, if any.
    pub fn close(&self) {
        if let Some(feed) = self.zmq.get() {
            feed.close();
        }
    }
}

/// Ordered list of nodes plus the cursor index.
pub struct ClientPool {
    nodes: RwLock<Vec<Arc<Node>>>,
    cursor: AtomicUsize,
    try_all_interval: Duration,
}

impl ClientPool {
    pub fn new(try_all_interval: Duration) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            try_all_interval,
        }
    }

    pub async fn push(&self, node: Arc<Node>) {
        self.nodes.write().await.push(node);
    }

    /// Put a respawned node in place of the previous spawned one, keeping its
    /// position. Appends if there was none.
    pub async fn replace_spawned(&self, node: Arc<Node>) -> Option<Arc<Node>> {
        let mut nodes = self.nodes.write().await;
        match nodes
            .iter()
            .position(|existing| existing.origin() == NodeOrigin::Spawned)
        {
            Some(idx) => Some(std::mem::replace(&mut nodes[idx], node)),
            None => {
                nodes.push(node);
                None
            }
        }
    }

    pub async fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn set_cursor(&self, index: usize) {
        self.cursor.store(index, Ordering::Release);
    }

    /// Client of the node at the cursor.
    pub async fn current(&self) -> Result<Arc<dyn DaemonRpc>, CoreError> {
        let nodes = self.nodes.read().await;
        if nodes.is_empty() {
            return Err(CoreError::NoNodes);
        }
        Ok(nodes[self.cursor() % nodes.len()].client())
    }

    /// Remove every node, returning them for shutdown.
    pub async fn drain(&self) -> Vec<Arc<Node>> {
        std::mem::take(&mut *self.nodes.write().await)
    }

    /// Run `op` against each node in turn, starting at the cursor and
    /// wrapping around, until one succeeds.
    ///
    /// Attempts are sequential with `try_all_interval` between them. When
    /// every node fails, the last error is returned.
    pub async fn try_all<T, F, Fut>(&self, op: F) -> Result<T, CoreError>
    where
        F: Fn(Arc<dyn DaemonRpc>) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let clients: Vec<Arc<dyn DaemonRpc>> = {
            let nodes = self.nodes.read().await;
            if nodes.is_empty() {
                return Err(CoreError::NoNodes);
            }
            let start = self.cursor() % nodes.len();
            (0..nodes.len())
                .map(|offset| nodes[(start + offset) % nodes.len()].client())
                .collect()
        };

        let mut last_err = CoreError::NoNodes;
        for (attempt, client) in clients.into_iter().enumerate() {
            if attempt > 0 {
                tokio::time::sleep(self.try_all_interval).await;
            }
            match op(client).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(attempt, error = %e, "node request failed, trying next node");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
