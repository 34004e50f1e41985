use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{ConnectConfig, SpawnConfig};
use crate::daemon_conf::load_spawn_configuration;
use crate::error::CoreError;
use crate::pool::{Node, NodeOrigin};
use crate::rpc::{DaemonRpc, HttpRpcClient};
use crate::supervisor::{ProcessState, ProcessSupervisor};

use super::chain::progress_percentage;
use super::NodeService;

impl NodeService {
    // ==========================================================================
    // Spawned Daemon
    // ==========================================================================

    /// Launch the local daemon and wait until it answers RPC, has finished
    /// any configured reindex and has its ZMQ socket connected. The node
    /// takes the spawned slot in the pool; sync polling continues in the
    /// background.
    pub(crate) async fn spawn_child_process(
        self: &Arc<Self>,
        spawn: &SpawnConfig,
    ) -> Result<Arc<Node>, CoreError> {
        let plan =
            load_spawn_configuration(spawn, self.config.network, &self.config.base_dir).await?;
        if self.is_stopping() {
            return Err(CoreError::Stopping("Stopping while trying to spawn"));
        }

        let supervisor = Arc::clone(self.supervisor.get_or_init(|| {
            Arc::new(ProcessSupervisor::from_plan(
                &plan,
                self.config.timings.spawn_stop_time,
            ))
        }));
        supervisor.stop_stale_process().await?;
        supervisor.launch()?;

        let client: Arc<dyn DaemonRpc> = Arc::new(HttpRpcClient::new(
            &plan.rpc_url(),
            plan.rpc_user.as_deref(),
            plan.rpc_password.as_deref(),
            None,
            None,
        )?);
        let node = Arc::new(Node::new(Arc::clone(&client), NodeOrigin::Spawned));
        node.set_reindexing(plan.reindex);

        self.load_tip_with_retries(&client).await?;
        self.init_zmq(&node, &plan.zmq_url)?;
        self.check_reindex(&node).await?;

        if let Some(previous) = self.pool.replace_spawned(Arc::clone(&node)).await {
            previous.close();
        }

        let service = Arc::clone(self);
        let polled = Arc::clone(&node);
        tokio::spawn(async move { service.check_synced_and_subscribe(polled).await });

        Ok(node)
    }

    /// Respawn the daemon whenever it exits while the service is running.
    pub(crate) fn supervise(self: &Arc<Self>, spawn: SpawnConfig) {
        let Some(supervisor) = self.supervisor.get().map(Arc::clone) else {
            return;
        };
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut status = supervisor.watch();
            loop {
                let exited = tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    state = status.wait_for(|s| matches!(s, ProcessState::Exited { .. })) => {
                        state.map(|s| s.clone()).ok()
                    }
                };
                let Some(ProcessState::Exited { code }) = exited else {
                    break;
                };
                if service.is_stopping() {
                    break;
                }

                let delay = service.config.timings.spawn_restart_time;
                warn!(code = ?code, delay_ms = delay.as_millis() as u64, "daemon exited, respawning");
                supervisor.mark_respawning();
                tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                if let Err(e) = service.spawn_child_process(&spawn).await {
                    if !service.is_stopping() {
                        error!(error = %e, "failed to respawn daemon");
                        service.emit_error(e);
                    }
                    break;
                }
            }
        });
    }

    // ==========================================================================
    // Remote Daemons
    // ==========================================================================

    /// Connect to an externally managed daemon. Remote nodes subscribe to
    /// ZMQ events as soon as they answer RPC.
    pub(crate) async fn connect_process(
        self: &Arc<Self>,
        connect: &ConnectConfig,
    ) -> Result<Arc<Node>, CoreError> {
        let url = connect.rpc_url(self.config.network);
        let zmq_url = connect.zmq_pub_raw_tx.as_deref().ok_or_else(|| {
            CoreError::Config(format!("\"zmq_pub_raw_tx\" is required to connect to {url}"))
        })?;

        let client: Arc<dyn DaemonRpc> = Arc::new(HttpRpcClient::new(
            &url,
            connect.rpc_user.as_deref(),
            connect.rpc_password.as_deref(),
            connect.rpc_cookie_file.as_deref(),
            connect.requests_per_second,
        )?);
        let node = Arc::new(Node::new(Arc::clone(&client), NodeOrigin::Remote));

        self.load_tip_with_retries(&client).await?;
        self.init_zmq(&node, zmq_url)?;
        self.subscribe_zmq_events(&node)?;
        info!(rpc.url = %url, "connected to daemon");
        Ok(node)
    }

    // ==========================================================================
    // Readiness
    // ==========================================================================

    /// Poll `getbestblockhash` and `getblock` until the daemon answers, up
    /// to the configured retry budget. Records the tip height.
    pub(crate) async fn load_tip_with_retries(
        &self,
        client: &Arc<dyn DaemonRpc>,
    ) -> Result<(), CoreError> {
        let timings = &self.config.timings;
        let mut attempt: u32 = 0;
        loop {
            if self.is_stopping() {
                return Err(CoreError::Stopping("Stopping while trying to connect"));
            }
            attempt += 1;

            let loaded = async {
                let best = client.get_best_block_hash().await?;
                client.get_block(&best).await
            }
            .await;
            match loaded {
                Ok(block) => {
                    self.set_height(block.height);
                    return Ok(());
                }
                Err(e) if attempt >= timings.start_retry_count => return Err(e),
                Err(e) if e.is_warming_up() => warn!(attempt, error = %e, "daemon is warming up"),
                Err(e) => error!(attempt, error = %e, "daemon is not ready"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(timings.start_retry_interval) => {}
            }
        }
    }

    /// Wait for a configured reindex to reach 100%.
    pub(crate) async fn check_reindex(&self, node: &Node) -> Result<(), CoreError> {
        if !node.is_reindexing() {
            return Ok(());
        }
        let client = node.client();
        loop {
            let info = client.get_blockchain_info().await?;
            let percentage = progress_percentage(info.verification_progress);
            info!(percentage, "daemon reindex progress");
            if percentage >= 100.0 {
                node.set_reindexing(false);
                return Ok(());
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(CoreError::Stopping("Stopping while waiting for reindex"));
                }
                _ = tokio::time::sleep(self.config.timings.reindex_wait) => {}
            }
        }
    }
}
