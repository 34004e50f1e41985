//! Service configuration.
//!
//! Every recognised option has an explicit field and a default. The struct is
//! deserialised from a JSON file; missing fields take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::network::ChainNetwork;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub network: ChainNetwork,
    /// Launch and supervise a local daemon.
    pub spawn: Option<SpawnConfig>,
    /// Remote daemons to connect to, in pool order.
    pub connect: Vec<ConnectConfig>,
    pub timings: Timings,
    pub limits: QueryLimits,
    pub cache_sizes: CacheSizes,
    /// Directory relative paths are resolved against. Set by
    /// [`ServiceConfig::from_file`] to the config file's directory.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("failed to read config {}: {e}", path.display()))
        })?;
        let mut config: Self = serde_json::from_str(&content).map_err(|e| {
            CoreError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnConfig {
    pub datadir: PathBuf,
    pub exec: PathBuf,
    #[serde(default = "default_conf_file_name")]
    pub conf_file_name: String,
    #[serde(default = "default_pid_file_name")]
    pub pid_file_name: String,
}

impl SpawnConfig {
    pub fn new(datadir: impl Into<PathBuf>, exec: impl Into<PathBuf>) -> Self {
        Self {
            datadir: datadir.into(),
            exec: exec.into(),
            conf_file_name: default_conf_file_name(),
            pid_file_name: default_pid_file_name(),
        }
    }

    /// The datadir, resolved against `base_dir` when relative.
    pub fn resolved_datadir(&self, base_dir: &Path) -> PathBuf {
        if self.datadir.is_absolute() {
            self.datadir.clone()
        } else {
            base_dir.join(&self.datadir)
        }
    }
}

fn default_conf_file_name() -> String {
    "rpg.conf".to_owned()
}

fn default_pid_file_name() -> String {
    "rpgd.pid".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    pub rpc_host: String,
    /// Defaults to the network's RPC port.
    pub rpc_port: Option<u16>,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    pub rpc_cookie_file: Option<PathBuf>,
    pub rpc_protocol: String,
    pub zmq_pub_raw_tx: Option<String>,
    pub requests_per_second: Option<u32>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            rpc_host: "127.0.0.1".to_owned(),
            rpc_port: None,
            rpc_user: None,
            rpc_password: None,
            rpc_cookie_file: None,
            rpc_protocol: "http".to_owned(),
            zmq_pub_raw_tx: None,
            requests_per_second: None,
        }
    }
}

impl ConnectConfig {
    pub fn rpc_url(&self, network: ChainNetwork) -> String {
        let port = self.rpc_port.unwrap_or_else(|| network.default_rpc_port());
        format!("{}://{}:{}", self.rpc_protocol, self.rpc_host, port)
    }
}

/// Intervals and retry budgets. Serialised as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Pause between failover attempts on successive nodes.
    #[serde(with = "millis")]
    pub try_all_interval: Duration,
    #[serde(with = "millis")]
    pub start_retry_interval: Duration,
    pub start_retry_count: u32,
    /// Delay before relaunching a daemon that exited on its own.
    #[serde(with = "millis")]
    pub spawn_restart_time: Duration,
    /// Wait after signalling a stale daemon before checking its pid file again.
    #[serde(with = "millis")]
    pub spawn_stop_time: Duration,
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
    #[serde(with = "millis")]
    pub reindex_wait: Duration,
    #[serde(with = "millis")]
    pub tip_update_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            try_all_interval: Duration::from_millis(1000),
            start_retry_interval: Duration::from_millis(5000),
            start_retry_count: 60,
            spawn_restart_time: Duration::from_millis(5000),
            spawn_stop_time: Duration::from_millis(10000),
            shutdown_timeout: Duration::from_millis(15000),
            reindex_wait: Duration::from_millis(10000),
            tip_update_interval: Duration::from_millis(15000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    /// Largest txid window a summary may return.
    pub max_txids: usize,
    /// Largest window of detailed history items per call.
    pub max_transaction_history: usize,
    pub max_addresses_query: usize,
    /// Detailed transactions fetched concurrently while building history.
    pub transaction_concurrency: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_txids: 1000,
            max_transaction_history: 50,
            max_addresses_query: 10000,
            transaction_concurrency: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSizes {
    pub utxos: usize,
    pub txids: usize,
    pub balance: usize,
    pub summary: usize,
    pub transaction_detailed: usize,
    pub transaction: usize,
    pub raw_transaction: usize,
    pub block: usize,
    pub raw_block: usize,
    pub block_header: usize,
    pub block_overview: usize,
    pub zmq_known_transactions: usize,
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self {
            utxos: 50000,
            txids: 50000,
            balance: 50000,
            summary: 50000,
            transaction_detailed: 100000,
            transaction: 100000,
            raw_transaction: 50000,
            block: 144,
            raw_block: 72,
            block_header: 288,
            block_overview: 144,
            zmq_known_transactions: 5000,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
