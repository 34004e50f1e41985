//! The daemon's `rpg.conf`: loading, default generation and the index
//! requirements this service depends on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reqwest::Url;
use tokio::fs;
use tracing::{info, warn};

use crate::config::SpawnConfig;
use crate::error::CoreError;
use crate::network::ChainNetwork;

/// Parsed `key=value` daemon configuration. Later keys override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonConf {
    entries: BTreeMap<String, String>,
}

impl DaemonConf {
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.trim().to_owned(), value.trim().to_owned());
            }
        }
        Self { entries }
    }

    /// The configuration written when the datadir has none.
    pub fn default_for(network: ChainNetwork) -> Self {
        let rpc_port = network.default_rpc_port().to_string();
        let defaults = [
            ("server", "1"),
            ("whitelist", "127.0.0.1"),
            ("txindex", "1"),
            ("addressindex", "1"),
            ("timestampindex", "1"),
            ("spentindex", "1"),
            ("zmqpubrawtx", "tcp://127.0.0.1:28332"),
            ("zmqpubhashblock", "tcp://127.0.0.1:28332"),
            ("rpcallowip", "127.0.0.1"),
            ("rpcport", rpc_port.as_str()),
            ("rpcuser", "rpgcoin"),
            ("rpcpassword", "local321"),
            ("uacomment", "rpgcore"),
        ];
        Self {
            entries: defaults
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_owned(), value.to_owned());
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.get(key) == Some("1")
    }

    pub fn merge(&mut self, other: DaemonConf) {
        self.entries.extend(other.entries);
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect()
    }
}

/// Everything needed to launch a daemon and then talk to it.
#[derive(Debug, Clone)]
pub struct SpawnPlan {
    pub exec: PathBuf,
    pub conf_path: PathBuf,
    pub datadir: PathBuf,
    pub pid_file: PathBuf,
    pub network: ChainNetwork,
    pub conf: DaemonConf,
    pub rpc_port: u16,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    pub zmq_url: String,
    pub reindex: bool,
}

impl SpawnPlan {
    /// `--conf=<path> --datadir=<dir> [--testnet|--regtest]`
    pub fn daemon_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--conf={}", self.conf_path.display()),
            format!("--datadir={}", self.datadir.display()),
        ];
        if let Some(flag) = self.network.cli_flag() {
            args.push(flag.to_owned());
        }
        args
    }

    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.rpc_port)
    }
}

/// Resolve the datadir, make sure a config file exists, read it (plus the
/// network-specific override file) and validate it.
pub async fn load_spawn_configuration(
    spawn: &SpawnConfig,
    network: ChainNetwork,
    base_dir: &Path,
) -> Result<SpawnPlan, CoreError> {
    let datadir = spawn.resolved_datadir(base_dir);
    if !fs::try_exists(&datadir).await? {
        fs::create_dir_all(&datadir).await?;
    }

    let conf_path = datadir.join(&spawn.conf_file_name);
    if !fs::try_exists(&conf_path).await? {
        info!(path = %conf_path.display(), "writing default daemon configuration");
        fs::write(&conf_path, DaemonConf::default_for(network).render()).await?;
    }

    let mut conf = DaemonConf::parse(&fs::read_to_string(&conf_path).await?);
    let network_dir = network.data_subdir().map(|subdir| datadir.join(subdir));
    if let Some(dir) = &network_dir {
        let network_conf_path = dir.join(&spawn.conf_file_name);
        if fs::try_exists(&network_conf_path).await? {
            conf.merge(DaemonConf::parse(&fs::read_to_string(&network_conf_path).await?));
        }
    }

    let reindex = check_config_indexes(&conf)?;

    let rpc_port = match conf.get("rpcport") {
        Some(port) => port
            .parse()
            .map_err(|_| CoreError::Config(format!("invalid rpcport `{port}`")))?,
        None => network.default_rpc_port(),
    };
    let zmq_url = conf
        .get("zmqpubrawtx")
        .map(str::to_owned)
        .ok_or_else(|| CoreError::Config("\"zmqpubrawtx\" option is required".to_owned()))?;
    let pid_file = network_dir
        .unwrap_or_else(|| datadir.clone())
        .join(&spawn.pid_file_name);

    Ok(SpawnPlan {
        exec: spawn.exec.clone(),
        conf_path,
        datadir,
        pid_file,
        network,
        rpc_port,
        rpc_user: conf.get("rpcuser").map(str::to_owned),
        rpc_password: conf.get("rpcpassword").map(str::to_owned),
        zmq_url,
        reindex,
        conf,
    })
}

/// Validate the index and notification options. Returns whether the daemon
/// was configured to reindex.
pub fn check_config_indexes(conf: &DaemonConf) -> Result<bool, CoreError> {
    for (key, purpose) in [
        ("txindex", "transaction query"),
        ("addressindex", "address query"),
        ("spentindex", "spent output query"),
        ("server", "RPC"),
    ] {
        if !conf.is_enabled(key) {
            return Err(CoreError::Config(format!(
                "\"{key}\" option is required in order to use {purpose} features. \
                 Please add \"{key}=1\" to your configuration and reindex an existing \
                 database if necessary with reindex=1"
            )));
        }
    }

    let raw_tx = conf.get("zmqpubrawtx").ok_or_else(|| {
        CoreError::Config(
            "\"zmqpubrawtx\" option is required to get event updates; for example \
             \"zmqpubrawtx=tcp://127.0.0.1:28332\""
                .to_owned(),
        )
    })?;
    let hash_block = conf.get("zmqpubhashblock").ok_or_else(|| {
        CoreError::Config(
            "\"zmqpubhashblock\" option is required to get event updates; for example \
             \"zmqpubhashblock=tcp://127.0.0.1:28332\""
                .to_owned(),
        )
    })?;
    if endpoint(raw_tx)? != endpoint(hash_block)? {
        return Err(CoreError::Config(
            "\"zmqpubrawtx\" and \"zmqpubhashblock\" are expected to the same host and port in rpg.conf"
                .to_owned(),
        ));
    }

    let reindex = conf.is_enabled("reindex");
    if reindex {
        warn!("reindex option is currently enabled; remove \"reindex=1\" from rpg.conf once it completes");
    }
    Ok(reindex)
}

fn endpoint(url: &str) -> Result<(String, Option<u16>), CoreError> {
    let parsed = Url::parse(url)
        .map_err(|e| CoreError::Config(format!("invalid zmq endpoint `{url}`: {e}")))?;
    Ok((
        parsed.host_str().unwrap_or_default().to_owned(),
        parsed.port(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_conf() -> DaemonConf {
        DaemonConf::parse(
            "# indexes\n\
             server=1\n\
             txindex=1\n\
             addressindex=1\n\
             spentindex=1\n\
             zmqpubrawtx=tcp://127.0.0.1:28332\n\
             zmqpubhashblock=tcp://127.0.0.1:28332\n\
             rpcport=20001\n\
             rpcuser=rpg\n\
             rpcpassword=secret\n",
        )
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let conf = DaemonConf::parse("# comment\n\n upnp = 0 \nwhitelist=127.0.0.1\nbogus\n");
        assert_eq!(conf.get("upnp"), Some("0"));
        assert_eq!(conf.get("whitelist"), Some("127.0.0.1"));
        assert_eq!(conf.get("bogus"), None);
    }

    #[test]
    fn default_conf_passes_validation() {
        let conf = DaemonConf::default_for(ChainNetwork::Testnet);
        assert_eq!(conf.get("rpcport"), Some("17210"));
        assert!(!check_config_indexes(&conf).expect("defaults must validate"));
        let reparsed = DaemonConf::parse(&conf.render());
        assert_eq!(reparsed, conf);
    }

    #[test]
    fn missing_txindex_is_config_error() {
        let mut conf = valid_conf();
        conf.set("txindex", "0");
        let err = check_config_indexes(&conf).expect_err("txindex is required");
        assert!(matches!(err, CoreError::Config(_)));
        assert!(err.to_string().contains("\"txindex\""));
    }

    #[test]
    fn mismatched_zmq_endpoints_are_rejected() {
        let mut conf = valid_conf();
        conf.set("zmqpubhashblock", "tcp://127.0.0.1:28331");
        let err = check_config_indexes(&conf).expect_err("ports differ");
        assert!(err
            .to_string()
            .contains("\"zmqpubrawtx\" and \"zmqpubhashblock\""));
    }

    #[test]
    fn reindex_flag_is_reported() {
        let mut conf = valid_conf();
        conf.set("reindex", "1");
        assert!(check_config_indexes(&conf).expect("valid"));
    }

    #[tokio::test]
    async fn load_writes_default_conf_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spawn = SpawnConfig::new("data", "/usr/local/bin/rpgd");

        let plan = load_spawn_configuration(&spawn, ChainNetwork::Testnet, dir.path())
            .await
            .expect("default configuration must load");
        assert!(plan.conf_path.exists());
        assert_eq!(plan.datadir, dir.path().join("data"));
        assert_eq!(plan.rpc_port, 17210);
        assert_eq!(plan.zmq_url, "tcp://127.0.0.1:28332");
        assert_eq!(plan.pid_file, dir.path().join("data/testnet3/rpgd.pid"));
        assert!(!plan.reindex);
        assert_eq!(
            plan.daemon_args(),
            vec![
                format!("--conf={}", plan.conf_path.display()),
                format!("--datadir={}", plan.datadir.display()),
                "--testnet".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn network_conf_overrides_base_conf() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("rpg.conf"), valid_conf().render()).expect("write base");
        std::fs::create_dir_all(dir.path().join("regtest")).expect("mkdir");
        std::fs::write(dir.path().join("regtest/rpg.conf"), "rpcport=30001\nreindex=1\n")
            .expect("write network conf");

        let spawn = SpawnConfig::new(dir.path(), "/usr/local/bin/rpgd");
        let plan = load_spawn_configuration(&spawn, ChainNetwork::Regtest, dir.path())
            .await
            .expect("configuration must load");
        assert_eq!(plan.rpc_port, 30001);
        assert!(plan.reindex);
        assert_eq!(plan.rpc_user.as_deref(), Some("rpg"));
        assert_eq!(plan.daemon_args().last().map(String::as_str), Some("--regtest"));
    }

    #[tokio::test]
    async fn livenet_has_no_network_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spawn = SpawnConfig::new(dir.path(), "/usr/local/bin/rpgd");
        let plan = load_spawn_configuration(&spawn, ChainNetwork::Livenet, dir.path())
            .await
            .expect("configuration must load");
        assert_eq!(plan.daemon_args().len(), 2);
        assert_eq!(plan.pid_file, dir.path().join("rpgd.pid"));
        assert_eq!(plan.rpc_url(), "http://127.0.0.1:7210");
    }
}
