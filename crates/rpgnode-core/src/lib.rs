pub mod address;
pub mod cache;
pub mod config;
pub mod daemon_conf;
pub mod error;
pub mod events;
pub mod network;
pub mod pool;
pub mod reconcile;
pub mod rpc;
pub mod service;
pub mod supervisor;
pub mod tip;
pub mod types;
pub mod zmq;

#[cfg(test)]
mod test_util;

pub use config::ServiceConfig;
pub use error::CoreError;
pub use network::ChainNetwork;
pub use service::NodeService;
