//! JSON-RPC client for rpgd daemons.
//!
//! Implements [`DaemonRpc`](super::DaemonRpc) over HTTP using `reqwest`, with
//! basic auth (explicit credentials or a cookie file) and optional request
//! rate limiting.

mod client;
mod connection;
mod protocol;

pub use client::HttpRpcClient;
