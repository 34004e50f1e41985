//! Shared test helpers for `rpgnode-core` unit tests.
//!
//! Deterministic ids and a real testnet transaction so that address
//! extraction, detailed-transaction decoding and `sendrawtransaction`
//! tests all agree on one fixture.

use std::time::Duration;

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction, Txid};

use crate::config::{ServiceConfig, Timings};

// ==============================================================================
// Id Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

pub fn block_hash_from_byte(b: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    BlockHash::from_byte_array(bytes)
}

// ==============================================================================
// Transaction Fixture
// ==============================================================================

/// A testnet 2-of-2 multisig spend with two pay-to-script-hash outputs.
pub const SAMPLE_TX_HEX: &str = "01000000016f95980911e01c2c664b3e78299527a47933aac61a515930a8fe0213d1ac9abe01000000da0047304402200e71cda1f71e087c018759ba3427eb968a9ea0b1decd24147f91544629b17b4f0220555ee111ed0fc0f751ffebf097bdf40da0154466eb044e72b6b3dcd5f06807fa01483045022100c86d6c8b417bff6cc3bbf4854c16bba0aaca957e8f73e19f37216e2b06bb7bf802205a37be2f57a83a1b5a8cc511dc61466c11e9ba053c363302e7b99674be6a49fc0147522102632178d046673c9729d828cfee388e121f497707f810c131e0d3fc0fe0bd66d62103a0951ec7d3a9da9de171617026442fcd30f34d66100fab539853b43f508787d452aeffffffff0240420f000000000017a9148a31d53a448c18996e81ce67811e5fb7da21e4468738c9d6f90000000017a9148ce5408cfeaddb7ccb2545ded41ef478109454848700000000";

pub const SAMPLE_TXID: &str = "2d950d00494caf6bfc5fff2a3f839f0eb50f663ae85ce092bc5f9d45296ae91f";

pub fn sample_transaction_bytes() -> Vec<u8> {
    hex::decode(SAMPLE_TX_HEX).expect("fixture hex must decode")
}

pub fn sample_transaction() -> Transaction {
    bitcoin::consensus::deserialize(&sample_transaction_bytes())
        .expect("fixture transaction must deserialize")
}

// ==============================================================================
// Config
// ==============================================================================

/// Service config with millisecond-scale intervals so that polling loops
/// finish quickly under test.
pub fn fast_config() -> ServiceConfig {
    ServiceConfig {
        network: crate::network::ChainNetwork::Testnet,
        timings: Timings {
            try_all_interval: Duration::from_millis(1),
            start_retry_interval: Duration::from_millis(1),
            start_retry_count: 3,
            spawn_restart_time: Duration::from_millis(1),
            spawn_stop_time: Duration::from_millis(1),
            shutdown_timeout: Duration::from_millis(200),
            reindex_wait: Duration::from_millis(1),
            tip_update_interval: Duration::from_millis(1),
        },
        ..ServiceConfig::default()
    }
}
