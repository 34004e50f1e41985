use std::hash::Hash;
use std::num::NonZeroUsize;

use bitcoin::hashes::{sha256, Hash as _, HashEngine};
use bitcoin::{Block, BlockHash, Transaction, Txid};
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::CacheSizes;
use crate::types::{AddressBalance, AddressUtxo, BlockHeader, BlockOverview, DetailedTransaction};

// ==============================================================================
// Cache Keys
// ==============================================================================

/// Stable fingerprint of a query: SHA-256 over the method name and the
/// JSON encoding of its normalised arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(sha256::Hash);

impl CacheKey {
    pub fn fingerprint<A: Serialize + ?Sized>(method: &str, args: &A) -> Self {
        let mut engine = sha256::Hash::engine();
        engine.input(method.as_bytes());
        engine.input(&[0]);
        // Serialising plain data structures into a Vec cannot fail; fall back
        // to an empty argument encoding rather than panicking if it ever does.
        let encoded = serde_json::to_vec(args).unwrap_or_default();
        engine.input(&encoded);
        Self(sha256::Hash::from_engine(engine))
    }
}

// ==============================================================================
// Bounded Cache
// ==============================================================================

/// A capacity-bounded LRU map behind a single async mutex.
///
/// Lookups need exclusive access because they update recency.
pub struct BoundedCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// A zero capacity is bumped to one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn put(&self, key: K, value: V) {
        self.entries.lock().await.put(key, value);
    }

    /// Record `key`, returning `true` if it was not already present.
    pub async fn insert_new(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains(&key) {
            entries.promote(&key);
            return false;
        }
        entries.put(key, value);
        true
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

// ==============================================================================
// Named Caches
// ==============================================================================

/// Confirmed half of an address summary. Mempool figures are never cached.
#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub balance: AddressBalance,
    /// Confirmed txids, newest first.
    pub confirmed_txids: Vec<Txid>,
}

/// Every cache the service keeps.
///
/// Address-derived caches go stale whenever the tip moves and are cleared by
/// [`QueryCaches::reset_tip_scoped`]. Content caches keyed by block or
/// transaction hash hold immutable data and are only ever LRU-evicted.
pub struct QueryCaches {
    pub utxos: BoundedCache<CacheKey, Vec<AddressUtxo>>,
    pub txids: BoundedCache<CacheKey, Vec<Txid>>,
    pub balance: BoundedCache<CacheKey, AddressBalance>,
    pub summary: BoundedCache<CacheKey, SummaryRecord>,
    /// Detailed transactions embed spent-output data, which changes with
    /// new blocks.
    pub transaction_detailed: BoundedCache<Txid, DetailedTransaction>,

    pub transaction: BoundedCache<Txid, Transaction>,
    pub raw_transaction: BoundedCache<Txid, Vec<u8>>,
    pub block: BoundedCache<BlockHash, Block>,
    pub raw_block: BoundedCache<BlockHash, Vec<u8>>,
    pub block_header: BoundedCache<BlockHash, BlockHeader>,
    pub block_overview: BoundedCache<BlockHash, BlockOverview>,

    /// Transactions already relayed from the ZMQ feed.
    pub zmq_known_transactions: BoundedCache<Txid, ()>,
}

impl QueryCaches {
    pub fn new(sizes: &CacheSizes) -> Self {
        Self {
            utxos: BoundedCache::new(sizes.utxos),
            txids: BoundedCache::new(sizes.txids),
            balance: BoundedCache::new(sizes.balance),
            summary: BoundedCache::new(sizes.summary),
            transaction_detailed: BoundedCache::new(sizes.transaction_detailed),
            transaction: BoundedCache::new(sizes.transaction),
            raw_transaction: BoundedCache::new(sizes.raw_transaction),
            block: BoundedCache::new(sizes.block),
            raw_block: BoundedCache::new(sizes.raw_block),
            block_header: BoundedCache::new(sizes.block_header),
            block_overview: BoundedCache::new(sizes.block_overview),
            zmq_known_transactions: BoundedCache::new(sizes.zmq_known_transactions),
        }
    }

    pub async fn reset_tip_scoped(&self) {
        self.utxos.clear().await;
        self.txids.clear().await;
        self.balance.clear().await;
        self.summary.clear().await;
        self.transaction_detailed.clear().await;
    }
}

impl Default for QueryCaches {
    fn default() -> Self {
        Self::new(&CacheSizes::default())
    }
}
