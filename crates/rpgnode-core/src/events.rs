//! Service events and the subscription registry for outbound notifications.
//!
//! [`ServiceEvent`]s go to in-process listeners over a broadcast channel.
//! [`Notification`]s go to individual [`Subscriber`]s that registered for a
//! topic or for specific addresses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bitcoin::Txid;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::address::ChainAddress;
use crate::error::CoreError;
use crate::network::ChainNetwork;

// ==============================================================================
// Service Events
// ==============================================================================

#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// Block hash bytes as delivered by the feed.
    Block(Vec<u8>),
    /// Serialized transaction as delivered by the feed.
    Tx(Vec<u8>),
    /// Height of the new tip.
    Tip(u32),
    Synced,
    Error(Arc<CoreError>),
}

// ==============================================================================
// Notifications
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    RawTransaction(String),
    HashBlock(String),
    AddressTxid { address: String, txid: Txid },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RawTransaction(_) => "rpgd/rawtransaction",
            Self::HashBlock(_) => "rpgd/hashblock",
            Self::AddressTxid { .. } => "rpgd/addresstxid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    RawTransaction,
    HashBlock,
}

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle identifying one notification consumer.
///
/// Clones share identity, so a clone can be used to unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: u64,
    sender: UnboundedSender<Notification>,
}

impl Subscriber {
    pub fn new() -> (Self, UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, sender }, receiver)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, notification: Notification) {
        // A dropped receiver just means the consumer went away.
        if self.sender.send(notification).is_err() {
            debug!(subscriber = self.id, "notification receiver dropped");
        }
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriber {}

#[derive(Default)]
struct Registry {
    topics: HashMap<Topic, Vec<Subscriber>>,
    addresses: HashMap<String, Vec<Subscriber>>,
}

/// Topic and address subscriptions.
pub struct SubscriptionRegistry {
    network: ChainNetwork,
    inner: Mutex<Registry>,
}

impl SubscriptionRegistry {
    pub fn new(network: ChainNetwork) -> Self {
        Self {
            network,
            inner: Mutex::new(Registry::default()),
        }
    }

    /// Add `subscriber` to a topic. Subscribing twice delivers twice.
    pub fn subscribe(&self, topic: Topic, subscriber: &Subscriber) {
        self.lock()
            .topics
            .entry(topic)
            .or_default()
            .push(subscriber.clone());
    }

    /// Remove one registration of `subscriber` from a topic.
    pub fn unsubscribe(&self, topic: Topic, subscriber: &Subscriber) {
        let mut inner = self.lock();
        if let Some(list) = inner.topics.get_mut(&topic) {
            if let Some(pos) = list.iter().position(|s| s == subscriber) {
                list.remove(pos);
            }
        }
    }

    /// Register `subscriber` for each address. Invalid addresses are skipped,
    /// as are addresses it is already registered for.
    pub fn subscribe_address(&self, subscriber: &Subscriber, addresses: &[String]) {
        let mut inner = self.lock();
        for address in addresses {
            if !ChainAddress::is_valid(address, self.network) {
                debug!(address = %address, "ignoring subscription to invalid address");
                continue;
            }
            let list = inner.addresses.entry(address.clone()).or_default();
            if !list.contains(subscriber) {
                list.push(subscriber.clone());
            }
        }
    }

    /// Remove `subscriber` from the given addresses, or from every address
    /// when `addresses` is `None`. Empty address entries are dropped.
    pub fn unsubscribe_address(&self, subscriber: &Subscriber, addresses: Option<&[String]>) {
        let mut inner = self.lock();
        match addresses {
            Some(addresses) => {
                for address in addresses {
                    if let Some(list) = inner.addresses.get_mut(address) {
                        list.retain(|s| s != subscriber);
                        if list.is_empty() {
                            inner.addresses.remove(address);
                        }
                    }
                }
            }
            None => {
                inner.addresses.retain(|_, list| {
                    list.retain(|s| s != subscriber);
                    !list.is_empty()
                });
            }
        }
    }

    pub fn topic_subscribers(&self, topic: Topic) -> usize {
        self.lock().topics.get(&topic).map_or(0, Vec::len)
    }

    pub fn address_subscribers(&self, address: &str) -> usize {
        self.lock().addresses.get(address).map_or(0, Vec::len)
    }

    pub fn notify_raw_transaction(&self, tx_hex: &str) {
        self.notify_topic(Topic::RawTransaction, Notification::RawTransaction(tx_hex.to_owned()));
    }

    pub fn notify_hash_block(&self, hash_hex: &str) {
        self.notify_topic(Topic::HashBlock, Notification::HashBlock(hash_hex.to_owned()));
    }

    /// Tell each subscriber of `address` about `txid`.
    pub fn notify_address_txid(&self, address: &str, txid: Txid) {
        let subscribers = self.lock().addresses.get(address).cloned().unwrap_or_default();
        for subscriber in subscribers {
            subscriber.send(Notification::AddressTxid {
                address: address.to_owned(),
                txid,
            });
        }
    }

    fn notify_topic(&self, topic: Topic, notification: Notification) {
        let subscribers = self.lock().topics.get(&topic).cloned().unwrap_or_default();
        for subscriber in subscribers {
            subscriber.send(notification.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
