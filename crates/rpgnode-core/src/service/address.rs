use std::collections::{BTreeMap, HashSet};

use bitcoin::Txid;
use futures::{StreamExt, TryStreamExt};
use tracing::warn;

use crate::address::ChainAddress;
use crate::cache::{CacheKey, SummaryRecord};
use crate::error::CoreError;
use crate::reconcile::{mempool_txids, merge_txids, reconcile_utxos, unconfirmed_balance};
use crate::types::{
    confirmations, AddressBalance, AddressHistory, AddressIndexes, AddressQueryOptions,
    AddressSummary, AddressUtxo, HeightRange, HistoryItem, MempoolDelta,
};

use super::NodeService;

/// Slice `items[from..to]`, clamped to the list. `from` must be below `to`.
pub fn paginate_txids<T: Clone>(items: &[T], from: usize, to: usize) -> Result<Vec<T>, CoreError> {
    if from >= to {
        return Err(CoreError::InvalidArgument(format!(
            "\"from\" ({from}) is expected to be less than \"to\" ({to})"
        )));
    }
    let end = to.min(items.len());
    let start = from.min(end);
    Ok(items[start..end].to_vec())
}

/// Resolve `from`/`to`, defaulting to `0..max`, and cap the window at `max`.
fn page_window(options: &AddressQueryOptions, max: usize) -> Result<(usize, usize), CoreError> {
    let from = options.from.as_ref().map_or(Ok(0), |b| b.resolve("from"))?;
    let to = options.to.as_ref().map_or(Ok(max), |b| b.resolve("to"))?;
    if to.saturating_sub(from) > max {
        return Err(CoreError::InvalidArgument(format!(
            "\"from\" ({from}) and \"to\" ({to}) range should be less than or equal to {max}"
        )));
    }
    Ok((from, to))
}

impl NodeService {
    // ==========================================================================
    // Address Queries
    // ==========================================================================

    /// Validate addresses against the configured network and the per-query
    /// address limit.
    fn normalize_addresses(&self, addresses: &[String]) -> Result<Vec<String>, CoreError> {
        if addresses.is_empty() {
            return Err(CoreError::InvalidArgument(
                "at least one address is expected".to_owned(),
            ));
        }
        let max = self.config.limits.max_addresses_query;
        if addresses.len() > max {
            return Err(CoreError::InvalidArgument(format!(
                "Maximum number of addresses ({max}) exceeded"
            )));
        }
        addresses
            .iter()
            .map(|address| {
                let address = address.trim();
                ChainAddress::parse(address, self.config.network)?;
                Ok(address.to_owned())
            })
            .collect()
    }

    pub async fn get_address_balance(&self, addresses: &[String]) -> Result<AddressBalance, CoreError> {
        let addresses = self.normalize_addresses(addresses)?;
        self.confirmed_balance(&addresses).await
    }

    /// Confirmed UTXOs with pending mempool outputs added and mempool spends
    /// removed.
    pub async fn get_address_unspent_outputs(
        &self,
        addresses: &[String],
        options: &AddressQueryOptions,
    ) -> Result<Vec<AddressUtxo>, CoreError> {
        let addresses = self.normalize_addresses(addresses)?;

        let key = CacheKey::fingerprint("getaddressutxos", &addresses);
        let confirmed = match self.caches.utxos.get(&key).await {
            Some(utxos) => utxos,
            None => {
                let utxos = self
                    .pool
                    .try_all(|client| {
                        let addresses = &addresses;
                        async move { client.get_address_utxos(addresses).await }
                    })
                    .await?;
                self.caches.utxos.put(key, utxos.clone()).await;
                utxos
            }
        };

        if !options.query_mempool {
            return Ok(confirmed);
        }
        let deltas = self.mempool_deltas(&addresses).await?;
        Ok(reconcile_utxos(confirmed, &deltas, self.config.network))
    }

    /// Txids touching the addresses, newest first, mempool entries ahead of
    /// confirmed ones.
    pub async fn get_address_txids(
        &self,
        addresses: &[String],
        options: &AddressQueryOptions,
    ) -> Result<Vec<Txid>, CoreError> {
        let addresses = self.normalize_addresses(addresses)?;
        self.txids_for(&addresses, options).await
    }

    /// One page of detailed transactions for the addresses.
    pub async fn get_address_history(
        &self,
        addresses: &[String],
        options: &AddressQueryOptions,
    ) -> Result<AddressHistory, CoreError> {
        let addresses = self.normalize_addresses(addresses)?;
        let (from, to) = page_window(options, self.config.limits.max_transaction_history)?;

        let txids = self.txids_for(&addresses, options).await?;
        let total_count = txids.len();
        let page = paginate_txids(&txids, from, to)?;

        let watched: HashSet<&str> = addresses.iter().map(String::as_str).collect();
        let tip = self.height();
        let items = futures::stream::iter(page)
            .map(|txid| self.history_item(txid, &watched, tip))
            .buffered(self.config.limits.transaction_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(AddressHistory { total_count, items })
    }

    /// Balance and txid totals for the addresses. The confirmed part is
    /// cached until the tip moves; mempool figures are fetched on every call.
    pub async fn get_address_summary(
        &self,
        addresses: &[String],
        options: &AddressQueryOptions,
    ) -> Result<AddressSummary, CoreError> {
        let addresses = self.normalize_addresses(addresses)?;
        let range = options.height_range()?;

        let key = CacheKey::fingerprint("getaddresssummary", &addresses);
        let cached = match range {
            Some(_) => None,
            None => self.caches.summary.get(&key).await,
        };
        let record = match cached {
            Some(record) => record,
            None => {
                let record = SummaryRecord {
                    balance: self.confirmed_balance(&addresses).await?,
                    confirmed_txids: self.confirmed_txids(&addresses, range).await?,
                };
                if range.is_none() {
                    self.caches.summary.put(key, record.clone()).await;
                }
                record
            }
        };

        let deltas = if options.query_mempool && range.is_none() {
            self.mempool_deltas(&addresses).await?
        } else {
            Vec::new()
        };
        let mempool = mempool_txids(&deltas);
        let SummaryRecord {
            balance,
            confirmed_txids,
        } = record;

        let mut summary = AddressSummary {
            total_received: balance.received,
            total_spent: balance.received - balance.balance,
            balance: balance.balance,
            appearances: confirmed_txids.len(),
            unconfirmed_balance: unconfirmed_balance(&deltas),
            unconfirmed_appearances: mempool.len(),
            txids: None,
        };
        if !options.no_tx_list {
            let (from, to) = page_window(options, self.config.limits.max_txids)?;
            let txids = merge_txids(&mempool, &confirmed_txids);
            summary.txids = Some(paginate_txids(&txids, from, to)?);
        }
        Ok(summary)
    }

    // ==========================================================================
    // Helpers
    // ==========================================================================

    async fn txids_for(
        &self,
        addresses: &[String],
        options: &AddressQueryOptions,
    ) -> Result<Vec<Txid>, CoreError> {
        if options.query_mempool_only {
            return Ok(mempool_txids(&self.mempool_deltas(addresses).await?));
        }
        if let Some(range) = options.height_range()? {
            return self.confirmed_txids(addresses, Some(range)).await;
        }

        let mempool = if options.query_mempool {
            mempool_txids(&self.mempool_deltas(addresses).await?)
        } else {
            Vec::new()
        };
        let confirmed = self.confirmed_txids(addresses, None).await?;
        Ok(merge_txids(&mempool, &confirmed))
    }

    /// Confirmed txids, newest first. Range queries skip the cache.
    async fn confirmed_txids(
        &self,
        addresses: &[String],
        range: Option<HeightRange>,
    ) -> Result<Vec<Txid>, CoreError> {
        let key = CacheKey::fingerprint("getaddresstxids", addresses);
        if range.is_none() {
            if let Some(txids) = self.caches.txids.get(&key).await {
                return Ok(txids);
            }
        }

        let mut txids = self
            .pool
            .try_all(|client| async move { client.get_address_txids(addresses, range).await })
            .await?;
        txids.reverse();

        if range.is_none() {
            self.caches.txids.put(key, txids.clone()).await;
        }
        Ok(txids)
    }

    async fn confirmed_balance(&self, addresses: &[String]) -> Result<AddressBalance, CoreError> {
        let key = CacheKey::fingerprint("getaddressbalance", addresses);
        if let Some(balance) = self.caches.balance.get(&key).await {
            return Ok(balance);
        }
        let balance = self
            .pool
            .try_all(|client| async move { client.get_address_balance(addresses).await })
            .await?;
        self.caches.balance.put(key, balance).await;
        Ok(balance)
    }

    async fn mempool_deltas(&self, addresses: &[String]) -> Result<Vec<MempoolDelta>, CoreError> {
        self.pool
            .try_all(|client| async move { client.get_address_mempool(addresses).await })
            .await
    }

    async fn history_item(
        &self,
        txid: Txid,
        watched: &HashSet<&str>,
        tip: u32,
    ) -> Result<HistoryItem, CoreError> {
        let tx = self.get_detailed_transaction(&txid).await?;

        let mut addresses: BTreeMap<String, AddressIndexes> = BTreeMap::new();
        let mut satoshis: i64 = 0;
        for (index, input) in tx.inputs.iter().enumerate() {
            let Some(address) = input.address.as_deref().filter(|a| watched.contains(a)) else {
                continue;
            };
            addresses
                .entry(address.to_owned())
                .or_default()
                .input_indexes
                .push(index as u32);
            satoshis -= input.satoshis.unwrap_or(0);
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            let Some(address) = output.address.as_deref().filter(|a| watched.contains(a)) else {
                continue;
            };
            addresses
                .entry(address.to_owned())
                .or_default()
                .output_indexes
                .push(index as u32);
            satoshis += output.satoshis;
        }

        let confirmations = confirmations(tip, tx.height).unwrap_or_else(|| {
            warn!(txid = %txid, height = tx.height, tip, "transaction is above the known tip");
            0
        });

        Ok(HistoryItem {
            addresses,
            satoshis,
            confirmations,
            tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::super::test_support::service_with;
    use super::*;
    use crate::rpc::mock::MockRpc;
    use crate::test_util::txid_from_byte;
    use crate::types::PageBound;

    const ADDRESS: &str = "mgY65WSfEmsyYaYPQaXhmXMeBhwp4EcsQW";
    const OTHER: &str = "2N66DDrmjDCMM3yMSYtAQyAqRtasSkFhbmX";

    fn one() -> Vec<String> {
        vec![ADDRESS.to_owned()]
    }

    fn txid_json(b: u8) -> Value {
        json!(txid_from_byte(b).to_string())
    }

    fn delta(txid: u8, satoshis: i64, timestamp: u64) -> Value {
        json!({
            "address": ADDRESS,
            "txid": txid_from_byte(txid).to_string(),
            "index": 0,
            "satoshis": satoshis,
            "timestamp": timestamp
        })
    }

    fn verbose_tx(txid: u8, height: i64) -> Value {
        json!({
            "hex": "00",
            "txid": txid_from_byte(txid).to_string(),
            "height": height,
            "version": 1,
            "locktime": 0,
            "vin": [{
                "txid": txid_from_byte(200).to_string(),
                "vout": 1,
                "scriptSig": { "hex": "00", "asm": "0" },
                "sequence": 4294967295u32,
                "address": ADDRESS,
                "valueSat": 5000
            }],
            "vout": [
                {
                    "valueSat": 1000,
                    "scriptPubKey": { "hex": "76a9", "addresses": [ADDRESS] }
                },
                {
                    "valueSat": 3000,
                    "scriptPubKey": { "hex": "a914", "addresses": [OTHER] }
                }
            ]
        })
    }

    #[test]
    fn paginate_clamps_to_the_list() {
        let items = vec![1, 2, 3, 4];
        assert_eq!(paginate_txids(&items, 1, 3).expect("page"), vec![2, 3]);
        assert_eq!(paginate_txids(&items, 2, 50).expect("page"), vec![3, 4]);
        assert!(paginate_txids(&items, 10, 20).expect("page").is_empty());

        let err = paginate_txids(&items, 3, 3).expect_err("empty window");
        assert_eq!(
            err.to_string(),
            CoreError::InvalidArgument("\"from\" (3) is expected to be less than \"to\" (3)".to_owned())
                .to_string()
        );
    }

    #[test]
    fn page_window_enforces_the_limit() {
        let options = AddressQueryOptions {
            from: Some(PageBound::from("10")),
            to: Some(PageBound::from(80)),
            ..AddressQueryOptions::default()
        };
        let err = page_window(&options, 50).expect_err("window too wide");
        assert!(err
            .to_string()
            .contains("\"from\" (10) and \"to\" (80) range should be less than or equal to 50"));
        assert_eq!(page_window(&AddressQueryOptions::default(), 50).expect("defaults"), (0, 50));
    }

    #[tokio::test]
    async fn rejects_invalid_and_excess_addresses() {
        let rpc = Arc::new(MockRpc::builder().build());
        let (service, _node) = service_with(Arc::clone(&rpc)).await;

        let err = service
            .get_address_balance(&["bogus".to_owned()])
            .await
            .expect_err("invalid address");
        assert!(matches!(err, CoreError::InvalidAddress(_)));

        let too_many = vec![ADDRESS.to_owned(); service.config().limits.max_addresses_query + 1];
        let err = service.get_address_balance(&too_many).await.expect_err("too many");
        assert!(err.to_string().contains("Maximum number of addresses (10000) exceeded"));
        assert_eq!(rpc.total_calls(), 0);
    }

    #[tokio::test]
    async fn balance_is_cached_until_the_tip_moves() {
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getaddressbalance", json!({ "balance": 10, "received": 30 }))
                .build(),
        );
        let (service, _node) = service_with(Arc::clone(&rpc)).await;

        let balance = service.get_address_balance(&one()).await.expect("balance");
        assert_eq!(balance, AddressBalance { balance: 10, received: 30 });
        service.get_address_balance(&one()).await.expect("cached");
        assert_eq!(rpc.call_count("getaddressbalance"), 1);

        service.caches.reset_tip_scoped().await;
        service.get_address_balance(&one()).await.expect("refetched");
        assert_eq!(rpc.call_count("getaddressbalance"), 2);
    }

    #[tokio::test]
    async fn txids_put_mempool_ahead_of_confirmed() {
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getaddresstxids", json!([txid_json(1), txid_json(2), txid_json(3)]))
                .with_result(
                    "getaddressmempool",
                    json!([delta(9, 100, 10), delta(8, 100, 20), delta(3, -5, 5)]),
                )
                .build(),
        );
        let (service, _node) = service_with(Arc::clone(&rpc)).await;

        let txids = service
            .get_address_txids(&one(), &AddressQueryOptions::default())
            .await
            .expect("txids");
        let expected: Vec<Txid> = [8, 9, 3, 2, 1].into_iter().map(txid_from_byte).collect();
        assert_eq!(txids, expected);

        let mempool_only = AddressQueryOptions {
            query_mempool_only: true,
            ..AddressQueryOptions::default()
        };
        let txids = service.get_address_txids(&one(), &mempool_only).await.expect("mempool");
        assert_eq!(txids, vec![txid_from_byte(8), txid_from_byte(9), txid_from_byte(3)]);

        let confirmed_only = AddressQueryOptions {
            query_mempool: false,
            ..AddressQueryOptions::default()
        };
        let txids = service.get_address_txids(&one(), &confirmed_only).await.expect("confirmed");
        assert_eq!(txids, vec![txid_from_byte(3), txid_from_byte(2), txid_from_byte(1)]);
        assert_eq!(rpc.call_count("getaddresstxids"), 1);
    }

    #[tokio::test]
    async fn range_queries_bypass_cache_and_mempool() {
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getaddresstxids", json!([txid_json(1), txid_json(2)]))
                .build(),
        );
        let (service, _node) = service_with(Arc::clone(&rpc)).await;
        let options = AddressQueryOptions {
            start: Some(10),
            end: Some(20),
            ..AddressQueryOptions::default()
        };

        let txids = service.get_address_txids(&one(), &options).await.expect("range");
        assert_eq!(txids, vec![txid_from_byte(2), txid_from_byte(1)]);
        service.get_address_txids(&one(), &options).await.expect("range again");

        assert_eq!(rpc.call_count("getaddresstxids"), 2);
        assert_eq!(rpc.call_count("getaddressmempool"), 0);
        assert_eq!(
            rpc.params("getaddresstxids")[0],
            vec![json!({ "addresses": [ADDRESS], "start": 10, "end": 20 })]
        );

        let backwards = AddressQueryOptions {
            start: Some(20),
            end: Some(10),
            ..AddressQueryOptions::default()
        };
        let err = service.get_address_txids(&one(), &backwards).await.expect_err("bad range");
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unspent_outputs_fold_in_mempool() {
        let confirmed = json!([{
            "address": ADDRESS,
            "txid": txid_from_byte(1).to_string(),
            "outputIndex": 0,
            "script": "76a914",
            "satoshis": 500,
            "height": 100
        }]);
        let deltas = json!([
            {
                "address": ADDRESS,
                "txid": txid_from_byte(2).to_string(),
                "index": 0,
                "satoshis": -500,
                "timestamp": 10,
                "prevtxid": txid_from_byte(1).to_string(),
                "prevout": 0
            },
            delta(3, 400, 10)
        ]);
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getaddressutxos", confirmed)
                .with_result("getaddressmempool", deltas)
                .build(),
        );
        let (service, _node) = service_with(Arc::clone(&rpc)).await;

        let utxos = service
            .get_address_unspent_outputs(&one(), &AddressQueryOptions::default())
            .await
            .expect("utxos");
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].txid, txid_from_byte(3));
        assert_eq!(utxos[0].height, None);

        let confirmed_only = AddressQueryOptions {
            query_mempool: false,
            ..AddressQueryOptions::default()
        };
        let utxos = service
            .get_address_unspent_outputs(&one(), &confirmed_only)
            .await
            .expect("cached utxos");
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].txid, txid_from_byte(1));
        assert_eq!(rpc.call_count("getaddressutxos"), 1);
        assert_eq!(rpc.call_count("getaddressmempool"), 1);
    }

    #[tokio::test]
    async fn summary_combines_balance_and_txids() {
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getaddressbalance", json!({ "balance": 1000, "received": 5000 }))
                .with_result("getaddresstxids", json!([txid_json(1), txid_json(2)]))
                .with_result("getaddressmempool", json!([delta(7, 250, 30), delta(7, -50, 30)]))
                .build(),
        );
        let (service, _node) = service_with(Arc::clone(&rpc)).await;

        let summary = service
            .get_address_summary(&one(), &AddressQueryOptions::default())
            .await
            .expect("summary");
        assert_eq!(summary.total_received, 5000);
        assert_eq!(summary.total_spent, 4000);
        assert_eq!(summary.balance, 1000);
        assert_eq!(summary.appearances, 2);
        assert_eq!(summary.unconfirmed_balance, 200);
        assert_eq!(summary.unconfirmed_appearances, 1);
        assert_eq!(
            summary.txids,
            Some(vec![txid_from_byte(7), txid_from_byte(2), txid_from_byte(1)])
        );

        let paged = AddressQueryOptions {
            from: Some(PageBound::from(1)),
            to: Some(PageBound::from(2)),
            ..AddressQueryOptions::default()
        };
        let summary = service.get_address_summary(&one(), &paged).await.expect("page");
        assert_eq!(summary.txids, Some(vec![txid_from_byte(2)]));

        let no_list = AddressQueryOptions {
            no_tx_list: true,
            ..AddressQueryOptions::default()
        };
        let summary = service.get_address_summary(&one(), &no_list).await.expect("no list");
        assert_eq!(summary.txids, None);
        assert_eq!(rpc.call_count("getaddressbalance"), 1);
        assert_eq!(rpc.call_count("getaddresstxids"), 1);
        assert_eq!(rpc.call_count("getaddressmempool"), 3);
    }

    #[tokio::test]
    async fn summary_sees_new_mempool_entries_between_blocks() {
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getaddressbalance", json!({ "balance": 1000, "received": 5000 }))
                .with_result("getaddresstxids", json!([txid_json(1)]))
                .with_result("getaddressmempool", json!([]))
                .build(),
        );
        let (service, _node) = service_with(Arc::clone(&rpc)).await;
        let options = AddressQueryOptions::default();

        let before = service.get_address_summary(&one(), &options).await.expect("summary");
        assert_eq!(before.unconfirmed_balance, 0);
        assert_eq!(before.unconfirmed_appearances, 0);

        rpc.set_result("getaddressmempool", json!([delta(7, 250, 30)]));
        let after = service.get_address_summary(&one(), &options).await.expect("summary");
        assert_eq!(after.unconfirmed_balance, 250);
        assert_eq!(after.unconfirmed_appearances, 1);
        assert_eq!(after.appearances, 1);
        assert_eq!(after.txids, Some(vec![txid_from_byte(7), txid_from_byte(1)]));

        assert_eq!(rpc.call_count("getaddressbalance"), 1);
        assert_eq!(rpc.call_count("getaddresstxids"), 1);
        assert_eq!(rpc.call_count("getaddressmempool"), 2);
    }

    #[tokio::test]
    async fn mempool_only_takes_precedence_over_a_range() {
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getaddresstxids", json!([txid_json(1)]))
                .with_result("getaddressmempool", json!([delta(9, 100, 10)]))
                .build(),
        );
        let (service, _node) = service_with(Arc::clone(&rpc)).await;
        let options = AddressQueryOptions {
            query_mempool_only: true,
            start: Some(10),
            end: Some(20),
            ..AddressQueryOptions::default()
        };

        let txids = service.get_address_txids(&one(), &options).await.expect("mempool");
        assert_eq!(txids, vec![txid_from_byte(9)]);
        assert_eq!(rpc.call_count("getaddresstxids"), 0);
        assert_eq!(rpc.call_count("getaddressmempool"), 1);
    }

    #[tokio::test]
    async fn history_reports_per_address_effects() {
        let rpc = Arc::new(
            MockRpc::builder()
                .with_result("getaddresstxids", json!([txid_json(1)]))
                .with_result("getaddressmempool", json!([]))
                .with_result("getrawtransaction", verbose_tx(1, 8))
                .build(),
        );
        let (service, _node) = service_with(rpc).await;
        service.set_height(10);

        let history = service
            .get_address_history(&one(), &AddressQueryOptions::default())
            .await
            .expect("history");
        assert_eq!(history.total_count, 1);
        let item = &history.items[0];
        assert_eq!(item.satoshis, 1000 - 5000);
        assert_eq!(item.confirmations, 3);
        assert_eq!(
            item.addresses.get(ADDRESS),
            Some(&AddressIndexes {
                input_indexes: vec![0],
                output_indexes: vec![0],
            })
        );
        assert!(!item.addresses.contains_key(OTHER));
    }

    #[tokio::test]
    async fn history_rejects_wide_windows() {
        let rpc = Arc::new(MockRpc::builder().build());
        let (service, _node) = service_with(Arc::clone(&rpc)).await;
        let options = AddressQueryOptions {
            from: Some(PageBound::from(0)),
            to: Some(PageBound::from(51)),
            ..AddressQueryOptions::default()
        };
        let err = service
            .get_address_history(&one(), &options)
            .await
            .expect_err("window too wide");
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(rpc.total_calls(), 0);
    }
}
