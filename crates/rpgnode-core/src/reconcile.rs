//! Merging confirmed address state with pending mempool deltas.
//!
//! These are pure functions over daemon results. The query layer fetches the
//! confirmed set and the deltas, then hands both here.

use std::collections::HashSet;

use bitcoin::Txid;
use tracing::debug;

use crate::address::ChainAddress;
use crate::network::ChainNetwork;
use crate::types::{AddressUtxo, MempoolDelta};

/// Apply mempool deltas to a confirmed UTXO set.
///
/// Deltas without a previous outpoint become candidate outputs, newest
/// first, ahead of the confirmed entries. A delta without a script gets the
/// P2PKH script over its address hash, P2SH addresses included; only
/// deltas whose address does not decode are dropped. Deltas with one remove that
/// outpoint from the combined set, whichever order the deltas arrive in.
pub fn reconcile_utxos(
    confirmed: Vec<AddressUtxo>,
    deltas: &[MempoolDelta],
    network: ChainNetwork,
) -> Vec<AddressUtxo> {
    let spent: HashSet<(Txid, u32)> = deltas
        .iter()
        .filter_map(MempoolDelta::spent_outpoint)
        .collect();

    let mut additions: Vec<AddressUtxo> = Vec::new();
    let mut seen: HashSet<(Txid, u32)> = HashSet::new();
    for delta in deltas.iter().filter(|d| d.spent_outpoint().is_none()) {
        if !seen.insert((delta.txid, delta.index)) {
            continue;
        }
        let Some(script) = delta
            .script
            .clone()
            .or_else(|| assumed_script(&delta.address, network))
        else {
            debug!(
                address = %delta.address,
                txid = %delta.txid,
                "skipping mempool output with an undecodable address"
            );
            continue;
        };
        additions.push(AddressUtxo {
            address: delta.address.clone(),
            txid: delta.txid,
            output_index: delta.index,
            script,
            satoshis: delta.satoshis,
            height: None,
            timestamp: Some(delta.timestamp),
        });
    }
    additions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    additions
        .into_iter()
        .chain(confirmed)
        .filter(|utxo| !spent.contains(&(utxo.txid, utxo.output_index)))
        .collect()
}

/// Net unconfirmed change across all deltas.
pub fn unconfirmed_balance(deltas: &[MempoolDelta]) -> i64 {
    deltas.iter().map(|d| d.satoshis).sum()
}

/// Unique mempool txids, most recent first.
///
/// Txids keep the timestamp of their first delta. Equal timestamps put the
/// later-listed transaction first.
pub fn mempool_txids(deltas: &[MempoolDelta]) -> Vec<Txid> {
    let mut seen = HashSet::new();
    let mut unique: Vec<(Txid, u64)> = deltas
        .iter()
        .filter(|d| seen.insert(d.txid))
        .map(|d| (d.txid, d.timestamp))
        .collect();
    unique.reverse();
    unique.sort_by(|a, b| b.1.cmp(&a.1));
    unique.into_iter().map(|(txid, _)| txid).collect()
}

/// Mempool txids followed by confirmed txids, without repeats.
pub fn merge_txids(mempool: &[Txid], confirmed: &[Txid]) -> Vec<Txid> {
    let mut seen = HashSet::with_capacity(mempool.len() + confirmed.len());
    mempool
        .iter()
        .chain(confirmed)
        .filter(|txid| seen.insert(**txid))
        .copied()
        .collect()
}

fn assumed_script(address: &str, network: ChainNetwork) -> Option<String> {
    ChainAddress::parse(address, network)
        .ok()
        .map(|a| a.assumed_p2pkh_script().to_hex_string())
}
