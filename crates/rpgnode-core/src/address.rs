//! Base58check addresses for the rpgd chain and destination extraction from
//! transaction scripts.
//!
//! Only the two legacy destination kinds exist on this chain: pay-to-pubkey-hash
//! and pay-to-script-hash. Anything else is treated as non-standard and has no
//! address.

use std::fmt;

use bitcoin::base58;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::script::Instruction;
use bitcoin::{PubkeyHash, Script, ScriptBuf, ScriptHash, Transaction};

use crate::error::CoreError;
use crate::network::ChainNetwork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    PubkeyHash,
    ScriptHash,
}

/// A decoded address bound to the network it was encoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainAddress {
    network: ChainNetwork,
    kind: AddressKind,
    hash: [u8; 20],
}

impl ChainAddress {
    /// Decode a base58check string, rejecting addresses of other networks.
    pub fn parse(s: &str, network: ChainNetwork) -> Result<Self, CoreError> {
        let data = base58::decode_check(s)
            .map_err(|e| CoreError::InvalidAddress(format!("`{s}`: {e}")))?;
        if data.len() != 21 {
            return Err(CoreError::InvalidAddress(format!(
                "`{s}`: expected 21 payload bytes, got {}",
                data.len()
            )));
        }

        let kind = if data[0] == network.pubkey_hash_version() {
            AddressKind::PubkeyHash
        } else if data[0] == network.script_hash_version() {
            AddressKind::ScriptHash
        } else {
            return Err(CoreError::InvalidAddress(format!(
                "`{s}`: version byte {} is not valid for {network}",
                data[0]
            )));
        };

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&data[1..]);
        Ok(Self {
            network,
            kind,
            hash,
        })
    }

    pub fn is_valid(s: &str, network: ChainNetwork) -> bool {
        Self::parse(s, network).is_ok()
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// Destination of a standard output script.
    pub fn from_script_pubkey(script: &Script, network: ChainNetwork) -> Option<Self> {
        let bytes = script.as_bytes();
        let (kind, range) = if script.is_p2pkh() {
            (AddressKind::PubkeyHash, 3..23)
        } else if script.is_p2sh() {
            (AddressKind::ScriptHash, 2..22)
        } else {
            return None;
        };

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[range]);
        Some(Self {
            network,
            kind,
            hash,
        })
    }

    /// Destination spent by an input, recovered from its unlocking script.
    ///
    /// Recognises `<sig> <pubkey>` (pay-to-pubkey-hash) and
    /// `OP_0 <sig>... <redeem multisig>` (pay-to-script-hash).
    pub fn from_script_sig(script_sig: &Script, network: ChainNetwork) -> Option<Self> {
        let mut pushes = Vec::new();
        for instruction in script_sig.instructions() {
            match instruction.ok()? {
                Instruction::PushBytes(bytes) => pushes.push(bytes.as_bytes()),
                Instruction::Op(_) => return None,
            }
        }

        if pushes.len() == 2 && is_public_key(pushes[1]) {
            return Some(Self {
                network,
                kind: AddressKind::PubkeyHash,
                hash: hash160::Hash::hash(pushes[1]).to_byte_array(),
            });
        }

        if pushes.len() >= 2 && pushes[0].is_empty() {
            let redeem = pushes[pushes.len() - 1];
            if Script::from_bytes(redeem).is_multisig() {
                return Some(Self {
                    network,
                    kind: AddressKind::ScriptHash,
                    hash: hash160::Hash::hash(redeem).to_byte_array(),
                });
            }
        }

        None
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        match self.kind {
            AddressKind::PubkeyHash => {
                ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(self.hash))
            }
            AddressKind::ScriptHash => {
                ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(self.hash))
            }
        }
    }

    /// Pay-to-pubkey-hash script over this address's hash, whatever its kind.
    ///
    /// Mempool deltas do not carry a script, so this is the locking script
    /// assumed for unconfirmed outputs. P2SH addresses get the same P2PKH
    /// layout, which is not their real script.
    pub fn assumed_p2pkh_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(self.hash))
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = match self.kind {
            AddressKind::PubkeyHash => self.network.pubkey_hash_version(),
            AddressKind::ScriptHash => self.network.script_hash_version(),
        };
        let mut payload = Vec::with_capacity(21);
        payload.push(version);
        payload.extend_from_slice(&self.hash);
        f.write_str(&base58::encode_check(&payload))
    }
}

fn is_public_key(bytes: &[u8]) -> bool {
    match bytes.len() {
        33 => matches!(bytes[0], 0x02 | 0x03),
        65 => bytes[0] == 0x04,
        _ => false,
    }
}

/// Unique destination addresses touched by `tx`, inputs first, in first-seen
/// order. Non-standard scripts and coinbase inputs contribute nothing.
pub fn addresses_from_transaction(tx: &Transaction, network: ChainNetwork) -> Vec<String> {
    let from_inputs = tx
        .input
        .iter()
        .filter(|input| !input.previous_output.is_null() && !input.script_sig.is_empty())
        .filter_map(|input| ChainAddress::from_script_sig(&input.script_sig, network));
    let from_outputs = tx
        .output
        .iter()
        .filter_map(|output| ChainAddress::from_script_pubkey(&output.script_pubkey, network));

    let mut addresses: Vec<String> = Vec::new();
    for address in from_inputs.chain(from_outputs) {
        let encoded = address.to_string();
        if !addresses.contains(&encoded) {
            addresses.push(encoded);
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_transaction;

    #[test]
    fn parses_mainnet_pubkey_hash_address() {
        let address = ChainAddress::parse("RJYZeWxr1Ly8YgcvJU1qD5MR9jUtk14HkN", ChainNetwork::Livenet)
            .expect("mainnet address must parse");
        assert_eq!(address.kind(), AddressKind::PubkeyHash);
        assert_eq!(address.to_string(), "RJYZeWxr1Ly8YgcvJU1qD5MR9jUtk14HkN");
    }

    #[test]
    fn parses_mainnet_script_hash_address() {
        let address = ChainAddress::parse("rAfsiNFiHsvDwEA1JsaE9Qmad5CgPVbELh", ChainNetwork::Livenet)
            .expect("mainnet script address must parse");
        assert_eq!(address.kind(), AddressKind::ScriptHash);
    }

    #[test]
    fn rejects_address_from_other_network() {
        let err = ChainAddress::parse("RJYZeWxr1Ly8YgcvJU1qD5MR9jUtk14HkN", ChainNetwork::Testnet)
            .expect_err("mainnet address is not valid on testnet");
        assert!(err.to_string().contains("not valid for testnet"));
        assert!(!ChainAddress::is_valid("not-an-address", ChainNetwork::Livenet));
    }

    #[test]
    fn assumed_script_is_pay_to_pubkey_hash() {
        let address = ChainAddress::parse("RM1FZ5Q4sKxsM1a97dLoUrjZYHZ7B6MKja", ChainNetwork::Livenet)
            .expect("address must parse");
        assert_eq!(
            address.assumed_p2pkh_script().to_hex_string(),
            "76a914809dc14496f99b6deb722cf46d89d22f4beb8efd88ac"
        );
    }

    #[test]
    fn output_script_round_trips_to_address() {
        let script =
            ScriptBuf::from_hex("76a9140b2f0a0c31bfe0406b0ccc1381fdbe311946dadc88ac").expect("hex");
        let address = ChainAddress::from_script_pubkey(&script, ChainNetwork::Testnet)
            .expect("p2pkh output has an address");
        assert_eq!(address.to_string(), "mgY65WSfEmsyYaYPQaXhmXMeBhwp4EcsQW");
        assert_eq!(address.script_pubkey(), script);
    }

    #[test]
    fn extracts_unique_addresses_from_multisig_spend() {
        let tx = sample_transaction();
        let addresses = addresses_from_transaction(&tx, ChainNetwork::Testnet);
        // The input spends the same script hash the second output pays back to.
        assert_eq!(
            addresses,
            vec![
                "2N66DDrmjDCMM3yMSYtAQyAqRtasSkFhbmX".to_owned(),
                "2N5qvwD3qa5uVerP4Wp3op5k5C3jgXUYu4a".to_owned(),
            ]
        );
    }

    #[test]
    fn non_standard_scripts_are_skipped() {
        let op_return = ScriptBuf::from_hex("6a0401020304").expect("hex");
        assert!(ChainAddress::from_script_pubkey(&op_return, ChainNetwork::Livenet).is_none());

        let garbage = ScriptBuf::from_hex("4c").expect("hex");
        assert!(ChainAddress::from_script_sig(&garbage, ChainNetwork::Livenet).is_none());
    }
}
