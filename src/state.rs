//! World state kept in keyed tries: accounts (each with its own storage
//! trie), validator standing, and produce records. The account trie's root
//! hash is the state root.

use crate::blockchain::Block;
use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::{QualityDecision, Transaction, Vote};
use crate::trie::KeyedTrie;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    pub public_key: Address,
    pub payload: Value,
    pub storage_root: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorEntry {
    pub reputation: i32,
    pub approvals: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceEntry {
    pub producer_id: String,
    pub quality_score: u32,
    pub decision: QualityDecision,
    pub iot_data_ref: Option<String>,
    pub validation_records: BTreeMap<String, Vote>,
    /// Approved by the quality oracle rather than a validator majority.
    pub ai_override: bool,
    /// Hash of the block the transaction was committed in.
    pub block_hash: Option<String>,
}

impl ProduceEntry {
    pub fn from_transaction(tx: &Transaction) -> Self {
        ProduceEntry {
            producer_id: tx.producer_id.clone(),
            quality_score: tx.quality_score,
            decision: tx.quality_decision,
            iot_data_ref: tx.iot_data_ref.clone(),
            validation_records: tx.validator_approvals.clone(),
            ai_override: tx.quality_decision == QualityDecision::AiApproved,
            block_hash: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorldState {
    state_trie: KeyedTrie<AccountEntry>,
    storage_tries: BTreeMap<Address, KeyedTrie<Value>>,
    validator_trie: KeyedTrie<ValidatorEntry>,
    produce_trie: KeyedTrie<ProduceEntry>,
    producer_history: BTreeMap<String, Vec<QualityDecision>>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_root(&self) -> &str {
        self.state_trie.root_hash()
    }

    pub fn put_account(&mut self, public_key: &str, payload: Value) -> Result<(), ChainError> {
        let storage_root = self
            .storage_tries
            .entry(public_key.to_string())
            .or_default()
            .root_hash()
            .to_string();
        self.state_trie.put(
            public_key,
            AccountEntry {
                public_key: public_key.to_string(),
                payload,
                storage_root,
            },
        )
    }

    pub fn get_account(&self, public_key: &str) -> Option<AccountEntry> {
        self.state_trie.get(public_key)
    }

    /// Write into an account's storage trie and refresh its storage root.
    pub fn put_storage(&mut self, public_key: &str, key: &str, value: Value) -> Result<(), ChainError> {
        self.storage_tries
            .entry(public_key.to_string())
            .or_default()
            .put(key, value)?;
        let payload = self
            .get_account(public_key)
            .map_or(Value::Null, |account| account.payload);
        self.put_account(public_key, payload)
    }

    pub fn get_storage(&self, public_key: &str, key: &str) -> Option<Value> {
        self.storage_tries.get(public_key)?.get(key)
    }

    /// Accumulate reputation and approval deltas for a validator.
    pub fn put_validator(&mut self, public_key: &str, reputation: i32, approvals: u64) -> Result<(), ChainError> {
        let existing = self.validator_trie.get(public_key).unwrap_or_default();
        self.validator_trie.put(
            public_key,
            ValidatorEntry {
                reputation: existing.reputation + reputation,
                approvals: existing.approvals + approvals,
            },
        )
    }

    pub fn get_validator(&self, public_key: &str) -> Option<ValidatorEntry> {
        self.validator_trie.get(public_key)
    }

    pub fn put_produce(&mut self, produce_id: &str, entry: ProduceEntry) -> Result<(), ChainError> {
        self.produce_trie.put(produce_id, entry)
    }

    pub fn get_produce(&self, produce_id: &str) -> Option<ProduceEntry> {
        self.produce_trie.get(produce_id)
    }

    /// Record a finalized decision for the producer's fraud history.
    pub fn record_decision(&mut self, tx: &Transaction) -> Result<(), ChainError> {
        self.producer_history
            .entry(tx.producer_id.clone())
            .or_default()
            .push(tx.quality_decision);
        self.put_produce(&tx.id, ProduceEntry::from_transaction(tx))
    }

    pub fn producer_history(&self, producer_id: &str) -> &[QualityDecision] {
        self.producer_history
            .get(producer_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fold a committed block into the produce and account tries.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), ChainError> {
        for tx in block.data.iter().filter(|tx| !tx.is_reward()) {
            let mut entry = ProduceEntry::from_transaction(tx);
            entry.block_hash = Some(block.hash.clone());
            self.put_produce(&tx.id, entry)?;

            for address in tx.output_map.keys() {
                self.put_account(
                    address,
                    json!({ "lastTransaction": tx.id, "lastBlock": block.hash }),
                )?;
            }
        }
        debug!(block = %block.hash, state_root = %self.state_root(), "State updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::transaction::ProduceOrder;

    #[test]
    fn test_account_storage_root_follows_storage() {
        let mut state = WorldState::new();
        state.put_account("alice", json!({"role": "farmer"})).unwrap();
        let first = state.get_account("alice").unwrap();
        let root_before = state.state_root().to_string();

        state.put_storage("alice", "certificate", json!("organic")).unwrap();
        let second = state.get_account("alice").unwrap();

        assert_ne!(first.storage_root, second.storage_root);
        assert_eq!(second.payload, json!({"role": "farmer"}));
        assert_ne!(state.state_root(), root_before);
        assert_eq!(state.get_storage("alice", "certificate"), Some(json!("organic")));
    }

    #[test]
    fn test_validator_entries_accumulate() {
        let mut state = WorldState::new();
        state.put_validator("v1", 5, 1).unwrap();
        state.put_validator("v1", -10, 0).unwrap();
        assert_eq!(
            state.get_validator("v1"),
            Some(ValidatorEntry { reputation: -5, approvals: 1 })
        );
    }

    #[test]
    fn test_apply_block_records_produce() {
        let buyer = KeyPair::generate().unwrap();
        let farmer = KeyPair::generate().unwrap();
        let mut tx = Transaction::new_produce(
            &buyer,
            1000.0,
            ProduceOrder {
                producer: farmer.address(),
                producer_id: "farmer-9".to_string(),
                price_per_kg: 3.0,
                quantity: 3.0,
                iot_data_ref: Some("iot-ref".to_string()),
                sample_data_ref: None,
            },
        )
        .unwrap();
        tx.quality_decision = QualityDecision::AiApproved;

        let mut state = WorldState::new();
        state.record_decision(&tx).unwrap();
        assert_eq!(state.producer_history("farmer-9"), &[QualityDecision::AiApproved]);
        assert!(state.producer_history("unknown").is_empty());

        let block = Block {
            data: vec![tx.clone()],
            hash: "block-hash".to_string(),
            ..Block::genesis()
        };
        state.apply_block(&block).unwrap();

        let produce = state.get_produce(&tx.id).unwrap();
        assert!(produce.ai_override);
        assert_eq!(produce.block_hash.as_deref(), Some("block-hash"));
        assert!(state.get_account(&farmer.address()).is_some());
        assert!(state.get_account(&buyer.address()).is_some());
    }
}
