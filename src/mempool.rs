//! Pending, rejected and stake-vouched produce transactions.

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::quality::{OracleDecision, QualityOracle, SensorReading};
use crate::transaction::{QualityDecision, Transaction};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transaction_map: BTreeMap<String, Transaction>,
    rejected: BTreeMap<String, Transaction>,
    /// Transaction id to the validator whose stake vouches for it.
    staked: BTreeMap<String, String>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transaction(&mut self, transaction: Transaction) {
        self.transaction_map.insert(transaction.id.clone(), transaction);
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.transaction_map.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Transaction> {
        self.transaction_map.get_mut(id)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transaction_map.values()
    }

    pub fn transaction_map(&self) -> &BTreeMap<String, Transaction> {
        &self.transaction_map
    }

    pub fn rejected_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.rejected.values()
    }

    pub fn staked_by(&self, tx_id: &str) -> Option<&str> {
        self.staked.get(tx_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.transaction_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transaction_map.is_empty()
    }

    pub fn existing_transaction(&self, input_address: &str) -> Option<&Transaction> {
        self.transaction_map
            .values()
            .find(|tx| tx.input.address == input_address)
    }

    /// Transactions ready for a block: an affirmative majority of their
    /// assigned validators, an approving decision, or a stake override.
    pub fn valid_transactions(&self) -> Vec<Transaction> {
        self.transaction_map
            .values()
            .filter(|tx| {
                let majority = !tx.assigned_validators.is_empty() && tx.affirmative_votes() >= tx.majority_threshold();
                majority || tx.quality_decision.is_approved() || self.staked.contains_key(&tx.id)
            })
            .cloned()
            .collect()
    }

    /// Move a pending transaction to the rejected set for later review.
    pub fn reject_transaction(&mut self, id: &str) -> bool {
        let Some(tx) = self.transaction_map.remove(id) else {
            return false;
        };
        info!(tx_id = id, "Transaction rejected and stored for review");
        self.rejected.insert(tx.id.clone(), tx);
        true
    }

    /// A validator stakes on a rejected transaction, returning it to the pool
    /// as approved.
    pub fn stake_validator_transaction(&mut self, tx_id: &str, validator_id: &str) -> Result<(), ChainError> {
        let Some(mut tx) = self.rejected.remove(tx_id) else {
            return Err(ChainError::TransactionNotFound(format!(
                "{} is not in the rejected list",
                tx_id
            )));
        };
        tx.apply_stake_override(validator_id);
        self.staked.insert(tx_id.to_string(), validator_id.to_string());
        self.set_transaction(tx);
        info!(tx_id, validator = validator_id, "Validator staked approval for transaction");
        Ok(())
    }

    /// Re-run the oracle over rejected transactions. `resolve` loads the IoT
    /// and sample readings of a transaction. Returns the ids moved back.
    pub fn revalidate_rejected<F>(&mut self, oracle: &dyn QualityOracle, resolve: F) -> Vec<String>
    where
        F: Fn(&Transaction) -> (Option<SensorReading>, Option<SensorReading>),
    {
        let ids: Vec<String> = self.rejected.keys().cloned().collect();
        let mut restored = Vec::new();

        for id in ids {
            let Some(mut tx) = self.rejected.remove(&id) else {
                continue;
            };

            if let Some(validator) = self.staked.get(&id).cloned() {
                info!(tx_id = %id, validator = %validator, "Validator override restored transaction");
                tx.apply_stake_override(&validator);
                self.set_transaction(tx);
                restored.push(id);
                continue;
            }

            let (iot, sample) = resolve(&tx);
            let assessment = oracle.evaluate(iot.as_ref(), sample.as_ref(), &tx.producer_id, &[]);
            if assessment.decision == OracleDecision::AutoApprove {
                info!(tx_id = %id, score = assessment.quality_score, "Quality oracle auto-approved rejected transaction");
                tx.quality_score = assessment.quality_score;
                tx.quality_decision = QualityDecision::AiApproved;
                tx.decision_reason = Some(assessment.reason);
                self.set_transaction(tx);
                restored.push(id);
            } else {
                info!(tx_id = %id, "Transaction remains rejected");
                self.rejected.insert(id, tx);
            }
        }
        restored
    }

    /// Drop exactly the transactions contained in `block`.
    pub fn remove_committed(&mut self, block: &Block) -> usize {
        let ids: HashSet<&str> = block.data.iter().map(|tx| tx.id.as_str()).collect();
        let before = self.transaction_map.len();
        self.transaction_map.retain(|id, _| !ids.contains(id.as_str()));
        self.staked.retain(|id, _| !ids.contains(id.as_str()));
        before - self.transaction_map.len()
    }

    /// Drop every pooled transaction that already appears in `chain`.
    pub fn clear_blockchain_transactions(&mut self, chain: &[Block]) {
        for block in chain.iter().skip(1) {
            self.remove_committed(block);
        }
    }
}
