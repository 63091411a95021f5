//! Validator registry with reputation and bounded work queues.
//!
//! Assignment prefers the most reputable validators, breaking ties by the
//! shortest queue and then by id, and never lets a queue grow beyond
//! `MAX_QUEUE_LENGTH`. The node keeps the pool behind a single lock, so the
//! capacity check and the queue push happen atomically.

use crate::config::{INITIAL_REPUTATION, MAX_QUEUE_LENGTH, MAX_REPUTATION, MIN_REPUTATION};
use crate::error::ChainError;
use crate::quality::{detect_validator_fraud, ValidationRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

const ACCURATE_REWARD: i32 = 5;
const INACCURATE_PENALTY: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorRecord {
    pub id: String,
    pub reputation: i32,
    pub assigned_count: u64,
    pub total_approvals: u64,
    pub total_rejections: u64,
    pub queue: Vec<String>,
}

impl ValidatorRecord {
    pub fn new(id: &str) -> Self {
        ValidatorRecord {
            id: id.to_string(),
            reputation: INITIAL_REPUTATION,
            assigned_count: 0,
            total_approvals: 0,
            total_rejections: 0,
            queue: Vec::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.queue.len() < MAX_QUEUE_LENGTH
    }
}

/// The pool as exchanged on the validator-pool channel.
pub type ValidatorPoolSnapshot = BTreeMap<String, ValidatorRecord>;

#[derive(Debug, Clone, Default)]
pub struct ValidatorPool {
    validators: BTreeMap<String, ValidatorRecord>,
    history: BTreeMap<String, Vec<ValidationRecord>>,
}

impl ValidatorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; returns whether the validator was new.
    pub fn register_validator(&mut self, id: &str) -> bool {
        if self.validators.contains_key(id) {
            return false;
        }
        self.validators.insert(id.to_string(), ValidatorRecord::new(id));
        info!(validator = id, reputation = INITIAL_REPUTATION, "Validator registered");
        true
    }

    pub fn get(&self, id: &str) -> Option<&ValidatorRecord> {
        self.validators.get(id)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn active_validators(&self) -> Vec<String> {
        self.validators.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> ValidatorPoolSnapshot {
        self.validators.clone()
    }

    /// Assign up to `count` validators to `tx_id`, queueing the transaction
    /// with each of them.
    pub fn assign_transaction(&mut self, tx_id: &str, count: usize) -> Result<Vec<String>, ChainError> {
        let mut candidates: Vec<&ValidatorRecord> = self
            .validators
            .values()
            .filter(|record| record.has_capacity())
            .collect();
        candidates.sort_by(|a, b| {
            b.reputation
                .cmp(&a.reputation)
                .then(a.queue.len().cmp(&b.queue.len()))
                .then(a.id.cmp(&b.id))
        });
        let chosen: Vec<String> = candidates
            .into_iter()
            .take(count)
            .map(|record| record.id.clone())
            .collect();

        if chosen.is_empty() {
            warn!(tx_id, "All validator queues are full");
            return Err(ChainError::CapacityExhausted(format!(
                "No validator can take transaction {}",
                tx_id
            )));
        }

        for id in &chosen {
            if let Some(record) = self.validators.get_mut(id) {
                record.queue.push(tx_id.to_string());
                record.assigned_count += 1;
            }
        }
        info!(tx_id, validators = ?chosen, "Transaction assigned");
        Ok(chosen)
    }

    pub fn remove_transaction_from_queue(&mut self, id: &str, tx_id: &str) -> bool {
        let Some(record) = self.validators.get_mut(id) else {
            return false;
        };
        match record.queue.iter().position(|queued| queued == tx_id) {
            Some(index) => {
                record.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Reward or penalize a validator. Returns the new reputation, or `None`
    /// when the validator is unknown. Validators falling below the minimum
    /// reputation are removed.
    pub fn update_reputation(&mut self, id: &str, accurate: bool) -> Option<i32> {
        let record = self.validators.get_mut(id)?;
        if accurate {
            record.reputation += ACCURATE_REWARD;
            record.total_approvals += 1;
        } else {
            record.reputation -= INACCURATE_PENALTY;
            record.total_rejections += 1;
        }
        record.reputation = record.reputation.clamp(0, MAX_REPUTATION);
        let reputation = record.reputation;

        if reputation < MIN_REPUTATION {
            warn!(validator = id, reputation, "Validator removed due to low reputation");
            self.validators.remove(id);
            self.history.remove(id);
        } else {
            info!(validator = id, reputation, "Validator reputation updated");
        }
        Some(reputation)
    }

    /// Append to a validator's voting history and run the fraud heuristic.
    /// A flagged validator is penalized; the fraud reason is returned.
    pub fn record_validation(&mut self, id: &str, record: ValidationRecord) -> Option<String> {
        if !self.validators.contains_key(id) {
            return None;
        }
        let history = self.history.entry(id.to_string()).or_default();
        history.push(record);
        let reason = detect_validator_fraud(id, history)?;
        self.update_reputation(id, false);
        Some(reason)
    }

    /// Replace the whole pool with a peer's snapshot, last writer wins.
    /// Snapshots with overfull queues or out-of-range reputations are refused.
    pub fn sync_validator_pool(&mut self, snapshot: ValidatorPoolSnapshot) -> Result<(), ChainError> {
        for (id, record) in &snapshot {
            if *id != record.id {
                return Err(ChainError::InvalidSnapshot(format!(
                    "Validator snapshot key {} does not match record id {}",
                    id, record.id
                )));
            }
            if record.queue.len() > MAX_QUEUE_LENGTH {
                return Err(ChainError::InvalidSnapshot(format!(
                    "Validator {} queue holds {} transactions (max {})",
                    id,
                    record.queue.len(),
                    MAX_QUEUE_LENGTH
                )));
            }
            if !(MIN_REPUTATION..=MAX_REPUTATION).contains(&record.reputation) {
                return Err(ChainError::InvalidSnapshot(format!(
                    "Validator {} reputation {} is out of range",
                    id, record.reputation
                )));
            }
        }
        self.history.retain(|id, _| snapshot.contains_key(id));
        self.validators = snapshot;
        info!(validators = self.validators.len(), "Validator pool synchronized with network");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Vote;

    fn pool_with(ids: &[&str]) -> ValidatorPool {
        let mut pool = ValidatorPool::new();
        for id in ids {
            pool.register_validator(id);
        }
        pool
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut pool = ValidatorPool::new();
        assert!(pool.register_validator("v1"));
        pool.update_reputation("v1", true);
        assert!(!pool.register_validator("v1"));
        assert_eq!(pool.get("v1").unwrap().reputation, 105);
    }

    #[test]
    fn test_assignment_order() {
        let mut pool = pool_with(&["a", "b", "c", "d"]);
        pool.update_reputation("d", true);
        pool.assign_transaction("warmup", 1).unwrap();

        // warmup went to d; the remaining equals break ties on id.
        let assigned = pool.assign_transaction("tx", 3).unwrap();
        assert_eq!(assigned, vec!["d", "a", "b"]);
    }

    #[test]
    fn test_ties_prefer_shorter_queue() {
        let mut pool = pool_with(&["a", "b"]);
        pool.assign_transaction("t1", 1).unwrap();
        assert_eq!(pool.get("a").unwrap().queue, vec!["t1"]);
        assert_eq!(pool.assign_transaction("t2", 1).unwrap(), vec!["b"]);
    }

    #[test]
    fn test_queue_never_exceeds_bound() {
        let mut pool = pool_with(&["v1", "v2"]);
        for i in 0..MAX_QUEUE_LENGTH {
            let assigned = pool.assign_transaction(&format!("tx-{}", i), 2).unwrap();
            assert_eq!(assigned.len(), 2);
        }
        for id in ["v1", "v2"] {
            assert_eq!(pool.get(id).unwrap().queue.len(), MAX_QUEUE_LENGTH);
        }

        let err = pool.assign_transaction("overflow", 2).unwrap_err();
        assert!(matches!(err, ChainError::CapacityExhausted(_)));

        assert!(pool.remove_transaction_from_queue("v1", "tx-0"));
        assert!(!pool.remove_transaction_from_queue("v1", "tx-0"));
        assert_eq!(pool.assign_transaction("overflow", 2).unwrap(), vec!["v1"]);
    }

    #[test]
    fn test_reputation_clamps_and_removes() {
        let mut pool = pool_with(&["v1"]);
        for _ in 0..30 {
            pool.update_reputation("v1", true);
        }
        assert_eq!(pool.get("v1").unwrap().reputation, MAX_REPUTATION);

        let mut pool = pool_with(&["v2"]);
        for _ in 0..8 {
            pool.update_reputation("v2", false);
        }
        assert_eq!(pool.get("v2").unwrap().reputation, 20);
        assert_eq!(pool.update_reputation("v2", false), Some(10));
        assert!(pool.get("v2").is_none());
        assert_eq!(pool.update_reputation("v2", true), None);
    }

    #[test]
    fn test_sync_replaces_pool() {
        let mut local = pool_with(&["old"]);
        let remote = pool_with(&["n1", "n2"]);
        local.sync_validator_pool(remote.snapshot()).unwrap();
        assert_eq!(local.active_validators(), vec!["n1", "n2"]);
    }

    #[test]
    fn test_sync_rejects_invalid_snapshot() {
        let mut local = pool_with(&["old"]);
        let mut snapshot = pool_with(&["n1"]).snapshot();
        if let Some(record) = snapshot.get_mut("n1") {
            record.queue = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        }
        let err = local.sync_validator_pool(snapshot).unwrap_err();
        assert!(matches!(err, ChainError::InvalidSnapshot(_)));

        let mut snapshot = pool_with(&["n1"]).snapshot();
        if let Some(record) = snapshot.get_mut("n1") {
            record.reputation = 500;
        }
        let err = local.sync_validator_pool(snapshot).unwrap_err();
        assert!(matches!(err, ChainError::InvalidSnapshot(_)));

        let mut snapshot = pool_with(&["n1"]).snapshot();
        if let Some(record) = snapshot.remove("n1") {
            snapshot.insert("n2".to_string(), record);
        }
        let err = local.sync_validator_pool(snapshot).unwrap_err();
        assert!(matches!(err, ChainError::InvalidSnapshot(_)));
        assert_eq!(local.active_validators(), vec!["old"]);
    }

    #[test]
    fn test_fraudulent_validator_is_penalized() {
        let mut pool = pool_with(&["v1"]);
        let low = ValidationRecord { quality_score: 10, vote: Vote::Approved };
        for _ in 0..10 {
            assert!(pool.record_validation("v1", low).is_none());
        }
        assert!(pool.record_validation("v1", low).is_some());
        assert_eq!(pool.get("v1").unwrap().reputation, 90);
    }
}
