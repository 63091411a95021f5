//! Validation lifecycle of a produce transaction.
//!
//! `AwaitingAssignment -> Voting -> Finalized(APPROVED | AI_APPROVED | REJECTED)`
//!
//! Votes only count from the validators fixed at assignment. Once every
//! assigned validator has voted the transaction is finalized: a majority of
//! affirmative votes approves it outright, otherwise the quality oracle
//! decides. When votes stay missing past the quorum timeout the same rule is
//! applied to the votes that did arrive.

use crate::error::ChainError;
use crate::quality::{OracleDecision, QualityOracle, SensorReading};
use crate::transaction::types::{QualityDecision, Transaction, TransactionPhase, Vote};
use tracing::{info, warn};

const STAKE_OVERRIDE_REASON: &str = "Approved by stake override from validator ";

/// Off-chain inputs the oracle needs, resolved by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeContext<'a> {
    pub iot: Option<&'a SensorReading>,
    pub sample: Option<&'a SensorReading>,
    /// Earlier decisions for the same producer.
    pub history: &'a [QualityDecision],
}

impl Transaction {
    pub fn assign_validators(&mut self, validators: Vec<String>, now: i64) -> Result<(), ChainError> {
        if self.phase() != TransactionPhase::AwaitingAssignment {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} already has validators assigned",
                self.id
            )));
        }
        if validators.is_empty() {
            return Err(ChainError::CapacityExhausted(format!(
                "No validators assigned to transaction {}",
                self.id
            )));
        }
        self.assigned_validators = validators;
        self.assigned_at = Some(now);
        Ok(())
    }

    /// Record a vote. Votes from unassigned validators and votes on a
    /// finalized transaction are ignored; returns whether the vote counted.
    pub fn update_validation(&mut self, validator_id: &str, vote: Vote) -> bool {
        if !self.assigned_validators.iter().any(|id| id == validator_id) {
            warn!(
                validator = validator_id,
                tx_id = %self.id,
                "{}",
                ChainError::Unauthorized("validator is not assigned to this transaction".to_string())
            );
            return false;
        }
        if self.quality_decision.is_final() {
            warn!(validator = validator_id, tx_id = %self.id, "Vote on finalized transaction ignored");
            return false;
        }
        self.validator_approvals.insert(validator_id.to_string(), vote);
        true
    }

    /// Finalize once every assigned validator has voted. Returns `None` while
    /// votes are outstanding.
    pub fn finalize(&mut self, oracle: &dyn QualityOracle, ctx: &FinalizeContext) -> Option<QualityDecision> {
        if self.quality_decision.is_final() {
            return Some(self.quality_decision);
        }
        if self.assigned_validators.is_empty() || !self.has_all_votes() {
            info!(
                tx_id = %self.id,
                received = self.validator_approvals.len(),
                expected = self.assigned_validators.len(),
                "Waiting for validator votes"
            );
            return None;
        }
        Some(self.decide(oracle, ctx))
    }

    /// Finalize with whatever votes arrived before the quorum timeout.
    pub fn finalize_on_timeout(&mut self, oracle: &dyn QualityOracle, ctx: &FinalizeContext) -> QualityDecision {
        if self.quality_decision.is_final() {
            return self.quality_decision;
        }
        warn!(
            tx_id = %self.id,
            received = self.validator_approvals.len(),
            expected = self.assigned_validators.len(),
            "Quorum timeout reached, finalizing with votes present"
        );
        self.decide(oracle, ctx)
    }

    /// Whether the transaction has waited longer than `timeout_ms` for votes.
    pub fn quorum_expired(&self, now: i64, timeout_ms: i64) -> bool {
        match (self.phase(), self.assigned_at) {
            (TransactionPhase::Voting, Some(assigned_at)) => now - assigned_at >= timeout_ms,
            _ => false,
        }
    }

    /// A validator's stake vouches for a rejected transaction.
    pub fn apply_stake_override(&mut self, validator_id: &str) {
        self.quality_decision = QualityDecision::Approved;
        self.decision_reason = Some(format!("{}{}", STAKE_OVERRIDE_REASON, validator_id));
    }

    /// The validator whose stake approved this transaction, if any.
    pub fn stake_override_validator(&self) -> Option<&str> {
        if self.quality_decision != QualityDecision::Approved {
            return None;
        }
        self.decision_reason
            .as_deref()?
            .strip_prefix(STAKE_OVERRIDE_REASON)
            .filter(|id| !id.is_empty())
    }

    /// Recompute the decision from the recorded votes alone, ignoring the
    /// decision the transaction carries. `None` while votes are outstanding
    /// and the quorum timeout has not passed.
    pub fn recompute_decision(
        &self,
        oracle: &dyn QualityOracle,
        ctx: &FinalizeContext,
        now: i64,
        timeout_ms: i64,
    ) -> Option<QualityDecision> {
        let mut replay = self.clone();
        replay.quality_decision = QualityDecision::Pending;
        replay.decision_reason = None;

        let complete = !replay.assigned_validators.is_empty() && replay.has_all_votes();
        if complete || replay.quorum_expired(now, timeout_ms) {
            Some(replay.decide(oracle, ctx))
        } else {
            None
        }
    }

    fn decide(&mut self, oracle: &dyn QualityOracle, ctx: &FinalizeContext) -> QualityDecision {
        let assessment = oracle.evaluate(ctx.iot, ctx.sample, &self.producer_id, ctx.history);
        self.quality_score = assessment.quality_score;

        let majority = !self.assigned_validators.is_empty() && self.affirmative_votes() >= self.majority_threshold();
        if majority {
            info!(tx_id = %self.id, score = self.quality_score, "Transaction approved by validator majority");
            self.quality_decision = QualityDecision::Approved;
            self.decision_reason = Some("Approved by validator majority".to_string());
        } else if assessment.decision == OracleDecision::AutoApprove {
            info!(tx_id = %self.id, score = self.quality_score, "Quality oracle auto-approved transaction");
            self.quality_decision = QualityDecision::AiApproved;
            self.decision_reason = Some(assessment.reason);
        } else {
            info!(tx_id = %self.id, score = self.quality_score, reason = %assessment.reason, "Transaction rejected");
            self.quality_decision = QualityDecision::Rejected;
            self.decision_reason = Some(assessment.reason);
        }
        self.quality_decision
    }
}
