//! Transaction module split into types, validation and the finalization
//! state machine.

pub mod finalize;
pub mod types;
pub mod validation;

pub use finalize::FinalizeContext;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::error::ChainError;
    use crate::quality::{SensorReading, WeightedQualityOracle};

    fn order(producer: &KeyPair, price: f64, quantity: f64) -> ProduceOrder {
        ProduceOrder {
            producer: producer.address(),
            producer_id: "farmer-1".to_string(),
            price_per_kg: price,
            quantity,
            iot_data_ref: None,
            sample_data_ref: None,
        }
    }

    fn produce_tx() -> Transaction {
        let buyer = KeyPair::generate().unwrap();
        let farmer = KeyPair::generate().unwrap();
        Transaction::new_produce(&buyer, 1000.0, order(&farmer, 10.0, 5.0)).unwrap()
    }

    fn assigned_tx(validators: &[&str]) -> Transaction {
        let mut tx = produce_tx();
        tx.assign_validators(validators.iter().map(|v| v.to_string()).collect(), 1_000)
            .unwrap();
        tx
    }

    #[test]
    fn test_new_produce_outputs_and_signature() {
        let buyer = KeyPair::generate().unwrap();
        let farmer = KeyPair::generate().unwrap();
        let tx = Transaction::new_produce(&buyer, 1000.0, order(&farmer, 10.0, 5.0)).unwrap();

        assert_eq!(tx.output_map[&farmer.address()], 50.0);
        assert_eq!(tx.output_map[&buyer.address()], 950.0);
        assert_eq!(tx.input.amount, 1000.0);
        assert_eq!(tx.recipient(), Some(&farmer.address()));
        assert_eq!(tx.phase(), TransactionPhase::AwaitingAssignment);
        assert!(tx.valid_transaction());
    }

    #[test]
    fn test_amount_exceeding_balance_fails() {
        let buyer = KeyPair::generate().unwrap();
        let farmer = KeyPair::generate().unwrap();
        let err = Transaction::new_produce(&buyer, 10.0, order(&farmer, 10.0, 5.0)).unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds(_)));
    }

    #[test]
    fn test_tampered_output_fails_validation() {
        let mut tx = produce_tx();
        let recipient = tx.recipient().cloned().unwrap();
        tx.output_map.insert(recipient, 999_999.0);
        assert!(!tx.valid_transaction());
    }

    #[test]
    fn test_forged_signature_fails_validation() {
        let mut tx = produce_tx();
        tx.input.signature = hex::encode([0u8; 64]);
        assert!(tx.validate_signature().is_err());
    }

    #[test]
    fn test_unassigned_vote_is_ignored() {
        let mut tx = assigned_tx(&["v1", "v2", "v3"]);
        assert!(!tx.update_validation("intruder", Vote::Approved));
        assert!(tx.validator_approvals.is_empty());
        assert!(tx.update_validation("v1", Vote::Approved));
        assert_eq!(tx.phase(), TransactionPhase::Voting);
    }

    #[test]
    fn test_one_of_three_votes_does_not_finalize() {
        let oracle = WeightedQualityOracle::default();
        let mut tx = assigned_tx(&["v1", "v2", "v3"]);
        tx.update_validation("v1", Vote::Approved);

        assert_eq!(tx.finalize(&oracle, &FinalizeContext::default()), None);
        assert_eq!(tx.quality_decision, QualityDecision::Pending);
    }

    #[test]
    fn test_majority_approves_with_oracle_score() {
        let oracle = WeightedQualityOracle::default();
        let iot = SensorReading::new(30.0, 80.0, 90.0);
        let sample = SensorReading::new(31.0, 79.0, 88.0);
        let ctx = FinalizeContext {
            iot: Some(&iot),
            sample: Some(&sample),
            history: &[],
        };

        let mut tx = assigned_tx(&["v1", "v2", "v3"]);
        tx.update_validation("v1", Vote::Approved);
        tx.update_validation("v2", Vote::StakeApprove);
        tx.update_validation("v3", Vote::Rejected);

        assert_eq!(tx.finalize(&oracle, &ctx), Some(QualityDecision::Approved));
        assert_eq!(tx.quality_score, 97);
        assert!(!tx.update_validation("v3", Vote::Approved));
    }

    #[test]
    fn test_rejected_votes_fall_back_to_oracle() {
        let oracle = WeightedQualityOracle::default();
        let iot = SensorReading::new(30.0, 80.0, 90.0);
        let sample = SensorReading::new(31.0, 79.0, 88.0);
        let ctx = FinalizeContext {
            iot: Some(&iot),
            sample: Some(&sample),
            history: &[],
        };

        let mut tx = assigned_tx(&["v1", "v2"]);
        tx.update_validation("v1", Vote::Rejected);
        tx.update_validation("v2", Vote::Rejected);
        assert_eq!(tx.finalize(&oracle, &ctx), Some(QualityDecision::AiApproved));

        let mut tx = assigned_tx(&["v1", "v2"]);
        tx.update_validation("v1", Vote::Rejected);
        tx.update_validation("v2", Vote::Rejected);
        assert_eq!(
            tx.finalize(&oracle, &FinalizeContext::default()),
            Some(QualityDecision::Rejected)
        );
        assert_eq!(tx.decision_reason.as_deref(), Some("Missing IoT or sample data."));
    }

    #[test]
    fn test_timeout_counts_present_votes() {
        let oracle = WeightedQualityOracle::default();
        let mut tx = assigned_tx(&["v1", "v2", "v3"]);
        tx.update_validation("v1", Vote::Approved);
        tx.update_validation("v2", Vote::Approved);

        assert!(!tx.quorum_expired(1_500, 60_000));
        assert!(tx.quorum_expired(61_000, 60_000));
        assert_eq!(
            tx.finalize_on_timeout(&oracle, &FinalizeContext::default()),
            QualityDecision::Approved
        );
        assert!(!tx.quorum_expired(120_000, 60_000));
    }

    #[test]
    fn test_timeout_without_majority_uses_oracle() {
        let oracle = WeightedQualityOracle::default();
        let mut tx = assigned_tx(&["v1", "v2", "v3"]);
        tx.update_validation("v1", Vote::Approved);
        assert_eq!(
            tx.finalize_on_timeout(&oracle, &FinalizeContext::default()),
            QualityDecision::Rejected
        );
    }

    #[test]
    fn test_assign_only_once() {
        let mut tx = assigned_tx(&["v1"]);
        assert!(tx.assign_validators(vec!["v2".to_string()], 2_000).is_err());
        assert_eq!(tx.assigned_validators, vec!["v1".to_string()]);
    }

    #[test]
    fn test_from_json_round_trip_and_rejections() {
        let mut tx = assigned_tx(&["v1", "v2"]);
        tx.update_validation("v1", Vote::Approved);
        let json = serde_json::to_string(&tx).unwrap();
        assert_eq!(Transaction::from_json(&json).unwrap(), tx);

        let mut bad_version = tx.clone();
        bad_version.version = 99;
        assert!(Transaction::from_json(&serde_json::to_string(&bad_version).unwrap()).is_err());

        let mut bad_vote = tx.clone();
        bad_vote.validator_approvals.insert("intruder".to_string(), Vote::Approved);
        let err = Transaction::from_json(&serde_json::to_string(&bad_vote).unwrap()).unwrap_err();
        assert!(matches!(err, ChainError::Unauthorized(_)));

        let mut unbalanced = tx.clone();
        unbalanced.input.amount += 1.0;
        assert!(Transaction::from_json(&serde_json::to_string(&unbalanced).unwrap()).is_err());

        let mut forged = tx;
        forged.input.signature = hex::encode([7u8; 64]);
        let err = Transaction::from_json(&serde_json::to_string(&forged).unwrap()).unwrap_err();
        assert!(matches!(err, ChainError::InvalidTransaction(_)));
    }

    #[test]
    fn test_recompute_decision_from_votes() {
        let oracle = WeightedQualityOracle::default();
        let iot = SensorReading::new(30.0, 80.0, 90.0);
        let poor = SensorReading::new(5.0, 20.0, 10.0);
        let ctx = FinalizeContext {
            iot: Some(&iot),
            sample: Some(&poor),
            history: &[],
        };

        // A claimed approval with no votes behind it is not reproduced.
        let mut claimed = assigned_tx(&["v1", "v2", "v3"]);
        claimed.quality_decision = QualityDecision::Approved;
        assert_eq!(claimed.recompute_decision(&oracle, &ctx, 2_000, 60_000), None);
        assert_eq!(
            claimed.recompute_decision(&oracle, &ctx, 61_000, 60_000),
            Some(QualityDecision::Rejected)
        );

        let mut voted = assigned_tx(&["v1", "v2", "v3"]);
        for id in ["v1", "v2", "v3"] {
            voted.update_validation(id, Vote::Approved);
        }
        assert_eq!(
            voted.recompute_decision(&oracle, &ctx, 2_000, 60_000),
            Some(QualityDecision::Approved)
        );
        assert_eq!(voted.quality_decision, QualityDecision::Pending);
    }

    #[test]
    fn test_stake_override_validator() {
        let mut tx = produce_tx();
        assert_eq!(tx.stake_override_validator(), None);
        tx.apply_stake_override("v7");
        assert_eq!(tx.stake_override_validator(), Some("v7"));
        tx.quality_decision = QualityDecision::Rejected;
        assert_eq!(tx.stake_override_validator(), None);
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let value = serde_json::to_value(produce_tx()).unwrap();
        assert!(value.get("outputMap").is_some());
        assert!(value.get("pricePerKg").is_some());
        assert_eq!(value["qualityDecision"], "PENDING");
    }

    #[test]
    fn test_reward_transaction() {
        let miner = KeyPair::generate().unwrap().address();
        let reward = Transaction::reward(&miner);
        assert!(reward.is_reward());
        assert_eq!(reward.output_map.len(), 1);
        assert_eq!(reward.output_map[&miner], crate::config::MINING_REWARD);
        assert!(reward.quality_decision.is_approved());
    }
}
