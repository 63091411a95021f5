/// Transaction types for PoQChain
use crate::config::{MINING_REWARD, REWARD_INPUT_ADDRESS};
use crate::crypto::{Address, KeyPair};
use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Current wire schema. Rehydration refuses anything else.
pub const TRANSACTION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    Approved,
    Rejected,
    StakeApprove,
}

impl Vote {
    pub fn is_affirmative(self) -> bool {
        matches!(self, Vote::Approved | Vote::StakeApprove)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityDecision {
    #[default]
    Pending,
    Approved,
    AiApproved,
    Rejected,
}

impl QualityDecision {
    pub fn is_approved(self) -> bool {
        matches!(self, QualityDecision::Approved | QualityDecision::AiApproved)
    }

    pub fn is_final(self) -> bool {
        self != QualityDecision::Pending
    }
}

/// Where a transaction sits in the validation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    AwaitingAssignment,
    Voting,
    Finalized(QualityDecision),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub address: Address,
    /// The sender's full balance at signing time.
    pub amount: f64,
    /// Hex compact ECDSA signature over the canonical output map.
    pub signature: String,
}

/// A produce purchase: the sender pays `pricePerKg * quantity` to the
/// producer once assigned validators (or the quality oracle) approve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub version: u32,
    pub id: String,
    pub input: TransactionInput,
    pub output_map: BTreeMap<Address, f64>,
    pub producer_id: String,
    pub price_per_kg: f64,
    pub quantity: f64,
    #[serde(default)]
    pub iot_data_ref: Option<String>,
    #[serde(default)]
    pub sample_data_ref: Option<String>,
    #[serde(default)]
    pub assigned_validators: Vec<String>,
    #[serde(default)]
    pub assigned_at: Option<i64>,
    #[serde(default)]
    pub validator_approvals: BTreeMap<String, Vote>,
    #[serde(default)]
    pub quality_score: u32,
    #[serde(default)]
    pub quality_decision: QualityDecision,
    #[serde(default)]
    pub decision_reason: Option<String>,
}

/// Everything needed to create a produce transaction besides the signer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceOrder {
    pub producer: Address,
    pub producer_id: String,
    pub price_per_kg: f64,
    pub quantity: f64,
    pub iot_data_ref: Option<String>,
    pub sample_data_ref: Option<String>,
}

impl ProduceOrder {
    pub fn amount(&self) -> f64 {
        self.price_per_kg * self.quantity
    }
}

impl Transaction {
    /// Build and sign a produce transaction. `balance` is the sender's
    /// current balance; the change output returns `balance - amount`.
    pub fn new_produce(signer: &KeyPair, balance: f64, order: ProduceOrder) -> Result<Self, ChainError> {
        let amount = order.amount();
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ChainError::InvalidTransaction(format!(
                "Order amount must be positive, got {}",
                amount
            )));
        }
        if amount > balance {
            return Err(ChainError::InsufficientFunds(format!(
                "Amount {} exceeds wallet balance {}",
                amount, balance
            )));
        }

        let sender = signer.address();
        if order.producer == sender {
            return Err(ChainError::InvalidTransaction(
                "Producer and sender must be different addresses".to_string(),
            ));
        }

        let mut output_map = BTreeMap::new();
        output_map.insert(order.producer.clone(), amount);
        output_map.insert(sender.clone(), balance - amount);

        let signature = Self::sign_output_map(signer, &output_map)?;

        Ok(Transaction {
            version: TRANSACTION_SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            input: TransactionInput {
                timestamp: chrono::Utc::now().timestamp_millis(),
                address: sender,
                amount: balance,
                signature,
            },
            output_map,
            producer_id: order.producer_id,
            price_per_kg: order.price_per_kg,
            quantity: order.quantity,
            iot_data_ref: order.iot_data_ref,
            sample_data_ref: order.sample_data_ref,
            assigned_validators: Vec::new(),
            assigned_at: None,
            validator_approvals: BTreeMap::new(),
            quality_score: 0,
            quality_decision: QualityDecision::Pending,
            decision_reason: None,
        })
    }

    /// A mining reward paying `MINING_REWARD` to `miner`. Reward inputs are
    /// unsigned and carry the reserved reward address.
    pub fn reward(miner: &Address) -> Self {
        let mut output_map = BTreeMap::new();
        output_map.insert(miner.clone(), MINING_REWARD);

        Transaction {
            version: TRANSACTION_SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            input: TransactionInput {
                timestamp: chrono::Utc::now().timestamp_millis(),
                address: REWARD_INPUT_ADDRESS.to_string(),
                amount: MINING_REWARD,
                signature: String::new(),
            },
            output_map,
            producer_id: String::new(),
            price_per_kg: 0.0,
            quantity: 0.0,
            iot_data_ref: None,
            sample_data_ref: None,
            assigned_validators: Vec::new(),
            assigned_at: None,
            validator_approvals: BTreeMap::new(),
            quality_score: 100,
            quality_decision: QualityDecision::Approved,
            decision_reason: Some("Mining reward".to_string()),
        }
    }

    pub fn is_reward(&self) -> bool {
        self.input.address == REWARD_INPUT_ADDRESS
    }

    /// `pricePerKg * quantity`, the amount paid out on commit.
    pub fn order_amount(&self) -> f64 {
        self.price_per_kg * self.quantity
    }

    /// The output that is not the sender's change.
    pub fn recipient(&self) -> Option<&Address> {
        self.output_map.keys().find(|address| **address != self.input.address)
    }

    pub fn output_total(&self) -> f64 {
        self.output_map.values().sum()
    }

    pub fn phase(&self) -> TransactionPhase {
        if self.quality_decision.is_final() {
            TransactionPhase::Finalized(self.quality_decision)
        } else if self.assigned_validators.is_empty() {
            TransactionPhase::AwaitingAssignment
        } else {
            TransactionPhase::Voting
        }
    }

    pub fn affirmative_votes(&self) -> usize {
        self.validator_approvals
            .values()
            .filter(|vote| vote.is_affirmative())
            .count()
    }

    /// Affirmative votes needed out of the assigned validators.
    pub fn majority_threshold(&self) -> usize {
        self.assigned_validators.len().div_ceil(2)
    }

    pub fn has_all_votes(&self) -> bool {
        self.assigned_validators
            .iter()
            .all(|id| self.validator_approvals.contains_key(id))
    }

    /// The canonical bytes a sender signs: the JSON of the output map.
    pub fn signable_message(output_map: &BTreeMap<Address, f64>) -> Result<Vec<u8>, ChainError> {
        Ok(serde_json::to_vec(output_map)?)
    }

    fn sign_output_map(signer: &KeyPair, output_map: &BTreeMap<Address, f64>) -> Result<String, ChainError> {
        let message = Self::signable_message(output_map)?;
        let signature = signer.sign(&message)?;
        Ok(hex::encode(signature))
    }

    /// Canonical JSON used for Merkle leaves and hashing.
    pub fn canonical_json(&self) -> Result<String, ChainError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let serialized = bincode::serialize(self)
            .map_err(|e| ChainError::InvalidTransaction(format!("Serialization failed: {}", e)))?;

        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                serialized.len(),
                MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}
