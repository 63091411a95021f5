/// Validation logic for transactions separated from type definitions
use crate::error::ChainError;
use crate::transaction::types::{Transaction, TRANSACTION_SCHEMA_VERSION};

/// Relative tolerance when comparing sums of outputs against the input.
const AMOUNT_TOLERANCE: f64 = 1e-9;

pub(crate) fn amounts_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= AMOUNT_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

impl Transaction {
    /// Checks that the outputs add up to the input amount.
    pub fn validate_outputs(&self) -> Result<(), ChainError> {
        if self.output_map.values().any(|amount| !amount.is_finite() || *amount < 0.0) {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} has a negative or non-finite output",
                self.id
            )));
        }
        let total = self.output_total();
        if !amounts_match(total, self.input.amount) {
            return Err(ChainError::InvalidTransaction(format!(
                "Invalid transaction from {}: input {} and output total {} do not match",
                self.input.address, self.input.amount, total
            )));
        }
        Ok(())
    }

    /// Validates just the signature of the transaction, without access to blockchain state.
    pub fn validate_signature(&self) -> Result<(), ChainError> {
        if self.input.signature.is_empty() {
            return Err(ChainError::InvalidTransaction("Transaction not signed".to_string()));
        }
        let message = Self::signable_message(&self.output_map)?;
        crate::crypto::verify_address_signature(&self.input.address, &message, &self.input.signature)
            .map_err(|e| {
                ChainError::InvalidTransaction(format!("Invalid signature from {}: {}", self.input.address, e))
            })
    }

    /// Stateless validity: size, output sum and signature.
    pub fn validate(&self) -> Result<(), ChainError> {
        self.validate_size()?;
        self.validate_outputs()?;
        self.validate_signature()
    }

    pub fn valid_transaction(&self) -> bool {
        self.validate().is_ok()
    }

    /// Every vote must come from an assigned validator.
    pub fn validate_votes(&self) -> Result<(), ChainError> {
        if let Some(voter) = self
            .validator_approvals
            .keys()
            .find(|id| !self.assigned_validators.contains(id))
        {
            return Err(ChainError::Unauthorized(format!(
                "Validator {} voted on transaction {} without being assigned",
                voter, self.id
            )));
        }
        Ok(())
    }

    /// Rehydrate a transaction received from a peer. Fails closed on an
    /// unknown schema version, missing identity, unbalanced outputs, a bad
    /// signature or votes from unassigned validators.
    pub fn from_json(json: &str) -> Result<Self, ChainError> {
        let tx: Transaction = serde_json::from_str(json)?;

        if tx.version != TRANSACTION_SCHEMA_VERSION {
            return Err(ChainError::InvalidTransaction(format!(
                "Unsupported transaction schema version {} (expected {})",
                tx.version, TRANSACTION_SCHEMA_VERSION
            )));
        }
        if tx.id.is_empty() {
            return Err(ChainError::InvalidTransaction("Transaction id is empty".to_string()));
        }
        if tx.input.address.is_empty() {
            return Err(ChainError::InvalidTransaction("Input address is empty".to_string()));
        }
        tx.validate()?;
        tx.validate_votes()?;
        Ok(tx)
    }
}
