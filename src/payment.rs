//! Payment distribution for committed produce transactions.
//!
//! The order amount `A = pricePerKg * quantity` is split 85% to the producer,
//! 10% across the assigned validators and 5% to the platform. The platform
//! share is taken as the remainder, and the last validator absorbs the
//! validator-side rounding, so the parts always add back up to `A`.

use crate::config::{PRODUCER_SHARE, VALIDATOR_SHARE, ValidatorSplit};
use crate::crypto::{verify_address_signature, Address, KeyPair};
use crate::error::ChainError;
use crate::transaction::Transaction;
use crate::validator::ValidatorPool;
use crate::wallet::WalletRegistry;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorPayment {
    pub validator_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSplit {
    pub total: f64,
    pub producer_share: f64,
    pub validator_payments: Vec<ValidatorPayment>,
    pub platform_share: f64,
}

impl PaymentSplit {
    pub fn validator_total(&self) -> f64 {
        self.validator_payments.iter().map(|p| p.amount).sum()
    }
}

/// Record of a distributed payment, signed by the distributing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub payer: Address,
    pub producer: Address,
    pub platform: Address,
    pub split: PaymentSplit,
    pub payer_balance: f64,
    pub signer: Address,
    #[serde(default)]
    pub signature: String,
}

impl PaymentReceipt {
    fn signable_message(&self) -> Result<Vec<u8>, ChainError> {
        let mut unsigned = self.clone();
        unsigned.signature.clear();
        Ok(serde_json::to_vec(&unsigned)?)
    }

    pub fn verify(&self) -> Result<(), ChainError> {
        let message = self.signable_message()?;
        verify_address_signature(&self.signer, &message, &self.signature)
    }
}

#[derive(Debug, Clone)]
pub struct PaymentDistributor {
    split: ValidatorSplit,
    platform: Address,
}

impl PaymentDistributor {
    pub fn new(split: ValidatorSplit, platform: Address) -> Self {
        Self { split, platform }
    }

    pub fn compute_split(&self, tx: &Transaction, validators: &ValidatorPool) -> Result<PaymentSplit, ChainError> {
        let total = tx.order_amount();
        if !total.is_finite() || total < 0.0 {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} has an invalid order amount {}",
                tx.id, total
            )));
        }

        let producer_share = total * PRODUCER_SHARE;
        let validator_share = total * VALIDATOR_SHARE;
        let ids = &tx.assigned_validators;

        let weights: Vec<f64> = match self.split {
            ValidatorSplit::Even => vec![1.0; ids.len()],
            ValidatorSplit::ReputationWeighted => {
                let reputations: Vec<f64> = ids
                    .iter()
                    .map(|id| validators.get(id).map_or(0.0, |r| r.reputation.max(0) as f64))
                    .collect();
                if reputations.iter().sum::<f64>() > 0.0 {
                    reputations
                } else {
                    vec![1.0; ids.len()]
                }
            }
        };
        let weight_total: f64 = weights.iter().sum();

        let mut validator_payments = Vec::with_capacity(ids.len());
        let mut paid = 0.0;
        for (i, (id, weight)) in ids.iter().zip(&weights).enumerate() {
            let amount = if i + 1 == ids.len() {
                validator_share - paid
            } else {
                validator_share * weight / weight_total
            };
            paid += amount;
            validator_payments.push(ValidatorPayment {
                validator_id: id.clone(),
                amount,
            });
        }

        let platform_share = total - producer_share - paid;
        Ok(PaymentSplit {
            total,
            producer_share,
            validator_payments,
            platform_share,
        })
    }

    /// Debit the payer and credit every recipient in one step. Fails with
    /// no change when the payer cannot cover the order.
    pub fn distribute(
        &self,
        tx: &Transaction,
        accounts: &mut WalletRegistry,
        validators: &ValidatorPool,
        signer: &KeyPair,
    ) -> Result<PaymentReceipt, ChainError> {
        let producer = tx.recipient().cloned().ok_or_else(|| {
            ChainError::InvalidTransaction(format!("Transaction {} has no producer output", tx.id))
        })?;
        let split = self.compute_split(tx, validators)?;
        let payer = tx.input.address.clone();

        let available = accounts.balance(&payer);
        if available < split.total {
            return Err(ChainError::InsufficientFunds(format!(
                "Payer {} holds {} but transaction {} costs {}",
                payer, available, tx.id, split.total
            )));
        }

        accounts.debit(&payer, split.total)?;
        accounts.credit(&producer, split.producer_share);
        for payment in &split.validator_payments {
            accounts.credit(&payment.validator_id, payment.amount);
        }
        accounts.credit(&self.platform, split.platform_share);

        info!(
            tx_id = %tx.id,
            total = split.total,
            producer = split.producer_share,
            validators = split.validator_total(),
            platform = split.platform_share,
            "Payment distributed"
        );

        let mut receipt = PaymentReceipt {
            transaction_id: tx.id.clone(),
            payer: payer.clone(),
            producer,
            platform: self.platform.clone(),
            split,
            payer_balance: accounts.balance(&payer),
            signer: signer.address(),
            signature: String::new(),
        };
        receipt.signature = hex::encode(signer.sign(&receipt.signable_message()?)?);
        Ok(receipt)
    }
}
