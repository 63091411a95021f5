//! Wallets: a signing key, a cached balance and an optional validator stake.
//!
//! The authoritative balance of an address is replayed from the chain with
//! [`Wallet::calculate_balance`]; the cached `balance` is refreshed from it
//! whenever a transaction is created against a chain.

use crate::blockchain::Block;
use crate::config::{STARTING_BALANCE, VALIDATOR_STAKE_AMOUNT};
use crate::crypto::{Address, KeyPair};
use crate::error::ChainError;
use crate::transaction::{ProduceOrder, Transaction};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Wallet {
    keypair: KeyPair,
    pub balance: f64,
    pub stake: f64,
}

impl Wallet {
    pub fn new() -> Result<Self, ChainError> {
        Ok(Self::from_keypair(KeyPair::generate()?))
    }

    pub fn from_keypair(keypair: KeyPair) -> Self {
        Wallet {
            keypair,
            balance: STARTING_BALANCE,
            stake: 0.0,
        }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Create a signed produce order, refreshing the balance from `chain`
    /// first when one is given.
    pub fn create_transaction(&mut self, order: ProduceOrder, chain: Option<&[Block]>) -> Result<Transaction, ChainError> {
        if let Some(chain) = chain {
            self.balance = Self::calculate_balance(chain, &self.address());
        }
        let amount = order.amount();
        if amount > self.balance {
            return Err(ChainError::InsufficientFunds(format!(
                "Amount {} exceeds wallet balance {}",
                amount, self.balance
            )));
        }
        Transaction::new_produce(&self.keypair, self.balance, order)
    }

    pub fn stake_tokens(&mut self) -> Result<(), ChainError> {
        if self.stake > 0.0 {
            return Err(ChainError::InvalidTransaction("Wallet has already staked".to_string()));
        }
        if self.balance < VALIDATOR_STAKE_AMOUNT {
            return Err(ChainError::InsufficientFunds(format!(
                "Staking requires {} but balance is {}",
                VALIDATOR_STAKE_AMOUNT, self.balance
            )));
        }
        self.stake = VALIDATOR_STAKE_AMOUNT;
        self.balance -= VALIDATOR_STAKE_AMOUNT;
        info!(address = %self.address(), amount = VALIDATOR_STAKE_AMOUNT, "Validator staked tokens");
        Ok(())
    }

    pub fn withdraw_stake(&mut self) -> Result<f64, ChainError> {
        if self.stake <= 0.0 {
            return Err(ChainError::InvalidTransaction(
                "No staked tokens available to withdraw".to_string(),
            ));
        }
        let amount = self.stake;
        self.balance += amount;
        self.stake = 0.0;
        info!(address = %self.address(), amount, "Validator withdrew stake");
        Ok(amount)
    }

    pub fn is_active_validator(&self) -> bool {
        self.stake >= VALIDATOR_STAKE_AMOUNT
    }

    /// Replay `chain` from the tip backwards. The newest block in which the
    /// address spent resets its balance to that block's outputs; without any
    /// spend the starting balance applies. Genesis is skipped.
    pub fn calculate_balance(chain: &[Block], address: &str) -> f64 {
        let mut has_conducted_transaction = false;
        let mut outputs_total = 0.0;

        for block in chain.iter().skip(1).rev() {
            for tx in &block.data {
                if tx.input.address == address {
                    has_conducted_transaction = true;
                }
                if let Some(amount) = tx.output_map.get(address) {
                    outputs_total += amount;
                }
            }
            if has_conducted_transaction {
                break;
            }
        }

        if has_conducted_transaction {
            outputs_total
        } else {
            STARTING_BALANCE + outputs_total
        }
    }
}

/// Off-chain account balances moved by payment distribution.
#[derive(Debug, Clone, Default)]
pub struct WalletRegistry {
    balances: BTreeMap<Address, f64>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account with an opening balance. Existing accounts keep
    /// their balance; returns whether the account was new.
    pub fn register(&mut self, address: &str, opening_balance: f64) -> bool {
        if self.balances.contains_key(address) {
            return false;
        }
        self.balances.insert(address.to_string(), opening_balance);
        true
    }

    pub fn balance(&self, address: &str) -> f64 {
        self.balances.get(address).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.balances.contains_key(address)
    }

    pub fn credit(&mut self, address: &str, amount: f64) {
        *self.balances.entry(address.to_string()).or_insert(0.0) += amount;
    }

    pub fn debit(&mut self, address: &str, amount: f64) -> Result<(), ChainError> {
        let balance = self.balance(address);
        if balance < amount {
            return Err(ChainError::InsufficientFunds(format!(
                "Account {} holds {} but {} is required",
                address, balance, amount
            )));
        }
        self.balances.insert(address.to_string(), balance - amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(producer: Address, price: f64, quantity: f64) -> ProduceOrder {
        ProduceOrder {
            producer,
            producer_id: "farmer-1".to_string(),
            price_per_kg: price,
            quantity,
            iot_data_ref: None,
            sample_data_ref: None,
        }
    }

    fn block_with(data: Vec<Transaction>) -> Block {
        Block {
            data,
            ..Block::genesis()
        }
    }

    #[test]
    fn test_balance_without_history_is_starting_balance() {
        let chain = vec![Block::genesis()];
        assert_eq!(Wallet::calculate_balance(&chain, "anyone"), STARTING_BALANCE);
    }

    #[test]
    fn test_balance_after_spending_and_receiving() {
        let mut buyer = Wallet::new().unwrap();
        let farmer = Wallet::new().unwrap();

        let tx = buyer.create_transaction(order(farmer.address(), 10.0, 5.0), None).unwrap();
        let chain = vec![Block::genesis(), block_with(vec![tx])];

        assert_eq!(Wallet::calculate_balance(&chain, &buyer.address()), 950.0);
        assert_eq!(Wallet::calculate_balance(&chain, &farmer.address()), 1050.0);
    }

    #[test]
    fn test_create_transaction_refreshes_balance() {
        let mut buyer = Wallet::new().unwrap();
        let farmer = Wallet::new().unwrap();
        let first = buyer.create_transaction(order(farmer.address(), 100.0, 9.0), None).unwrap();
        let chain = vec![Block::genesis(), block_with(vec![first])];

        let err = buyer
            .create_transaction(order(farmer.address(), 100.0, 2.0), Some(&chain))
            .unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds(_)));
        assert_eq!(buyer.balance, 100.0);
    }

    #[test]
    fn test_stake_and_withdraw() {
        let mut wallet = Wallet::new().unwrap();
        wallet.stake_tokens().unwrap();
        assert!(wallet.is_active_validator());
        assert_eq!(wallet.balance, STARTING_BALANCE - VALIDATOR_STAKE_AMOUNT);
        assert!(wallet.stake_tokens().is_err());

        assert_eq!(wallet.withdraw_stake().unwrap(), VALIDATOR_STAKE_AMOUNT);
        assert!(!wallet.is_active_validator());
        assert!(wallet.withdraw_stake().is_err());
    }

    #[test]
    fn test_stake_requires_balance() {
        let mut wallet = Wallet::new().unwrap();
        wallet.balance = 10.0;
        assert!(matches!(wallet.stake_tokens(), Err(ChainError::InsufficientFunds(_))));
    }

    #[test]
    fn test_registry_debit_and_credit() {
        let mut registry = WalletRegistry::new();
        assert!(registry.register("a", 100.0));
        assert!(!registry.register("a", 5.0));
        registry.credit("b", 25.0);
        assert!(registry.debit("a", 150.0).is_err());
        registry.debit("a", 40.0).unwrap();
        assert_eq!(registry.balance("a"), 60.0);
        assert_eq!(registry.balance("b"), 25.0);
    }
}
