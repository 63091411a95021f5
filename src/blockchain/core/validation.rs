use crate::blockchain::core::block::Block;
use crate::blockchain::core::chain::Blockchain;
use crate::config::MINING_REWARD;
use crate::error::ChainError;
use crate::transaction::validation::amounts_match;
use crate::wallet::Wallet;
use std::collections::HashSet;

pub fn validate_no_duplicate_ids(block: &Block) -> Result<(), ChainError> {
    let mut seen = HashSet::new();
    for tx in &block.data {
        if !seen.insert(tx.id.as_str()) {
            return Err(ChainError::InvalidTransaction(format!(
                "Duplicate transaction {} in block {}",
                tx.id, block.hash
            )));
        }
    }
    Ok(())
}

impl Blockchain {
    /// Transaction-level checks over every non-genesis block of a candidate
    /// `chain`: at most one reward per block paying exactly `MINING_REWARD`,
    /// valid signatures and sums, input amounts equal to the sender's balance
    /// replayed over this (current) chain, and no duplicate ids. Blocks this
    /// chain already holds at the same height were checked when committed
    /// and skip the balance check.
    pub fn valid_transaction_data(&self, chain: &[Block]) -> Result<(), ChainError> {
        for (height, block) in chain.iter().enumerate().skip(1) {
            validate_no_duplicate_ids(block)?;
            let known = self.chain().get(height).is_some_and(|local| local.hash == block.hash);

            let mut reward_count = 0;
            for tx in &block.data {
                if tx.is_reward() {
                    reward_count += 1;
                    if reward_count > 1 {
                        return Err(ChainError::InvalidBlock(format!(
                            "Block {} has more than one mining reward",
                            block.hash
                        )));
                    }
                    if tx.output_map.values().next() != Some(&MINING_REWARD) {
                        return Err(ChainError::InvalidTransaction(format!(
                            "Invalid mining reward amount in transaction {}",
                            tx.id
                        )));
                    }
                    continue;
                }

                tx.validate()?;
                if known {
                    continue;
                }

                let true_balance = Wallet::calculate_balance(self.chain(), &tx.input.address);
                if !amounts_match(tx.input.amount, true_balance) {
                    return Err(ChainError::InvalidTransaction(format!(
                        "Transaction {} claims input {} but {} holds {}",
                        tx.id, tx.input.amount, tx.input.address, true_balance
                    )));
                }
            }
        }
        Ok(())
    }
}
