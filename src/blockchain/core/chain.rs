use crate::blockchain::core::block::Block;
use crate::error::ChainError;
use crate::merkle::MerkleTree;
use crate::miner::mine_block;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

/// What is broadcast on the blockchain channel: the full chain plus the
/// aggregate Merkle root over its block hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub chain: Vec<Block>,
    pub merkle_root: String,
}

#[derive(Debug, Clone)]
pub struct Blockchain {
    chain: Vec<Block>,
    merkle_root: String,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    pub fn new() -> Self {
        let chain = vec![Block::genesis()];
        let merkle_root = Self::aggregate_root(&chain);
        Blockchain { chain, merkle_root }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Never true: the genesis block is always present.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn last_block(&self) -> &Block {
        // The chain always holds at least the genesis block.
        &self.chain[self.chain.len() - 1]
    }

    pub fn merkle_root(&self) -> &str {
        &self.merkle_root
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            chain: self.chain.clone(),
            merkle_root: self.merkle_root.clone(),
        }
    }

    /// Merkle root over the hashes of every block in `chain`.
    pub fn aggregate_root(chain: &[Block]) -> String {
        let hashes: Vec<&str> = chain.iter().map(|block| block.hash.as_str()).collect();
        MerkleTree::new(&hashes).root().to_string()
    }

    /// Every level of the aggregate tree, leaves first.
    pub fn merkle_levels(&self) -> Vec<Vec<String>> {
        let hashes: Vec<&str> = self.chain.iter().map(|block| block.hash.as_str()).collect();
        MerkleTree::new(&hashes).levels()
    }

    pub fn contains_transaction(&self, id: &str) -> bool {
        self.chain.iter().any(|block| block.data.iter().any(|tx| tx.id == id))
    }

    /// Mine the approved subset of `transactions` onto the tip. Returns
    /// `Ok(None)` when nothing is approved.
    pub fn add_block(&mut self, transactions: Vec<Transaction>) -> Result<Option<Block>, ChainError> {
        let approved: Vec<Transaction> = transactions
            .into_iter()
            .filter(|tx| tx.quality_decision.is_approved())
            .collect();
        if approved.is_empty() {
            info!("No approved transactions to mine");
            return Ok(None);
        }

        let block = mine_block(self.last_block(), approved, &AtomicBool::new(false))?;
        self.commit_block(block.clone())?;
        Ok(Some(block))
    }

    /// Append a block mined elsewhere after verifying it against the tip.
    pub fn commit_block(&mut self, block: Block) -> Result<(), ChainError> {
        let tip = self.last_block();
        if block.last_hash != tip.hash {
            return Err(ChainError::StaleBlock);
        }
        Block::verify(&block, tip)?;
        if let Some(tx) = block.data.iter().find(|tx| self.contains_transaction(&tx.id)) {
            return Err(ChainError::InvalidBlock(format!(
                "Transaction {} is already on chain",
                tx.id
            )));
        }

        info!(
            hash = %block.hash,
            height = self.chain.len(),
            transactions = block.data.len(),
            difficulty = block.difficulty,
            "Block committed"
        );
        self.chain.push(block);
        self.merkle_root = Self::aggregate_root(&self.chain);
        Ok(())
    }

    pub fn validate_chain(chain: &[Block]) -> Result<(), ChainError> {
        let Some(first) = chain.first() else {
            return Err(ChainError::InvalidBlock("Chain is empty".to_string()));
        };
        if !first.is_genesis() {
            return Err(ChainError::InvalidBlock("Chain does not start with the genesis block".to_string()));
        }
        for pair in chain.windows(2) {
            Block::verify(&pair[1], &pair[0])?;
        }
        Ok(())
    }

    pub fn is_valid_chain(chain: &[Block]) -> bool {
        Self::validate_chain(chain).is_ok()
    }

    pub fn is_valid_snapshot(snapshot: &ChainSnapshot) -> bool {
        Self::is_valid_chain(&snapshot.chain) && Self::aggregate_root(&snapshot.chain) == snapshot.merkle_root
    }

    /// Swap in `snapshot` when it is strictly longer and fully valid.
    /// `on_success` runs with the accepted chain before the swap.
    pub fn replace_chain<F>(
        &mut self,
        snapshot: ChainSnapshot,
        validate_transactions: bool,
        on_success: F,
    ) -> Result<(), ChainError>
    where
        F: FnOnce(&[Block]),
    {
        if snapshot.chain.len() <= self.chain.len() {
            return Err(ChainError::ChainReplacement(format!(
                "The incoming chain must be longer ({} <= {})",
                snapshot.chain.len(),
                self.chain.len()
            )));
        }
        if let Err(e) = Self::validate_chain(&snapshot.chain) {
            return Err(ChainError::ChainReplacement(format!("The incoming chain must be valid: {}", e)));
        }
        if Self::aggregate_root(&snapshot.chain) != snapshot.merkle_root {
            return Err(ChainError::ChainReplacement(
                "The incoming chain's Merkle root does not match its blocks".to_string(),
            ));
        }
        if validate_transactions {
            if let Err(e) = self.valid_transaction_data(&snapshot.chain) {
                warn!(error = %e, "Incoming chain has invalid transaction data");
                return Err(ChainError::ChainReplacement(format!(
                    "The incoming chain has invalid transaction data: {}",
                    e
                )));
            }
        }

        on_success(&snapshot.chain);

        info!(
            old_length = self.chain.len(),
            new_length = snapshot.chain.len(),
            "Replacing chain"
        );
        self.chain = snapshot.chain;
        self.merkle_root = snapshot.merkle_root;
        Ok(())
    }
}
