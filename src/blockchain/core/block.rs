use crate::config::{
    GENESIS_HASH, GENESIS_LAST_HASH, GENESIS_TIMESTAMP, INITIAL_DIFFICULTY, MINE_RATE,
};
use crate::crypto::{crypto_hash, hash_field};
use crate::error::ChainError;
use crate::merkle::MerkleTree;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub last_hash: String,
    pub hash: String,
    /// Transactions sorted by input timestamp.
    pub data: Vec<Transaction>,
    pub nonce: u64,
    pub difficulty: u32,
    pub merkle_root: String,
    /// Mean quality score of `data`.
    pub quality_score: f64,
}

impl Block {
    pub fn genesis() -> Self {
        Block {
            timestamp: GENESIS_TIMESTAMP,
            last_hash: GENESIS_LAST_HASH.to_string(),
            hash: GENESIS_HASH.to_string(),
            data: Vec::new(),
            nonce: 0,
            difficulty: INITIAL_DIFFICULTY,
            merkle_root: MerkleTree::new::<&str>(&[]).root().to_string(),
            quality_score: 0.0,
        }
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Merkle tree over the canonical JSON of each transaction.
    pub fn merkle_tree(data: &[Transaction]) -> Result<MerkleTree, ChainError> {
        let leaves = data
            .iter()
            .map(Transaction::canonical_json)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MerkleTree::new(&leaves))
    }

    pub fn calculate_merkle_root(data: &[Transaction]) -> Result<String, ChainError> {
        Ok(Self::merkle_tree(data)?.root().to_string())
    }

    pub fn average_quality(data: &[Transaction]) -> f64 {
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|tx| tx.quality_score as f64).sum::<f64>() / data.len() as f64
    }

    /// Hash over `[timestamp, lastHash, nonce, difficulty, merkleRoot, qualityScore]`.
    pub fn compute_hash(
        timestamp: i64,
        last_hash: &str,
        nonce: u64,
        difficulty: u32,
        merkle_root: &str,
        quality_score: f64,
    ) -> Result<String, ChainError> {
        let fields = [
            hash_field(&timestamp)?,
            hash_field(last_hash)?,
            hash_field(&nonce)?,
            hash_field(&difficulty)?,
            hash_field(merkle_root)?,
            hash_field(&quality_score)?,
        ];
        Ok(crypto_hash(&fields))
    }

    pub fn recompute_hash(&self) -> Result<String, ChainError> {
        Self::compute_hash(
            self.timestamp,
            &self.last_hash,
            self.nonce,
            self.difficulty,
            &self.merkle_root,
            self.quality_score,
        )
    }

    pub fn hash_to_target(difficulty: u32) -> [u8; 32] {
        let mut target = [0xFF; 32];
        let leading_zeros = difficulty / 8;
        let partial_bits = difficulty % 8;

        for item in target.iter_mut().take(leading_zeros as usize) {
            *item = 0;
        }

        if leading_zeros < 32 && partial_bits > 0 {
            target[leading_zeros as usize] = 0xFF >> partial_bits;
        }
        target
    }

    /// Whether the first `difficulty` bits of the hex hash are zero.
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let Ok(bytes) = hex::decode(hash) else {
            return false;
        };
        let Ok(bytes) = <[u8; 32]>::try_from(bytes.as_slice()) else {
            return false;
        };
        bytes <= Self::hash_to_target(difficulty)
    }

    pub fn adjust_difficulty(original: &Block, timestamp: i64) -> u32 {
        let difficulty = original.difficulty;
        if difficulty < 1 {
            return 1;
        }
        if timestamp - original.timestamp > MINE_RATE {
            return (difficulty - 1).max(1);
        }
        difficulty + 1
    }

    pub fn validate_merkle_root(&self) -> bool {
        matches!(Self::calculate_merkle_root(&self.data), Ok(root) if root == self.merkle_root)
    }

    /// Linkage and Merkle root only.
    pub fn is_valid_block(block: &Block, last_block: &Block) -> bool {
        block.last_hash == last_block.hash && block.validate_merkle_root()
    }

    /// Full verification of `block` as the successor of `last_block`.
    pub fn verify(block: &Block, last_block: &Block) -> Result<(), ChainError> {
        if block.last_hash != last_block.hash {
            return Err(ChainError::InvalidBlockLinkage);
        }
        if !block.validate_merkle_root() {
            return Err(ChainError::InvalidMerkleRoot);
        }
        if last_block.difficulty.abs_diff(block.difficulty) > 1 {
            return Err(ChainError::InvalidBlock(format!(
                "Difficulty jumped from {} to {}",
                last_block.difficulty, block.difficulty
            )));
        }
        let expected = block.recompute_hash()?;
        if expected != block.hash {
            return Err(ChainError::InvalidBlock(format!(
                "Hash mismatch. Expected {}, but got {}.",
                expected, block.hash
            )));
        }
        if !Self::meets_difficulty(&block.hash, block.difficulty) {
            return Err(ChainError::InvalidProofOfWork);
        }
        for tx in &block.data {
            tx.validate_size()?;
        }
        Ok(())
    }
}
