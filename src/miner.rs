//! Proof-of-Quality block assembly and the background transaction miner.
//!
//! A block may only be mined when every transaction is approved or the
//! block's mean quality score reaches `AI_NEEDS_REVIEW_THRESHOLD`. The
//! proof-of-work search then retargets difficulty on every attempt and
//! stops early when its cancel flag is raised.

use crate::blockchain::{Block, Blockchain};
use crate::config::AI_NEEDS_REVIEW_THRESHOLD;
use crate::crypto::KeyPair;
use crate::error::ChainError;
use crate::mempool::TransactionPool;
use crate::network::{Channel, PubSub};
use crate::payment::{PaymentDistributor, PaymentReceipt};
use crate::state::WorldState;
use crate::transaction::Transaction;
use crate::validator::ValidatorPool;
use crate::wallet::WalletRegistry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub fn mine_block(last_block: &Block, mut transactions: Vec<Transaction>, cancel: &AtomicBool) -> Result<Block, ChainError> {
    transactions.sort_by_key(|tx| tx.input.timestamp);

    let merkle_root = Block::calculate_merkle_root(&transactions)?;
    let quality_score = Block::average_quality(&transactions);

    let all_approved = transactions.iter().all(|tx| tx.quality_decision.is_approved());
    if !all_approved && quality_score < AI_NEEDS_REVIEW_THRESHOLD {
        return Err(ChainError::ConsensusGate(format!(
            "Average quality {:.2} is below {} and not every transaction is approved",
            quality_score, AI_NEEDS_REVIEW_THRESHOLD
        )));
    }

    let mut nonce: u64 = 0;
    loop {
        if cancel.load(Ordering::Relaxed) {
            debug!(nonce, "Mining cancelled");
            return Err(ChainError::MiningCancelled);
        }

        nonce += 1;
        let timestamp = chrono::Utc::now().timestamp_millis();
        let difficulty = Block::adjust_difficulty(last_block, timestamp);
        let hash = Block::compute_hash(
            timestamp,
            &last_block.hash,
            nonce,
            difficulty,
            &merkle_root,
            quality_score,
        )?;

        if Block::meets_difficulty(&hash, difficulty) {
            return Ok(Block {
                timestamp,
                last_hash: last_block.hash.clone(),
                hash,
                data: transactions,
                nonce,
                difficulty,
                merkle_root,
                quality_score,
            });
        }
    }
}

/// Outcome of one mining round.
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Block,
    pub receipts: Vec<PaymentReceipt>,
}

/// Mines approved pool transactions off the async runtime, commits the
/// block, broadcasts the chain and pays out every committed transaction.
pub struct TransactionMiner {
    blockchain: Arc<RwLock<Blockchain>>,
    pool: Arc<RwLock<TransactionPool>>,
    validators: Arc<RwLock<ValidatorPool>>,
    accounts: Arc<RwLock<WalletRegistry>>,
    state: Arc<RwLock<WorldState>>,
    pubsub: Arc<dyn PubSub>,
    distributor: PaymentDistributor,
    signer: KeyPair,
    current: Mutex<Option<Arc<AtomicBool>>>,
    /// Held for a whole round so two rounds never mine the same transactions.
    round: tokio::sync::Mutex<()>,
}

impl TransactionMiner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        blockchain: Arc<RwLock<Blockchain>>,
        pool: Arc<RwLock<TransactionPool>>,
        validators: Arc<RwLock<ValidatorPool>>,
        accounts: Arc<RwLock<WalletRegistry>>,
        state: Arc<RwLock<WorldState>>,
        pubsub: Arc<dyn PubSub>,
        distributor: PaymentDistributor,
        signer: KeyPair,
    ) -> Self {
        TransactionMiner {
            blockchain,
            pool,
            validators,
            accounts,
            state,
            pubsub,
            distributor,
            signer,
            current: Mutex::new(None),
            round: tokio::sync::Mutex::new(()),
        }
    }

    /// Abort the in-flight proof-of-work search, if any.
    pub fn cancel(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                info!("In-flight mining cancelled");
                true
            }
            None => false,
        }
    }

    /// Returns `Ok(None)` when no approved transaction is waiting. Rounds
    /// run one at a time.
    pub async fn mine_transactions(&self) -> Result<Option<MinedBlock>, ChainError> {
        let _round = self.round.lock().await;

        let (last_block, candidates) = {
            let blockchain = self.blockchain.read().await;
            let pool = self.pool.read().await;
            let candidates: Vec<Transaction> = pool
                .valid_transactions()
                .into_iter()
                .filter(|tx| tx.quality_decision.is_approved() && !blockchain.contains_transaction(&tx.id))
                .collect();
            (blockchain.last_block().clone(), candidates)
        };
        if candidates.is_empty() {
            debug!("No approved transactions to mine");
            return Ok(None);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        *self.current.lock() = Some(cancel.clone());

        let search = tokio::task::spawn_blocking(move || mine_block(&last_block, candidates, &cancel)).await;
        *self.current.lock() = None;

        let block = match search {
            Ok(result) => result?,
            Err(e) => {
                error!(error = %e, "Mining task failed");
                return Err(ChainError::InvalidBlock(format!("Mining task failed: {}", e)));
            }
        };

        let snapshot = {
            let mut blockchain = self.blockchain.write().await;
            blockchain.commit_block(block.clone())?;
            blockchain.snapshot()
        };

        match serde_json::to_vec(&snapshot) {
            Ok(payload) => {
                if let Err(e) = self.pubsub.publish(Channel::Blockchain, payload) {
                    warn!(error = %e, "Failed to broadcast chain");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode chain snapshot"),
        }

        let receipts = self.distribute_payments(&block).await;

        let removed = self.pool.write().await.remove_committed(&block);
        if let Err(e) = self.state.write().await.apply_block(&block) {
            warn!(error = %e, "Failed to fold block into world state");
        }

        info!(hash = %block.hash, transactions = block.data.len(), removed, "Mined block");
        Ok(Some(MinedBlock { block, receipts }))
    }

    async fn distribute_payments(&self, block: &Block) -> Vec<PaymentReceipt> {
        let validators = self.validators.read().await;
        let mut accounts = self.accounts.write().await;

        let mut receipts = Vec::new();
        for tx in block.data.iter().filter(|tx| !tx.is_reward()) {
            match self.distributor.distribute(tx, &mut accounts, &validators, &self.signer) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => warn!(tx_id = %tx.id, error = %e, "Payment not distributed"),
            }
        }
        receipts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{ProduceOrder, QualityDecision};

    fn tx(decision: QualityDecision, score: u32) -> Transaction {
        let buyer = KeyPair::generate().unwrap();
        let farmer = KeyPair::generate().unwrap();
        let mut tx = Transaction::new_produce(
            &buyer,
            1000.0,
            ProduceOrder {
                producer: farmer.address(),
                producer_id: "farmer-1".to_string(),
                price_per_kg: 1.0,
                quantity: 1.0,
                iot_data_ref: None,
                sample_data_ref: None,
            },
        )
        .unwrap();
        tx.quality_decision = decision;
        tx.quality_score = score;
        tx
    }

    #[test]
    fn test_mined_block_is_valid() {
        let genesis = Block::genesis();
        let block = mine_block(
            &genesis,
            vec![tx(QualityDecision::Approved, 80), tx(QualityDecision::AiApproved, 90)],
            &AtomicBool::new(false),
        )
        .unwrap();

        assert_eq!(block.quality_score, 85.0);
        assert!(Block::verify(&block, &genesis).is_ok());
        assert!(block.data.windows(2).all(|w| w[0].input.timestamp <= w[1].input.timestamp));
    }

    #[test]
    fn test_gate_refuses_low_quality_unapproved() {
        let err = mine_block(
            &Block::genesis(),
            vec![tx(QualityDecision::Approved, 40), tx(QualityDecision::Pending, 10)],
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::ConsensusGate(_)));
    }

    #[test]
    fn test_gate_allows_high_average() {
        let block = mine_block(
            &Block::genesis(),
            vec![tx(QualityDecision::Approved, 90), tx(QualityDecision::Pending, 60)],
            &AtomicBool::new(false),
        );
        assert!(block.is_ok());
    }

    #[test]
    fn test_cancelled_search() {
        let err = mine_block(
            &Block::genesis(),
            vec![tx(QualityDecision::Approved, 90)],
            &AtomicBool::new(true),
        )
        .unwrap_err();
        assert_eq!(err, ChainError::MiningCancelled);
    }

    #[test]
    fn test_difficulty_moves_by_one() {
        let genesis = Block::genesis();
        let first = mine_block(&genesis, vec![tx(QualityDecision::Approved, 90)], &AtomicBool::new(false)).unwrap();
        assert_eq!(first.difficulty, genesis.difficulty - 1);

        let second = mine_block(&first, vec![tx(QualityDecision::Approved, 90)], &AtomicBool::new(false)).unwrap();
        assert!(second.difficulty >= 1);
        assert!(second.difficulty.abs_diff(first.difficulty) <= 1);
    }
}
