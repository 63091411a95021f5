//! Node service context.
//!
//! A `Node` owns every piece of shared ledger state behind
//! `Arc<tokio::sync::RwLock<_>>` handles and exposes the operations an API
//! layer drives: submitting produce, voting on it, mining, and reading the
//! chain, pool and validator registry. It also runs the periodic miner and
//! quorum-timeout sweep and applies messages arriving from peers.
//!
//! Locks are always taken in the order
//! `blockchain -> pool -> validators -> accounts -> world_state`.

use crate::blobstore::{get_json, put_json, BlobStore};
use crate::blockchain::{Block, Blockchain, ChainSnapshot};
use crate::config::{Config, STARTING_BALANCE};
use crate::crypto::Address;
use crate::error::ChainError;
use crate::mempool::TransactionPool;
use crate::miner::{MinedBlock, TransactionMiner};
use crate::network::{Channel, Message, PubSub};
use crate::payment::PaymentDistributor;
use crate::quality::{QualityOracle, SensorReading, ValidationRecord};
use crate::state::WorldState;
use crate::transaction::{FinalizeContext, ProduceOrder, QualityDecision, Transaction, Vote};
use crate::validator::{ValidatorPool, ValidatorPoolSnapshot};
use crate::wallet::{Wallet, WalletRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Ready,
    Stopped,
}

/// A produce order as submitted by a buyer, with the readings that back it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceSubmission {
    pub producer: Address,
    pub producer_id: String,
    pub price_per_kg: f64,
    pub quantity: f64,
    pub iot_data: Option<SensorReading>,
    pub sample_data: Option<SensorReading>,
}

/// Payload of the `VALIDATOR_ASSIGNMENT` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentNotice {
    pub transaction_id: String,
    pub validators: Vec<String>,
}

pub struct Node {
    pub config: Config,
    pub blockchain: Arc<RwLock<Blockchain>>,
    pub pool: Arc<RwLock<TransactionPool>>,
    pub validators: Arc<RwLock<ValidatorPool>>,
    pub accounts: Arc<RwLock<WalletRegistry>>,
    pub world_state: Arc<RwLock<WorldState>>,
    pub status: Arc<RwLock<NodeState>>,
    wallet: parking_lot::Mutex<Wallet>,
    oracle: Arc<dyn QualityOracle>,
    blobs: Arc<dyn BlobStore>,
    pubsub: Arc<dyn PubSub>,
    miner: TransactionMiner,
}

impl Node {
    pub fn new(
        config: Config,
        wallet: Wallet,
        oracle: Arc<dyn QualityOracle>,
        blobs: Arc<dyn BlobStore>,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        let blockchain = Arc::new(RwLock::new(Blockchain::new()));
        let pool = Arc::new(RwLock::new(TransactionPool::new()));
        let validators = Arc::new(RwLock::new(ValidatorPool::new()));
        let world_state = Arc::new(RwLock::new(WorldState::new()));

        let mut registry = WalletRegistry::new();
        registry.register(&wallet.address(), STARTING_BALANCE);
        let accounts = Arc::new(RwLock::new(registry));

        let distributor = PaymentDistributor::new(
            config.payments.validator_split,
            config.payments.platform_address.clone(),
        );
        let miner = TransactionMiner::new(
            blockchain.clone(),
            pool.clone(),
            validators.clone(),
            accounts.clone(),
            world_state.clone(),
            pubsub.clone(),
            distributor,
            wallet.keypair().clone(),
        );

        info!(
            network_id = %config.node.network_id,
            address = %wallet.address(),
            "Node initialized"
        );

        Node {
            config,
            blockchain,
            pool,
            validators,
            accounts,
            world_state,
            status: Arc::new(RwLock::new(NodeState::Booting)),
            wallet: parking_lot::Mutex::new(wallet),
            oracle,
            blobs,
            pubsub,
            miner,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.lock().address()
    }

    pub fn miner(&self) -> &TransactionMiner {
        &self.miner
    }

    fn publish_json<T: Serialize>(&self, channel: Channel, value: &T) {
        match serde_json::to_vec(value) {
            Ok(payload) => {
                if let Err(e) = self.pubsub.publish(channel, payload) {
                    warn!(%channel, error = %e, "Failed to publish");
                }
            }
            Err(e) => warn!(%channel, error = %e, "Failed to encode message"),
        }
    }

    fn load_reading(&self, content_id: Option<&str>) -> Option<SensorReading> {
        let id = content_id?;
        match get_json(self.blobs.as_ref(), id) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(content_id = id, error = %e, "Sensor reading unavailable");
                None
            }
        }
    }

    /// Register a validator, open an account for it and announce the pool.
    pub async fn register_validator(&self, id: &str) -> Result<bool, ChainError> {
        let snapshot = {
            let mut validators = self.validators.write().await;
            if !validators.register_validator(id) {
                return Ok(false);
            }
            validators.snapshot()
        };
        self.accounts.write().await.register(id, 0.0);
        self.world_state.write().await.put_validator(id, 0, 0)?;

        self.publish_json(Channel::ValidatorPool, &snapshot);
        Ok(true)
    }

    /// Create a signed produce transaction from this node's wallet, assign it
    /// to validators and add it to the pool.
    pub async fn submit_produce(&self, submission: ProduceSubmission) -> Result<Transaction, ChainError> {
        let iot_data_ref = submission
            .iot_data
            .as_ref()
            .map(|reading| put_json(self.blobs.as_ref(), reading))
            .transpose()?;
        let sample_data_ref = submission
            .sample_data
            .as_ref()
            .map(|reading| put_json(self.blobs.as_ref(), reading))
            .transpose()?;

        let order = ProduceOrder {
            producer: submission.producer,
            producer_id: submission.producer_id,
            price_per_kg: submission.price_per_kg,
            quantity: submission.quantity,
            iot_data_ref,
            sample_data_ref,
        };

        let blockchain = self.blockchain.read().await;
        let mut pool = self.pool.write().await;
        let address = self.address();
        if let Some(pending) = pool.existing_transaction(&address) {
            return Err(ChainError::InvalidTransaction(format!(
                "Wallet already has pending transaction {}",
                pending.id
            )));
        }

        let mut tx = self
            .wallet
            .lock()
            .create_transaction(order, Some(blockchain.chain()))?;
        tx.validate_size()?;

        let assigned = self
            .validators
            .write()
            .await
            .assign_transaction(&tx.id, self.config.consensus.validators_per_transaction)?;
        tx.assign_validators(assigned.clone(), chrono::Utc::now().timestamp_millis())?;
        pool.set_transaction(tx.clone());
        drop(pool);
        drop(blockchain);

        self.world_state.write().await.put_account(
            &address,
            serde_json::json!({ "lastSubmitted": tx.id }),
        )?;

        info!(
            tx_id = %tx.id,
            producer_id = %tx.producer_id,
            amount = tx.order_amount(),
            validators = ?assigned,
            "Produce submitted"
        );

        self.publish_json(Channel::Transaction, &tx);
        self.publish_json(
            Channel::ValidatorAssignment,
            &AssignmentNotice {
                transaction_id: tx.id.clone(),
                validators: assigned,
            },
        );
        Ok(tx)
    }

    /// Record a validator's vote and finalize the transaction once every
    /// assigned validator has voted. A validator inspecting a physical
    /// sample may attach its reading. Votes that do not count leave the
    /// transaction untouched.
    pub async fn validate_produce(
        &self,
        validator_id: &str,
        tx_id: &str,
        vote: Vote,
        sample: Option<SensorReading>,
    ) -> Result<Transaction, ChainError> {
        let mut pool = self.pool.write().await;
        let mut tx = pool
            .get(tx_id)
            .cloned()
            .ok_or_else(|| ChainError::TransactionNotFound(tx_id.to_string()))?;

        // Votes from unassigned validators or on a finalized transaction are
        // logged and dropped; the transaction comes back unchanged.
        if !tx.update_validation(validator_id, vote) {
            return Ok(tx);
        }
        if let Some(reading) = sample {
            tx.sample_data_ref = Some(put_json(self.blobs.as_ref(), &reading)?);
        }
        info!(tx_id, validator = validator_id, ?vote, "Vote recorded");

        let mut validators = self.validators.write().await;
        let mut world_state = self.world_state.write().await;

        let iot = self.load_reading(tx.iot_data_ref.as_deref());
        let sample = self.load_reading(tx.sample_data_ref.as_deref());
        let history = world_state.producer_history(&tx.producer_id).to_vec();
        let ctx = FinalizeContext {
            iot: iot.as_ref(),
            sample: sample.as_ref(),
            history: &history,
        };

        let decision = tx.finalize(self.oracle.as_ref(), &ctx);
        pool.set_transaction(tx.clone());

        if let Some(decision) = decision {
            settle(&tx, &mut validators, &mut world_state)?;
            if decision == QualityDecision::Rejected {
                pool.reject_transaction(&tx.id);
            }
            let snapshot = validators.snapshot();
            drop(world_state);
            drop(validators);
            drop(pool);
            self.publish_json(Channel::ValidatorPool, &snapshot);
        }

        self.publish_json(Channel::Transaction, &tx);
        Ok(tx)
    }

    /// Finalize every transaction whose votes are still incomplete after the
    /// quorum timeout. Returns the ids finalized.
    pub async fn sweep_expired_votes(&self, now: i64) -> Result<Vec<String>, ChainError> {
        let timeout_ms = (self.config.consensus.quorum_timeout_secs as i64).saturating_mul(1000);

        let mut pool = self.pool.write().await;
        let expired: Vec<Transaction> = pool
            .transactions()
            .filter(|tx| tx.quorum_expired(now, timeout_ms))
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let mut validators = self.validators.write().await;
        let mut world_state = self.world_state.write().await;
        let mut finalized = Vec::with_capacity(expired.len());

        for mut tx in expired {
            let iot = self.load_reading(tx.iot_data_ref.as_deref());
            let sample = self.load_reading(tx.sample_data_ref.as_deref());
            let history = world_state.producer_history(&tx.producer_id).to_vec();
            let ctx = FinalizeContext {
                iot: iot.as_ref(),
                sample: sample.as_ref(),
                history: &history,
            };

            let decision = tx.finalize_on_timeout(self.oracle.as_ref(), &ctx);
            settle(&tx, &mut validators, &mut world_state)?;
            pool.set_transaction(tx.clone());
            if decision == QualityDecision::Rejected {
                pool.reject_transaction(&tx.id);
            }
            finalized.push(tx.id);
        }

        let snapshot = validators.snapshot();
        drop(world_state);
        drop(validators);
        drop(pool);

        info!(count = finalized.len(), "Finalized transactions after quorum timeout");
        self.publish_json(Channel::ValidatorPool, &snapshot);
        Ok(finalized)
    }

    /// A validator stakes on a rejected transaction, returning it to the pool.
    pub async fn stake_override(&self, tx_id: &str, validator_id: &str) -> Result<(), ChainError> {
        let mut pool = self.pool.write().await;
        if self.validators.read().await.get(validator_id).is_none() {
            return Err(ChainError::ValidatorNotFound(validator_id.to_string()));
        }
        pool.stake_validator_transaction(tx_id, validator_id)?;
        if let Some(tx) = pool.get(tx_id).cloned() {
            drop(pool);
            self.publish_json(Channel::Transaction, &tx);
        }
        Ok(())
    }

    /// Give rejected transactions another pass through the quality oracle.
    pub async fn revalidate_rejected(&self) -> Vec<String> {
        let mut pool = self.pool.write().await;
        let restored = pool.revalidate_rejected(self.oracle.as_ref(), |tx| {
            (
                self.load_reading(tx.iot_data_ref.as_deref()),
                self.load_reading(tx.sample_data_ref.as_deref()),
            )
        });
        if !restored.is_empty() {
            info!(count = restored.len(), "Rejected transactions restored to the pool");
        }
        restored
    }

    pub async fn mine(&self) -> Result<Option<MinedBlock>, ChainError> {
        self.miner.mine_transactions().await
    }

    pub async fn get_blocks(&self) -> Vec<Block> {
        self.blockchain.read().await.chain().to_vec()
    }

    pub async fn get_validators(&self) -> ValidatorPoolSnapshot {
        self.validators.read().await.snapshot()
    }

    pub async fn get_transaction_pool(&self) -> BTreeMap<String, Transaction> {
        self.pool.read().await.transaction_map().clone()
    }

    pub async fn chain_merkle_levels(&self) -> Vec<Vec<String>> {
        self.blockchain.read().await.merkle_levels()
    }

    /// A final decision from a peer must follow from the votes it carries,
    /// or from a stake override by a validator this node knows.
    async fn verify_peer_decision(&self, tx: &Transaction) -> Result<(), ChainError> {
        let timeout_ms = (self.config.consensus.quorum_timeout_secs as i64).saturating_mul(1000);
        let iot = self.load_reading(tx.iot_data_ref.as_deref());
        let sample = self.load_reading(tx.sample_data_ref.as_deref());
        let history = self.world_state.read().await.producer_history(&tx.producer_id).to_vec();
        let ctx = FinalizeContext {
            iot: iot.as_ref(),
            sample: sample.as_ref(),
            history: &history,
        };

        let recomputed = tx.recompute_decision(
            self.oracle.as_ref(),
            &ctx,
            chrono::Utc::now().timestamp_millis(),
            timeout_ms,
        );
        if recomputed == Some(tx.quality_decision) {
            return Ok(());
        }
        if recomputed == Some(QualityDecision::Rejected) {
            if let Some(staker) = tx.stake_override_validator() {
                if self.validators.read().await.get(staker).is_some() {
                    return Ok(());
                }
            }
        }

        warn!(
            tx_id = %tx.id,
            claimed = ?tx.quality_decision,
            recomputed = ?recomputed,
            "Peer decision not backed by votes"
        );
        Err(ChainError::Unauthorized(format!(
            "Decision {:?} for transaction {} is not backed by its votes",
            tx.quality_decision, tx.id
        )))
    }

    /// Apply a message received from a peer.
    pub async fn handle_message(&self, message: &Message) -> Result<(), ChainError> {
        debug!(channel = %message.channel, bytes = message.payload.len(), "Message received");
        match message.channel {
            Channel::Blockchain => {
                let snapshot: ChainSnapshot = serde_json::from_slice(&message.payload)?;
                let mut blockchain = self.blockchain.write().await;
                if snapshot.merkle_root == blockchain.merkle_root() && snapshot.chain.len() == blockchain.len() {
                    return Ok(());
                }
                blockchain.replace_chain(snapshot, true, |_| {
                    self.miner.cancel();
                })?;

                let mut pool = self.pool.write().await;
                pool.clear_blockchain_transactions(blockchain.chain());
                info!(length = blockchain.len(), pending = pool.len(), "Adopted peer chain");
            }
            Channel::Transaction => {
                let json = std::str::from_utf8(&message.payload)
                    .map_err(|e| ChainError::SerializationError(e.to_string()))?;
                let tx = Transaction::from_json(json)?;
                if tx.quality_decision.is_final() {
                    self.verify_peer_decision(&tx).await?;
                }
                let mut pool = self.pool.write().await;
                if let Some(local) = pool.get(&tx.id) {
                    if local.quality_decision.is_final() && !tx.quality_decision.is_final() {
                        debug!(tx_id = %tx.id, "Ignoring stale transaction update");
                        return Ok(());
                    }
                }
                debug!(tx_id = %tx.id, "Transaction received from peer");
                pool.set_transaction(tx);
            }
            Channel::ValidatorAssignment => {
                let notice: AssignmentNotice = serde_json::from_slice(&message.payload)?;
                let mut pool = self.pool.write().await;
                if let Some(tx) = pool.get_mut(&notice.transaction_id) {
                    if tx.assigned_validators.is_empty() {
                        tx.assign_validators(notice.validators, chrono::Utc::now().timestamp_millis())?;
                    }
                }
            }
            Channel::ValidatorPool => {
                let snapshot: ValidatorPoolSnapshot = serde_json::from_slice(&message.payload)?;
                self.validators.write().await.sync_validator_pool(snapshot)?;
            }
        }
        Ok(())
    }

    /// Apply inbound messages until the sender side closes.
    pub async fn listen(self: Arc<Self>, mut inbound: broadcast::Receiver<Message>) {
        loop {
            match inbound.recv().await {
                Ok(message) => {
                    if let Err(e) = self.handle_message(&message).await {
                        warn!(channel = %message.channel, error = %e, "Failed to apply message");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Inbound messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Inbound channel closed");
                    break;
                }
            }
        }
    }

    /// Run the periodic miner and quorum sweep until the process stops.
    pub async fn run(self: Arc<Self>) {
        *self.status.write().await = NodeState::Ready;
        info!(
            mining = self.config.mining.enabled,
            interval_secs = self.config.mining.interval_secs,
            quorum_timeout_secs = self.config.consensus.quorum_timeout_secs,
            "Node ready"
        );

        let mining = if self.config.mining.enabled {
            let node = self.clone();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(node.config.mining.interval_secs));
                loop {
                    ticker.tick().await;
                    match node.mine().await {
                        Ok(Some(mined)) => info!(
                            hash = %mined.block.hash,
                            payments = mined.receipts.len(),
                            "Block added"
                        ),
                        Ok(None) => {}
                        Err(ChainError::MiningCancelled) => info!("Mining round cancelled"),
                        Err(e) => warn!(error = %e, "Mining round failed"),
                    }
                }
            }))
        } else {
            None
        };

        let node = self.clone();
        let sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(node.config.consensus.sweep_interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = node.sweep_expired_votes(chrono::Utc::now().timestamp_millis()).await {
                    error!(error = %e, "Quorum sweep failed");
                }
            }
        });

        if let Err(e) = sweep.await {
            error!(error = %e, "Quorum sweep task stopped");
        }
        if let Some(mining) = mining {
            mining.abort();
        }
        *self.status.write().await = NodeState::Stopped;
    }
}

/// Apply the consequences of a final decision: reputation by vote accuracy,
/// fraud records, queue release and the producer's history.
fn settle(tx: &Transaction, validators: &mut ValidatorPool, world_state: &mut WorldState) -> Result<(), ChainError> {
    let approved = tx.quality_decision.is_approved();

    for id in &tx.assigned_validators {
        validators.remove_transaction_from_queue(id, &tx.id);
        match tx.validator_approvals.get(id) {
            Some(&vote) => {
                let accurate = vote.is_affirmative() == approved;
                if validators.update_reputation(id, accurate).is_some() {
                    let delta = if accurate { 5 } else { -10 };
                    world_state.put_validator(id, delta, u64::from(vote.is_affirmative()))?;
                }
                if let Some(reason) = validators.record_validation(
                    id,
                    ValidationRecord {
                        quality_score: tx.quality_score,
                        vote,
                    },
                ) {
                    warn!(validator = %id, %reason, "Validator flagged");
                }
            }
            None => {
                if validators.update_reputation(id, false).is_some() {
                    world_state.put_validator(id, -10, 0)?;
                }
            }
        }
    }

    world_state.record_decision(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use crate::network::InMemoryPubSub;
    use crate::quality::WeightedQualityOracle;

    fn node() -> Node {
        Node::new(
            Config::default(),
            Wallet::new().unwrap(),
            Arc::new(WeightedQualityOracle::default()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(InMemoryPubSub::default()),
        )
    }

    fn submission(iot: SensorReading, sample: SensorReading) -> ProduceSubmission {
        ProduceSubmission {
            producer: "farmer-address".to_string(),
            producer_id: "farmer-1".to_string(),
            price_per_kg: 10.0,
            quantity: 5.0,
            iot_data: Some(iot),
            sample_data: Some(sample),
        }
    }

    async fn with_validators(node: &Node, count: usize) {
        for i in 0..count {
            node.register_validator(&format!("v{}", i)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_submit_requires_validators() {
        let node = node();
        let err = node
            .submit_produce(submission(SensorReading::new(30.0, 80.0, 90.0), SensorReading::new(31.0, 79.0, 88.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::CapacityExhausted(_)));
        assert!(node.get_transaction_pool().await.is_empty());
    }

    #[tokio::test]
    async fn test_unassigned_vote_is_ignored() {
        let node = node();
        with_validators(&node, 3).await;
        let tx = node
            .submit_produce(submission(SensorReading::new(30.0, 80.0, 90.0), SensorReading::new(31.0, 79.0, 88.0)))
            .await
            .unwrap();

        let returned = node
            .validate_produce("stranger", &tx.id, Vote::Approved, Some(SensorReading::new(1.0, 1.0, 1.0)))
            .await
            .unwrap();
        assert!(returned.validator_approvals.is_empty());
        assert_eq!(returned.sample_data_ref, tx.sample_data_ref);

        let pooled = &node.get_transaction_pool().await[&tx.id];
        assert!(pooled.validator_approvals.is_empty());
        assert_eq!(pooled.quality_decision, QualityDecision::Pending);
    }

    #[tokio::test]
    async fn test_one_pending_transaction_per_wallet() {
        let node = node();
        with_validators(&node, 3).await;
        let reading = SensorReading::new(30.0, 80.0, 90.0);
        node.submit_produce(submission(reading.clone(), reading.clone())).await.unwrap();
        let err = node.submit_produce(submission(reading.clone(), reading)).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidTransaction(_)));
    }

    #[tokio::test]
    async fn test_majority_approval_rewards_voters() {
        let node = node();
        with_validators(&node, 3).await;
        let tx = node
            .submit_produce(submission(SensorReading::new(30.0, 80.0, 90.0), SensorReading::new(10.0, 20.0, 10.0)))
            .await
            .unwrap();

        for id in &tx.assigned_validators {
            node.validate_produce(id, &tx.id, Vote::Approved, None).await.unwrap();
        }
        // Majority approval wins over a poor oracle score.
        let pool = node.get_transaction_pool().await;
        assert_eq!(pool[&tx.id].quality_decision, QualityDecision::Approved);

        let validators = node.get_validators().await;
        for id in &tx.assigned_validators {
            assert_eq!(validators[id].reputation, 105);
            assert!(validators[id].queue.is_empty());
        }
    }

    #[tokio::test]
    async fn test_sweep_finalizes_incomplete_votes() {
        let node = node();
        with_validators(&node, 3).await;
        let tx = node
            .submit_produce(submission(SensorReading::new(30.0, 80.0, 90.0), SensorReading::new(31.0, 79.0, 88.0)))
            .await
            .unwrap();
        let voter = tx.assigned_validators[0].clone();
        node.validate_produce(&voter, &tx.id, Vote::Approved, None).await.unwrap();

        let assigned_at = node.get_transaction_pool().await[&tx.id].assigned_at.unwrap();
        assert!(node.sweep_expired_votes(assigned_at + 1).await.unwrap().is_empty());

        let finalized = node.sweep_expired_votes(assigned_at + 60_000).await.unwrap();
        assert_eq!(finalized, vec![tx.id.clone()]);

        let pooled = &node.get_transaction_pool().await[&tx.id];
        assert_eq!(pooled.quality_decision, QualityDecision::AiApproved);

        let validators = node.get_validators().await;
        assert_eq!(validators[&voter].reputation, 105);
        for silent in &tx.assigned_validators[1..] {
            assert_eq!(validators[silent].reputation, 90);
        }
    }
}
