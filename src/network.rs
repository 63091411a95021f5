//! Publish/subscribe transport contract and an in-process implementation.

use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 1024;
/// Largest payload accepted for publishing (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Blockchain,
    Transaction,
    ValidatorAssignment,
    ValidatorPool,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Blockchain => "BLOCKCHAIN",
            Channel::Transaction => "TRANSACTION",
            Channel::ValidatorAssignment => "VALIDATOR_ASSIGNMENT",
            Channel::ValidatorPool => "VALIDATOR_POOL",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

pub trait PubSub: Send + Sync {
    fn publish(&self, channel: Channel, payload: Vec<u8>) -> Result<(), ChainError>;
}

/// Fan-out over a tokio broadcast channel. Publishing with no subscriber
/// is not an error; oversized payloads are.
#[derive(Debug, Clone)]
pub struct InMemoryPubSub {
    sender: broadcast::Sender<Message>,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryPubSub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }
}

impl PubSub for InMemoryPubSub {
    fn publish(&self, channel: Channel, payload: Vec<u8>) -> Result<(), ChainError> {
        let bytes = payload.len();
        if bytes > MAX_MESSAGE_SIZE {
            return Err(ChainError::NetworkError(format!(
                "Message on {} is {} bytes (max: {})",
                channel, bytes, MAX_MESSAGE_SIZE
            )));
        }
        match self.sender.send(Message { channel, payload }) {
            Ok(receivers) => debug!(%channel, bytes, receivers, "Message published"),
            Err(_) => debug!(%channel, bytes, "Message published with no subscribers"),
        }
        Ok(())
    }
}
