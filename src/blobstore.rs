//! Content-addressed storage for off-chain data such as IoT and sample
//! readings. A content id is the SHA-256 hex of the stored bytes.

use crate::crypto::sha256_hex;
use crate::error::ChainError;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

pub type ContentId = String;

pub trait BlobStore: Send + Sync {
    fn put(&self, bytes: Vec<u8>) -> Result<ContentId, ChainError>;
    fn get(&self, id: &str) -> Result<Vec<u8>, ChainError>;
}

pub fn put_json<T: Serialize>(store: &dyn BlobStore, value: &T) -> Result<ContentId, ChainError> {
    store.put(serde_json::to_vec(value)?)
}

pub fn get_json<T: DeserializeOwned>(store: &dyn BlobStore, id: &str) -> Result<T, ChainError> {
    let bytes = store.get(id)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, bytes: Vec<u8>) -> Result<ContentId, ChainError> {
        let id = sha256_hex(&bytes);
        self.blobs.write().entry(id.clone()).or_insert(bytes);
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Vec<u8>, ChainError> {
        self.blobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ChainError::StorageError(format!("Blob {} not found", id)))
    }
}
