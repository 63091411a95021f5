//! PoQChain - a Proof-of-Quality ledger for agricultural produce
//!
//! Buyers submit produce orders backed by IoT and sample readings. Assigned
//! validators vote on each order; when they do not reach a majority, a
//! quality oracle scores the readings and decides. Only approved orders are
//! mined into blocks, and every committed order is paid out to the
//! producer, the validators and the platform.
//!
//! # Architecture
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, chain validation and replacement
//! - [`transaction`] - Produce transactions and their validation lifecycle
//! - [`mempool`] - Pending, rejected and staked transactions
//! - [`miner`] - Proof-of-Quality gate and proof-of-work search
//!
//! ## Consensus
//! - [`validator`] - Validator registry, reputation and assignment queues
//! - [`quality`] - Quality oracle contract, reference scorer, fraud checks
//! - [`payment`] - Payment split and distribution
//!
//! ## Cryptography & State
//! - [`crypto`] - Hashing and secp256k1 signatures
//! - [`merkle`] - Merkle trees and inclusion proofs
//! - [`trie`] - Keyed trie with a content root hash
//! - [`state`] - World state over keyed tries
//! - [`wallet`] - Wallets and off-chain account balances
//!
//! ## Node & Integration
//! - [`node`] - Service context, periodic mining and vote sweeps
//! - [`network`] - Publish/subscribe transport
//! - [`blobstore`] - Content-addressed storage for sensor readings
//!
//! ## Configuration & Utilities
//! - [`config`] - Protocol constants and `config.toml` loading
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod miner;
pub mod transaction;

// ============================================================================
// Consensus
// ============================================================================
pub mod payment;
pub mod quality;
pub mod validator;

// ============================================================================
// Cryptography & State
// ============================================================================
pub mod crypto;
pub mod merkle;
pub mod state;
pub mod trie;
pub mod wallet;

// ============================================================================
// Node & Integration
// ============================================================================
pub mod blobstore;
pub mod network;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
