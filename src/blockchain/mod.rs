// Blockchain module
//
// This module contains the ledger engine:
// - Digest and hashing utilities
// - Payload wrapper for opaque application data
// - Merkle accumulator over block payloads
// - Block structure with proof-of-work validation
// - Parallel mining coordinator
// - Chain with persistent storage

pub mod block;
pub mod chain;
pub mod crypto;
pub mod merkle;
pub mod miner;
pub mod payload;
pub mod storage;

// Re-export main components for easier access
pub use block::{Block, BlockError};
pub use chain::{Chain, ChainError};
pub use crypto::Digest;
pub use merkle::{MerkleAccumulator, MerkleError, MerkleProof, ProofStep};
pub use miner::{
    MinerListener, MiningCoordinator, MiningOutcome, MiningState, MiningStatus, MAX_DIFFICULTY,
};
pub use payload::Payload;
