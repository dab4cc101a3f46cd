use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::Digest;
use super::merkle::{MerkleAccumulator, MerkleError};
use super::miner::{hash_with_nonce, meets_difficulty, MiningCoordinator, MiningError, MiningOutcome};
use super::payload::Payload;

/// Errors that can occur while building or sealing a block
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("Nonce {nonce} does not satisfy the block's proof of work")]
    InvalidProof { nonce: u64 },

    #[error("Block is already mined")]
    AlreadyMined,

    #[error("Mining was cancelled with nonce {nonce}")]
    MiningCancelled { nonce: u64 },

    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),
}

/// Represents a block in the blockchain
///
/// A block is "unmined" until `set_nonce` accepts a nonce; after that the
/// header, nonce and hash never change.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    index: u64,

    /// Hash of the previous block
    #[schema(value_type = String)]
    previous_hash: Digest,

    /// Root of the Merkle tree over the payloads
    #[schema(value_type = String)]
    merkle_root: Digest,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2025-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    /// Required leading zero hex digits of the hash
    difficulty: u32,

    /// Proof of work, once mined
    #[serde(default)]
    nonce: Option<u64>,

    /// Hash of the header and nonce, once mined
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    hash: Option<Digest>,

    /// Payloads committed by this block
    #[schema(value_type = Object)]
    data: MerkleAccumulator,
}

impl Block {
    /// Creates a new unmined block
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `previous_hash` - The hash of the previous block
    /// * `difficulty` - Required leading zero hex digits
    /// * `payloads` - The payloads to commit (must not be empty)
    pub fn new(
        index: u64,
        previous_hash: Digest,
        difficulty: u32,
        payloads: Vec<Payload>,
    ) -> Result<Self, BlockError> {
        let data = MerkleAccumulator::build(payloads)?;
        let merkle_root = data.root()?;

        Ok(Block {
            index,
            previous_hash,
            merkle_root,
            timestamp: Utc::now(),
            difficulty,
            nonce: None,
            hash: None,
            data,
        })
    }

    /// Header fields fed to the proof of work
    ///
    /// `index ‖ timestamp ‖ previous_hash ‖ merkle_root ‖ difficulty`. Payloads
    /// are committed only through the Merkle root.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 8 + 32 + 32 + 4);
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes.extend_from_slice(&self.timestamp.timestamp_millis().to_be_bytes());
        bytes.extend_from_slice(self.previous_hash.as_bytes());
        bytes.extend_from_slice(self.merkle_root.as_bytes());
        bytes.extend_from_slice(&self.difficulty.to_be_bytes());
        bytes
    }

    /// Mines the block with a single worker
    pub fn mine(&mut self) -> Result<(), BlockError> {
        self.mine_with(&MiningCoordinator::new(1))
    }

    /// Mines the block with the given coordinator and seals it
    pub fn mine_with(&mut self, miner: &MiningCoordinator) -> Result<(), BlockError> {
        match miner.mine(&self.header_bytes(), self.difficulty)? {
            MiningOutcome::Found(nonce) => self.set_nonce(nonce),
            MiningOutcome::Cancelled(nonce) => Err(BlockError::MiningCancelled { nonce }),
        }
    }

    /// Seals the block with `nonce` if it satisfies the proof of work
    pub fn set_nonce(&mut self, nonce: u64) -> Result<(), BlockError> {
        if self.is_mined() {
            return Err(BlockError::AlreadyMined);
        }

        let hash = hash_with_nonce(&self.header_bytes(), nonce);
        if !meets_difficulty(&hash, self.difficulty) {
            return Err(BlockError::InvalidProof { nonce });
        }

        self.nonce = Some(nonce);
        self.hash = Some(hash);
        Ok(())
    }

    /// Checks the proof of work, that the stored hash matches the header and
    /// that the payloads hash up to the header's Merkle root
    pub fn is_valid(&self) -> bool {
        let (Some(nonce), Some(hash)) = (self.nonce, self.hash) else {
            return false;
        };

        meets_difficulty(&hash, self.difficulty)
            && hash_with_nonce(&self.header_bytes(), nonce) == hash
            && self.data.is_valid()
            && self.data.root().ok() == Some(self.merkle_root)
    }

    pub fn is_mined(&self) -> bool {
        self.hash.is_some()
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &Digest {
        &self.previous_hash
    }

    pub fn merkle_root(&self) -> &Digest {
        &self.merkle_root
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    pub fn hash(&self) -> Option<&Digest> {
        self.hash.as_ref()
    }

    pub fn data(&self) -> &MerkleAccumulator {
        &self.data
    }

    pub fn payloads(&self) -> &[Payload] {
        self.data.elements()
    }
}

/// Blocks are the same block when their hashes are equal
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Block {}
