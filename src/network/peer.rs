use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::blockchain::{Block, MiningStatus, Payload};

/// Errors that can occur while talking to one peer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The peer could not be reached; it is dropped from the peer set
    #[error("Peer {address} is unavailable: {reason}")]
    Unavailable { address: String, reason: String },

    /// The peer answered but refused the request
    #[error("Peer {address} rejected the request: {reason}")]
    Rejected { address: String, reason: String },
}

impl PeerError {
    pub fn unavailable(address: &str, reason: impl ToString) -> Self {
        PeerError::Unavailable {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn rejected(address: &str, reason: impl ToString) -> Self {
        PeerError::Rejected {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, PeerError::Unavailable { .. })
    }
}

/// Connection descriptor for a known peer
///
/// Holds no reference to the peer's state; the address is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PeerHandle {
    pub address: String,
}

impl PeerHandle {
    pub fn new(address: impl Into<String>) -> Self {
        PeerHandle {
            address: address.into(),
        }
    }
}

/// Outcome of a pairwise chain reconciliation, seen from the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Reconciliation {
    /// The local node replaced its chain with the peer's
    Adopted,
    /// The local node sent its chain to the peer
    Pushed,
    /// Both chains were already identical
    InSync,
}

/// The RPC surface of a remote node
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn address(&self) -> Result<String, PeerError>;

    async fn add_peer(&self, address: &str) -> Result<(), PeerError>;

    async fn list_peers(&self) -> Result<Vec<String>, PeerError>;

    async fn submit_transaction(&self, payload: &Payload) -> Result<(), PeerError>;

    async fn list_transactions(&self) -> Result<Vec<Payload>, PeerError>;

    async fn start_mining(&self, message: &str, difficulty: u32) -> Result<(), PeerError>;

    async fn stop_mining(&self, nonce: u64) -> Result<(), PeerError>;

    async fn mining_status(&self) -> Result<MiningStatus, PeerError>;

    async fn accept_block(&self, block: &Block) -> Result<(), PeerError>;

    async fn chain_length(&self) -> Result<usize, PeerError>;

    async fn last_block(&self) -> Result<Block, PeerError>;

    async fn chain(&self) -> Result<Vec<Block>, PeerError>;

    async fn replace_chain(&self, blocks: &[Block]) -> Result<(), PeerError>;

    async fn reconcile(&self, address: &str) -> Result<Reconciliation, PeerError>;

    async fn registered_transactions(&self) -> Result<Vec<Payload>, PeerError>;
}

/// Resolves a peer address into a client for that peer
pub trait PeerConnector: Send + Sync {
    fn connect(&self, address: &str) -> Arc<dyn PeerClient>;
}
