use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Block, Payload};
use crate::network::Reconciliation;

/// Response for the address endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddressResponse {
    /// The address peers use to reach this node
    pub address: String,
}

/// Request naming a peer
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PeerRequest {
    /// Base URL of the peer, e.g. `http://127.0.0.1:8081`
    pub address: String,
}

/// Request for the transaction endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// Encoded payload to commit
    pub payload: Payload,
}

/// Request for the start mining endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartMiningRequest {
    /// Label of the requester; defaults to the node's address
    #[serde(default)]
    pub message: Option<String>,

    /// Required leading zero hex digits
    pub difficulty: u32,
}

/// Request for the stop mining endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StopMiningRequest {
    /// Nonce of the winning block
    pub nonce: u64,
}

/// Response for operations that may or may not change state
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AckResponse {
    /// Whether the request changed the node's state
    pub changed: bool,
}

/// Response for the chain length endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LengthResponse {
    pub length: usize,
}

/// Response for the chain endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Response for the reconcile endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    pub outcome: Reconciliation,
}
