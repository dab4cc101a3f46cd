use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;

use super::node::{NetworkNode, NodeError};
use super::peer::{PeerClient, PeerConnector, PeerError, Reconciliation};
use crate::blockchain::{Block, MiningStatus, Payload};

/// In-process network: routes peer calls straight to registered nodes
///
/// The registry holds weak references, so dropping a node disconnects it.
#[derive(Debug, Default)]
pub struct LocalNetwork {
    nodes: DashMap<String, Weak<NetworkNode>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `node` reachable under its own address
    pub fn register(&self, node: &Arc<NetworkNode>) {
        debug!("Registering local node {}", node.address());
        self.nodes.insert(node.address().to_string(), Arc::downgrade(node));
    }

    /// Makes the node at `address` unreachable
    pub fn disconnect(&self, address: &str) {
        self.nodes.remove(address);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl PeerConnector for LocalNetwork {
    fn connect(&self, address: &str) -> Arc<dyn PeerClient> {
        Arc::new(LocalPeer {
            address: address.to_string(),
            node: self.nodes.get(address).map(|entry| entry.value().clone()),
        })
    }
}

/// Client for a node living in the same process
struct LocalPeer {
    address: String,
    node: Option<Weak<NetworkNode>>,
}

impl LocalPeer {
    fn node(&self) -> Result<Arc<NetworkNode>, PeerError> {
        self.node
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| PeerError::unavailable(&self.address, "no such node"))
    }

    /// The node answered, so any failure on its side is a refusal
    fn rejected(&self, err: NodeError) -> PeerError {
        PeerError::rejected(&self.address, err)
    }
}

#[async_trait]
impl PeerClient for LocalPeer {
    async fn address(&self) -> Result<String, PeerError> {
        Ok(self.node()?.address().to_string())
    }

    async fn add_peer(&self, address: &str) -> Result<(), PeerError> {
        self.node()?
            .add_peer(address)
            .await
            .map(|_| ())
            .map_err(|err| self.rejected(err))
    }

    async fn list_peers(&self) -> Result<Vec<String>, PeerError> {
        Ok(self.node()?.peers())
    }

    async fn submit_transaction(&self, payload: &Payload) -> Result<(), PeerError> {
        self.node()?.submit_transaction(payload.clone()).await;
        Ok(())
    }

    async fn list_transactions(&self) -> Result<Vec<Payload>, PeerError> {
        Ok(self.node()?.pending_transactions())
    }

    async fn start_mining(&self, message: &str, difficulty: u32) -> Result<(), PeerError> {
        self.node()?
            .start_mining(message, difficulty)
            .await
            .map(|_| ())
            .map_err(|err| self.rejected(err))
    }

    async fn stop_mining(&self, nonce: u64) -> Result<(), PeerError> {
        self.node()?.stop_mining(nonce).await;
        Ok(())
    }

    async fn mining_status(&self) -> Result<MiningStatus, PeerError> {
        Ok(self.node()?.mining_status())
    }

    async fn accept_block(&self, block: &Block) -> Result<(), PeerError> {
        self.node()?
            .accept_block(block.clone())
            .await
            .map(|_| ())
            .map_err(|err| self.rejected(err))
    }

    async fn chain_length(&self) -> Result<usize, PeerError> {
        Ok(self.node()?.chain_length())
    }

    async fn last_block(&self) -> Result<Block, PeerError> {
        self.node()?.last_block().map_err(|err| self.rejected(err))
    }

    async fn chain(&self) -> Result<Vec<Block>, PeerError> {
        Ok(self.node()?.chain())
    }

    async fn replace_chain(&self, blocks: &[Block]) -> Result<(), PeerError> {
        self.node()?
            .replace_chain(blocks.to_vec())
            .map(|_| ())
            .map_err(|err| self.rejected(err))
    }

    async fn reconcile(&self, address: &str) -> Result<Reconciliation, PeerError> {
        self.node()?
            .reconcile(address)
            .await
            .map_err(|err| self.rejected(err))
    }

    async fn registered_transactions(&self) -> Result<Vec<Payload>, PeerError> {
        Ok(self.node()?.registered_transactions())
    }
}
