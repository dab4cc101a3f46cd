use std::cmp::Ordering as CmpOrdering;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use super::listener::NodeListener;
use super::peer::{PeerClient, PeerConnector, PeerError, PeerHandle, Reconciliation};
use crate::blockchain::{
    Block, BlockError, Chain, ChainError, Digest, MiningCoordinator, MiningOutcome, MiningStatus,
    Payload,
};

/// Errors that can occur during node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
}

/// Which way a reconciliation moves a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Adopt,
    Push,
    None,
}

/// A ledger node: one chain, a mempool, a miner and a set of peers
///
/// Every operation is safe to call concurrently. Gossip reaches every known
/// peer, and each peer forwards further; duplicates are dropped on arrival,
/// which is what makes the flood terminate. Fan-out runs in the background,
/// so a slow or silent peer never holds up the caller.
pub struct NetworkNode {
    address: String,

    chain: Chain,

    /// Known peers, keyed by address
    peers: DashMap<String, PeerHandle>,

    /// Pending payloads with their arrival sequence
    pending: DashMap<Payload, u64>,

    arrivals: AtomicU64,

    miner: Arc<MiningCoordinator>,

    /// Run number and parent hash of the block being mined, if any
    candidate: Mutex<Option<(u64, Digest)>>,

    runs: AtomicU64,

    connector: Arc<dyn PeerConnector>,

    listener: Option<Arc<dyn NodeListener>>,
}

impl std::fmt::Debug for NetworkNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkNode")
            .field("address", &self.address)
            .field("chain_length", &self.chain.len())
            .field("peers", &self.peers.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl NetworkNode {
    /// Creates a node that mines with a single worker and has no listener
    ///
    /// # Arguments
    ///
    /// * `address` - The address peers use to reach this node
    /// * `chain` - The node's chain
    /// * `connector` - Resolves peer addresses into clients
    pub fn new(address: impl Into<String>, chain: Chain, connector: Arc<dyn PeerConnector>) -> Self {
        NetworkNode {
            address: address.into(),
            chain,
            peers: DashMap::new(),
            pending: DashMap::new(),
            arrivals: AtomicU64::new(0),
            miner: Arc::new(MiningCoordinator::new(1)),
            candidate: Mutex::new(None),
            runs: AtomicU64::new(0),
            connector,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn NodeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_miner(mut self, miner: MiningCoordinator) -> Self {
        self.miner = Arc::new(miner);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Known peer addresses, sorted
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.iter().map(|entry| entry.key().clone()).collect();
        peers.sort();
        peers
    }

    /// Pending payloads in arrival order
    pub fn pending_transactions(&self) -> Vec<Payload> {
        let mut pending: Vec<(u64, Payload)> = self
            .pending
            .iter()
            .map(|entry| (*entry.value(), entry.key().clone()))
            .collect();
        pending.sort_by_key(|(sequence, _)| *sequence);
        pending.into_iter().map(|(_, payload)| payload).collect()
    }

    pub fn chain_length(&self) -> usize {
        self.chain.len()
    }

    pub fn last_block(&self) -> Result<Block, NodeError> {
        Ok(self.chain.last_block()?)
    }

    pub fn chain(&self) -> Vec<Block> {
        self.chain.blocks()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.chain.block(index)
    }

    pub fn mining_status(&self) -> MiningStatus {
        self.miner.status()
    }

    /// Every payload committed by the chain, oldest first
    pub fn registered_transactions(&self) -> Vec<Payload> {
        self.chain.registered_payloads()
    }

    pub fn is_chain_valid(&self) -> bool {
        self.chain.is_valid()
    }

    pub fn notify_sale_completed(&self, payload: &Payload) {
        if let Some(listener) = &self.listener {
            listener.on_sale_completed(payload);
        }
    }

    /// Connects to the peer at `address`
    ///
    /// Pulls the peer's mempool, asks it to connect back, reconciles chains
    /// with it and introduces it to every other known peer. Returns `false`
    /// when the peer is this node or already known. A failed handshake leaves
    /// the peer out of the peer set.
    pub async fn add_peer(self: &Arc<Self>, address: &str) -> Result<bool, NodeError> {
        if address == self.address || self.peers.contains_key(address) {
            return Ok(false);
        }

        // inserted first so that the peer's call back into us is a no-op
        self.peers.insert(address.to_string(), PeerHandle::new(address));
        info!("Adding peer {}", address);

        let peer = self.connector.connect(address);
        if let Err(err) = self.register_with(peer.as_ref()).await {
            self.peers.remove(address);
            warn!("Handshake with peer {} failed: {}", address, err);
            return Err(err);
        }

        let introduced = address.to_string();
        self.broadcast(Some(address), "add peer", |client| {
            let introduced = introduced.clone();
            async move { client.add_peer(&introduced).await }
        });

        if let Some(listener) = &self.listener {
            listener.on_connect(address);
        }
        Ok(true)
    }

    async fn register_with(&self, peer: &dyn PeerClient) -> Result<(), NodeError> {
        for payload in peer.list_transactions().await? {
            self.insert_pending(payload);
        }
        peer.add_peer(&self.address).await?;
        self.reconcile_with(peer).await?;
        Ok(())
    }

    /// Adds a payload to the mempool and gossips it
    ///
    /// Returns `false` when the payload is already pending.
    pub async fn submit_transaction(self: &Arc<Self>, payload: Payload) -> bool {
        if !self.insert_pending(payload.clone()) {
            return false;
        }

        debug!("Accepted pending transaction {}", payload.digest());
        if let Some(listener) = &self.listener {
            listener.on_transaction(&payload);
        }

        self.broadcast(None, "transaction", |client| {
            let payload = payload.clone();
            async move { client.submit_transaction(&payload).await }
        });
        true
    }

    /// Starts mining the whole mempool and asks every peer to do the same
    ///
    /// Returns `false` when already mining or when nothing is pending. The
    /// search runs in the background; its result is sealed and gossiped by
    /// the node itself.
    pub async fn start_mining(self: &Arc<Self>, message: &str, difficulty: u32) -> Result<bool, NodeError> {
        if self.miner.is_mining() {
            return Ok(false);
        }

        let payloads = self.pending_transactions();
        if payloads.is_empty() {
            return Ok(false);
        }

        let candidate = self.chain.create_candidate_with_difficulty(payloads, difficulty)?;
        if !self.miner.try_begin() {
            return Ok(false);
        }

        info!(
            "Mining block {} with {} transaction(s) at difficulty {}",
            candidate.index(),
            candidate.payloads().len(),
            difficulty
        );
        let run = self.runs.fetch_add(1, Ordering::Relaxed);
        *self.candidate.lock() = Some((run, *candidate.previous_hash()));
        if let Some(listener) = &self.listener {
            listener.on_message(&format!("Mining requested by {}", message));
        }

        tokio::spawn(Arc::clone(self).run_mining(run, candidate));

        let message = message.to_string();
        self.broadcast(None, "start mining", |client| {
            let message = message.clone();
            async move { client.start_mining(&message, difficulty).await }
        });
        Ok(true)
    }

    /// Searches a nonce for `block` and publishes the result
    async fn run_mining(self: Arc<Self>, run: u64, block: Block) {
        let miner = Arc::clone(&self.miner);
        let header = block.header_bytes();
        let difficulty = block.difficulty();
        let outcome = tokio::task::spawn_blocking(move || miner.search(&header, difficulty)).await;
        self.release_candidate(run);

        match outcome {
            Ok(MiningOutcome::Found(nonce)) => {
                if let Err(err) = self.seal_candidate(block, nonce).await {
                    warn!("Could not publish mined block: {}", err);
                }
            }
            Ok(MiningOutcome::Cancelled(nonce)) => {
                info!("Dropped candidate block after stop with nonce {}", nonce);
            }
            Err(err) => {
                error!("Mining task failed: {}", err);
            }
        }
    }

    /// Commits a block this node mined, then tells peers to stop
    async fn seal_candidate(self: &Arc<Self>, mut block: Block, nonce: u64) -> Result<(), NodeError> {
        block.set_nonce(nonce)?;
        self.accept_block(block).await?;

        self.broadcast(None, "stop mining", move |client| async move {
            client.stop_mining(nonce).await
        });
        Ok(())
    }

    fn release_candidate(&self, run: u64) {
        let mut slot = self.candidate.lock();
        if matches!(*slot, Some((current, _)) if current == run) {
            *slot = None;
        }
    }

    /// Stops the local search and tells every peer to stop too
    ///
    /// Returns `false` when nothing was being mined. The local search stops
    /// whether or not any peer answers.
    pub async fn stop_mining(self: &Arc<Self>, nonce: u64) -> bool {
        if !self.miner.stop(nonce) {
            return false;
        }

        self.broadcast(None, "stop mining", move |client| async move {
            client.stop_mining(nonce).await
        });
        true
    }

    /// Appends a mined block and gossips it
    ///
    /// Returns `false` for a block the chain already holds. Blocks that do
    /// not extend the tail are refused with `NodeError::Chain`.
    pub async fn accept_block(self: &Arc<Self>, block: Block) -> Result<bool, NodeError> {
        if let Some(hash) = block.hash() {
            if self.chain.contains(hash) {
                return Ok(false);
            }
        }

        match self.chain.append(block.clone()) {
            Ok(()) => {}
            Err(ChainError::DuplicateBlock) => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        self.remove_pending(block.payloads());
        self.abandon_stale_candidate();
        self.notify_chain_changed();

        self.broadcast(None, "block", |client| {
            let block = block.clone();
            async move { client.accept_block(&block).await }
        });
        Ok(true)
    }

    /// Replaces the local chain with `blocks`
    ///
    /// Returns `false` when the chains are already identical.
    pub fn replace_chain(&self, blocks: Vec<Block>) -> Result<bool, NodeError> {
        if self.chain.blocks() == blocks {
            return Ok(false);
        }

        self.chain.replace_all(blocks)?;
        self.remove_pending(&self.chain.registered_payloads());
        self.abandon_stale_candidate();
        self.notify_chain_changed();
        Ok(true)
    }

    /// Brings this node and the peer at `address` to the same chain
    ///
    /// The longer chain wins. At equal length the chain whose last block is
    /// newer wins, and an exact timestamp tie goes to the smaller last hash.
    /// Timestamps come from each miner's clock, so skew can pick the "wrong"
    /// side; both sides still converge on the same chain.
    pub async fn reconcile(&self, address: &str) -> Result<Reconciliation, NodeError> {
        let peer = self.connector.connect(address);
        let result = self.reconcile_with(peer.as_ref()).await;
        if let Err(NodeError::Peer(err)) = &result {
            self.handle_peer_error(address, "reconcile", err);
        }
        result
    }

    async fn reconcile_with(&self, peer: &dyn PeerClient) -> Result<Reconciliation, NodeError> {
        let remote_length = peer.chain_length().await?;
        let local_length = self.chain.len();

        let direction = match remote_length.cmp(&local_length) {
            CmpOrdering::Greater => Direction::Adopt,
            CmpOrdering::Less => Direction::Push,
            CmpOrdering::Equal => {
                let remote_last = peer.last_block().await?;
                let local_last = self.chain.last_block()?;
                compare_tails(&local_last, &remote_last)
            }
        };

        match direction {
            Direction::Adopt => {
                let blocks = peer.chain().await?;
                if self.replace_chain(blocks)? {
                    info!("Adopted chain of length {}", self.chain.len());
                    Ok(Reconciliation::Adopted)
                } else {
                    Ok(Reconciliation::InSync)
                }
            }
            Direction::Push => {
                peer.replace_chain(&self.chain.blocks()).await?;
                Ok(Reconciliation::Pushed)
            }
            Direction::None => Ok(Reconciliation::InSync),
        }
    }

    fn insert_pending(&self, payload: Payload) -> bool {
        match self.pending.entry(payload) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(self.arrivals.fetch_add(1, Ordering::Relaxed));
                true
            }
        }
    }

    fn remove_pending(&self, payloads: &[Payload]) {
        for payload in payloads {
            self.pending.remove(payload);
        }
    }

    fn notify_chain_changed(&self) {
        if let Some(listener) = &self.listener {
            listener.on_blockchain(self.chain.len());
        }
    }

    /// Stops the local search if its candidate no longer builds on the tail
    fn abandon_stale_candidate(&self) {
        let Ok(tail) = self.chain.last_block() else {
            return;
        };

        let stale = match &*self.candidate.lock() {
            Some((_, parent)) => Some(parent) != tail.hash(),
            None => false,
        };

        if stale && self.miner.stop(tail.nonce().unwrap_or_default()) {
            info!("Stopped mining a candidate for an outdated tail");
        }
    }

    /// Sends `call` to every known peer except `except` without waiting
    ///
    /// Each answer is handled as it arrives, so one silent peer delays
    /// nobody else.
    fn broadcast<F, Fut>(self: &Arc<Self>, except: Option<&str>, label: &'static str, call: F)
    where
        F: Fn(Arc<dyn PeerClient>) -> Fut,
        Fut: Future<Output = Result<(), PeerError>> + Send + 'static,
    {
        let targets: Vec<String> = self
            .peers
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|address| Some(address.as_str()) != except)
            .collect();
        if targets.is_empty() {
            return;
        }

        let calls = targets.into_iter().map(|address| {
            let request = call(self.connector.connect(&address));
            let node = Arc::clone(self);
            async move {
                if let Err(err) = request.await {
                    node.handle_peer_error(&address, label, &err);
                }
            }
        });
        tokio::spawn(join_all(calls));
    }

    fn handle_peer_error(&self, address: &str, label: &str, err: &PeerError) {
        if err.is_unavailable() {
            self.peers.remove(address);
            warn!("Dropping peer {} after failed {}: {}", address, label, err);
            if let Some(listener) = &self.listener {
                listener.on_message(&format!("Peer {} disconnected", address));
            }
        } else {
            warn!("Peer {} refused {}: {}", address, label, err);
        }
    }
}

/// Decides the equal-length case from the local node's point of view
fn compare_tails(local: &Block, remote: &Block) -> Direction {
    if local == remote {
        return Direction::None;
    }

    match local.timestamp().cmp(&remote.timestamp()) {
        CmpOrdering::Less => Direction::Adopt,
        CmpOrdering::Greater => Direction::Push,
        CmpOrdering::Equal if remote.hash() < local.hash() => Direction::Adopt,
        CmpOrdering::Equal => Direction::Push,
    }
}
