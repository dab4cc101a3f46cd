use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;
use thiserror::Error;

use super::block::{Block, BlockError};
use super::crypto::Digest;
use super::payload::Payload;
use super::storage::{ChainStorage, StorageError};

/// Difficulty of the genesis block
pub const GENESIS_DIFFICULTY: u32 = 3;

/// Payload of the genesis block
pub const GENESIS_PAYLOAD: &str = "Genesis Block";

/// Errors that can occur during chain operations
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Block is already the tail of the chain")]
    DuplicateBlock,

    #[error("Block does not link to the tail: expected previous hash {expected}, found {found}")]
    Linkage { expected: Digest, found: Digest },

    #[error("Block {index} fails proof-of-work validation")]
    Proof { index: u64 },

    #[error("Block has index {found}, expected {expected}")]
    Index { expected: u64, found: u64 },

    #[error("A chain needs at least a genesis block")]
    EmptyChain,

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// An append-only, hash-linked sequence of blocks
///
/// Clones share the same block list and storage.
#[derive(Debug, Clone)]
pub struct Chain {
    /// The chain of blocks
    blocks: Arc<RwLock<Vec<Block>>>,

    /// Storage for chain data
    storage: Option<Arc<ChainStorage>>,
}

impl Chain {
    /// Creates an in-memory chain with a freshly mined genesis block
    pub fn new() -> Result<Self, ChainError> {
        let chain = Chain {
            blocks: Arc::new(RwLock::new(Vec::new())),
            storage: None,
        };
        chain.create_genesis()?;
        Ok(chain)
    }

    /// Opens the chain persisted at `storage_path`
    ///
    /// An empty store gets a new genesis block, which is persisted right away.
    pub fn with_storage<P: AsRef<Path>>(storage_path: P) -> Result<Self, ChainError> {
        let storage = ChainStorage::new(storage_path)?;

        let chain = Chain {
            blocks: Arc::new(RwLock::new(Vec::new())),
            storage: Some(Arc::new(storage)),
        };

        match chain.load_from_storage() {
            Ok(length) => {
                info!("Loaded chain of {} blocks from storage", length);
            }
            Err(ChainError::StorageError(StorageError::NotFound(_))) => {
                info!("No existing chain found in storage, creating genesis block");
                chain.create_genesis()?;
            }
            Err(err) => return Err(err),
        }

        Ok(chain)
    }

    /// Mines and stores the genesis block, replacing any current content
    fn create_genesis(&self) -> Result<(), ChainError> {
        let mut genesis = Block::new(
            0,
            Digest::ZERO,
            GENESIS_DIFFICULTY,
            vec![Payload::from(GENESIS_PAYLOAD)],
        )?;
        genesis.mine()?;

        let mut blocks = self.blocks.write();
        *blocks = vec![genesis];
        self.persist_all(&blocks)?;
        Ok(())
    }

    /// Builds the next unmined block on top of the tail, with the tail's
    /// difficulty
    pub fn create_candidate(&self, payloads: Vec<Payload>) -> Result<Block, ChainError> {
        let difficulty = self.last_block()?.difficulty();
        self.create_candidate_with_difficulty(payloads, difficulty)
    }

    /// Builds the next unmined block on top of the tail
    pub fn create_candidate_with_difficulty(
        &self,
        payloads: Vec<Payload>,
        difficulty: u32,
    ) -> Result<Block, ChainError> {
        let blocks = self.blocks.read();
        let tail = tail_of(&blocks)?;
        let previous = tail.hash().copied().ok_or(ChainError::Proof { index: tail.index() })?;

        Ok(Block::new(tail.index() + 1, previous, difficulty, payloads)?)
    }

    /// Appends a mined block after checking it extends the tail
    pub fn append(&self, block: Block) -> Result<(), ChainError> {
        let mut blocks = self.blocks.write();
        let tail = tail_of(&blocks)?;
        check_extends(tail, &block, blocks.len())?;

        commit_tail(&mut blocks, block, |blocks| self.persist_tail(blocks))?;

        info!("Appended block {} to the chain", blocks.len() - 1);
        Ok(())
    }

    /// Replaces the whole block list after validating it
    ///
    /// Callers decide whether a replacement is warranted; this only refuses
    /// sequences that are not a valid chain.
    pub fn replace_all(&self, new_blocks: Vec<Block>) -> Result<(), ChainError> {
        validate_blocks(&new_blocks)?;

        let mut blocks = self.blocks.write();
        *blocks = new_blocks;
        self.persist_all(&blocks)?;

        info!("Replaced chain with {} blocks", blocks.len());
        Ok(())
    }

    /// Gets a consistent snapshot of the blocks
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Result<Block, ChainError> {
        tail_of(&self.blocks.read()).cloned()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        let index = usize::try_from(index).ok()?;
        self.blocks.read().get(index).cloned()
    }

    pub fn contains(&self, hash: &Digest) -> bool {
        self.blocks.read().iter().any(|block| block.hash() == Some(hash))
    }

    /// All payloads committed by the chain, oldest first
    pub fn registered_payloads(&self) -> Vec<Payload> {
        self.blocks
            .read()
            .iter()
            .flat_map(|block| block.payloads().iter().cloned())
            .collect()
    }

    /// Validates the whole chain
    pub fn is_valid(&self) -> bool {
        match validate_blocks(&self.blocks.read()) {
            Ok(()) => true,
            Err(err) => {
                warn!("Chain failed validation: {}", err);
                false
            }
        }
    }

    fn load_from_storage(&self) -> Result<usize, ChainError> {
        let storage = match &self.storage {
            Some(storage) => storage,
            None => return Err(StorageError::NotFound("No storage configured".to_string()).into()),
        };

        let loaded = storage.load_blocks()?;
        validate_blocks(&loaded)?;

        let length = loaded.len();
        *self.blocks.write() = loaded;
        Ok(length)
    }

    fn persist_tail(&self, blocks: &[Block]) -> Result<(), ChainError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        if let Some(tail) = blocks.last() {
            storage.save_block(tail)?;
        }
        storage.save_chain(blocks)?;
        storage.flush()?;
        Ok(())
    }

    fn persist_all(&self, blocks: &[Block]) -> Result<(), ChainError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        for block in blocks {
            storage.save_block(block)?;
        }
        storage.remove_blocks_from(blocks.len() as u64)?;
        storage.save_chain(blocks)?;
        storage.flush()?;
        Ok(())
    }
}

/// Pushes `block` and keeps it only once `persist` succeeds
fn commit_tail<F>(blocks: &mut Vec<Block>, block: Block, persist: F) -> Result<(), ChainError>
where
    F: FnOnce(&[Block]) -> Result<(), ChainError>,
{
    blocks.push(block);
    if let Err(err) = persist(blocks) {
        blocks.pop();
        return Err(err);
    }
    Ok(())
}

fn tail_of(blocks: &[Block]) -> Result<&Block, ChainError> {
    blocks.last().ok_or(ChainError::EmptyChain)
}

/// Checks that `block` may follow `tail` at position `expected_index`
fn check_extends(tail: &Block, block: &Block, expected_index: usize) -> Result<(), ChainError> {
    if block.is_mined() && block.hash() == tail.hash() {
        return Err(ChainError::DuplicateBlock);
    }

    let tail_hash = tail.hash().copied().unwrap_or(Digest::ZERO);
    if *block.previous_hash() != tail_hash {
        return Err(ChainError::Linkage {
            expected: tail_hash,
            found: *block.previous_hash(),
        });
    }

    if !block.is_valid() {
        return Err(ChainError::Proof { index: block.index() });
    }

    if block.index() != expected_index as u64 {
        return Err(ChainError::Index {
            expected: expected_index as u64,
            found: block.index(),
        });
    }

    Ok(())
}

/// Validates a full block sequence, genesis included
pub fn validate_blocks(blocks: &[Block]) -> Result<(), ChainError> {
    let genesis = blocks.first().ok_or(ChainError::EmptyChain)?;
    if genesis.index() != 0 {
        return Err(ChainError::Index { expected: 0, found: genesis.index() });
    }
    if !genesis.is_valid() {
        return Err(ChainError::Proof { index: 0 });
    }

    for (position, pair) in blocks.windows(2).enumerate() {
        match check_extends(&pair[0], &pair[1], position + 1) {
            Ok(()) => {}
            // a repeated block inside a sequence is a broken link
            Err(ChainError::DuplicateBlock) => {
                return Err(ChainError::Linkage {
                    expected: pair[0].hash().copied().unwrap_or(Digest::ZERO),
                    found: *pair[1].previous_hash(),
                })
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mine_next(chain: &Chain, payloads: &[&str]) -> Block {
        let mut block = chain
            .create_candidate(payloads.iter().map(|p| Payload::from(*p)).collect())
            .unwrap();
        block.mine().unwrap();
        block
    }

    #[test]
    fn test_new_chain() {
        let chain = Chain::new().unwrap();
        let blocks = chain.blocks();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].index(), 0);
        assert_eq!(blocks[0].previous_hash(), &Digest::ZERO);
        assert_eq!(blocks[0].difficulty(), GENESIS_DIFFICULTY);
        assert_eq!(blocks[0].payloads(), &[Payload::from(GENESIS_PAYLOAD)]);
        assert!(chain.is_valid());
    }

    #[test]
    fn test_candidate_builds_on_tail() {
        let chain = Chain::new().unwrap();
        let candidate = chain.create_candidate(vec![Payload::from("abcd")]).unwrap();

        assert_eq!(candidate.index(), 1);
        assert_eq!(Some(candidate.previous_hash()), chain.last_block().unwrap().hash());
        assert_eq!(candidate.difficulty(), GENESIS_DIFFICULTY);
        assert!(!candidate.is_mined());

        let harder = chain
            .create_candidate_with_difficulty(vec![Payload::from("abcd")], 4)
            .unwrap();
        assert_eq!(harder.difficulty(), 4);
    }

    #[test]
    fn test_append_valid_block_once() {
        let chain = Chain::new().unwrap();
        let block = mine_next(&chain, &["abcd"]);

        chain.append(block.clone()).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last_block().unwrap(), block);

        assert!(matches!(chain.append(block), Err(ChainError::DuplicateBlock)));
        assert_eq!(chain.len(), 2);
        assert!(chain.is_valid());
    }

    #[test]
    fn test_append_rejects_broken_link() {
        let chain = Chain::new().unwrap();
        let mut stray = Block::new(1, Digest::of(b"elsewhere"), 1, vec![Payload::from("x")]).unwrap();
        stray.mine().unwrap();

        assert!(matches!(chain.append(stray), Err(ChainError::Linkage { .. })));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_append_rejects_unproven_block() {
        let chain = Chain::new().unwrap();
        let unmined = chain.create_candidate(vec![Payload::from("x")]).unwrap();

        assert!(matches!(chain.append(unmined), Err(ChainError::Proof { index: 1 })));
    }

    #[test]
    fn test_append_rejects_forged_payloads() {
        let chain = Chain::new().unwrap();
        let block = mine_next(&chain, &["crate-17"]);

        let json = serde_json::to_string(&block)
            .unwrap()
            .replace("\"crate-17\"", "\"crate-99\"");
        let forged: Block = serde_json::from_str(&json).unwrap();

        assert!(matches!(chain.append(forged), Err(ChainError::Proof { index: 1 })));
        assert_eq!(chain.registered_payloads(), vec![Payload::from(GENESIS_PAYLOAD)]);

        let mut blocks = chain.blocks();
        blocks.push(serde_json::from_str(&json).unwrap());
        assert!(validate_blocks(&blocks).is_err());
    }

    #[test]
    fn test_failed_persist_keeps_previous_tail() {
        let chain = Chain::new().unwrap();
        let block = mine_next(&chain, &["abcd"]);
        let mut blocks = chain.blocks();

        let result = commit_tail(&mut blocks, block.clone(), |_| {
            Err(StorageError::Corrupted("disk full".to_string()).into())
        });
        assert!(matches!(result, Err(ChainError::StorageError(_))));
        assert_eq!(blocks, chain.blocks());

        commit_tail(&mut blocks, block.clone(), |_| Ok(())).unwrap();
        assert_eq!(blocks.last(), Some(&block));
    }

    #[test]
    fn test_append_rejects_wrong_index() {
        let chain = Chain::new().unwrap();
        let tail = *chain.last_block().unwrap().hash().unwrap();
        let mut skipped = Block::new(5, tail, 1, vec![Payload::from("x")]).unwrap();
        skipped.mine().unwrap();

        assert!(matches!(
            chain.append(skipped),
            Err(ChainError::Index { expected: 1, found: 5 })
        ));
    }

    #[test]
    fn test_replace_all_validates() {
        let source = Chain::new().unwrap();
        source.append(mine_next(&source, &["a"])).unwrap();
        source.append(mine_next(&source, &["b"])).unwrap();

        let target = Chain::new().unwrap();
        target.replace_all(source.blocks()).unwrap();
        assert_eq!(target.blocks(), source.blocks());

        let mut broken = source.blocks();
        broken.remove(1);
        assert!(target.replace_all(broken).is_err());
        assert!(matches!(target.replace_all(Vec::new()), Err(ChainError::EmptyChain)));
        assert_eq!(target.len(), 3);
    }

    #[test]
    fn test_registered_payloads_and_lookup() {
        let chain = Chain::new().unwrap();
        let block = mine_next(&chain, &["abcd", "efgh"]);
        let hash = *block.hash().unwrap();
        chain.append(block).unwrap();

        assert_eq!(
            chain.registered_payloads(),
            vec![
                Payload::from(GENESIS_PAYLOAD),
                Payload::from("abcd"),
                Payload::from("efgh")
            ]
        );
        assert!(chain.contains(&hash));
        assert_eq!(chain.block(1).unwrap().hash(), Some(&hash));
        assert!(chain.block(2).is_none());
    }

    #[test]
    fn test_storage_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain");

        let expected = {
            let chain = Chain::with_storage(&path).unwrap();
            chain.append(mine_next(&chain, &["abcd"])).unwrap();
            chain.append(mine_next(&chain, &["efgh"])).unwrap();
            chain.blocks()
        };

        let reloaded = Chain::with_storage(&path).unwrap();
        assert_eq!(reloaded.blocks(), expected);
        assert!(reloaded.is_valid());
    }

    #[test]
    fn test_storage_replace_shrinks_persisted_chain() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain");

        let shorter = Chain::new().unwrap();
        shorter.append(mine_next(&shorter, &["only"])).unwrap();

        {
            let chain = Chain::with_storage(&path).unwrap();
            for payload in ["a", "b", "c"] {
                chain.append(mine_next(&chain, &[payload])).unwrap();
            }
            chain.replace_all(shorter.blocks()).unwrap();
        }

        let reloaded = Chain::with_storage(&path).unwrap();
        assert_eq!(reloaded.blocks(), shorter.blocks());
    }
}
