use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use thiserror::Error;

use super::block::Block;
use super::crypto::Digest;

const CHAIN_KEY: &str = "chain";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Corrupted storage: {0}")]
    Corrupted(String),
}

/// Reference from the chain record to one persisted block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub index: u64,
    pub hash: Digest,
}

/// Persisted chain metadata: where it lives and which blocks it is made of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub storage_path: String,
    pub blocks: Vec<BlockRef>,
}

/// Storage for chain data
///
/// Blocks are stored one record per block, keyed by index; the chain record
/// lists the ordered block references.
pub struct ChainStorage {
    /// The database instance
    db: Db,

    /// Tree for blocks
    blocks: Tree,

    /// Tree for metadata
    metadata: Tree,

    path: PathBuf,
}

impl std::fmt::Debug for ChainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStorage")
            .field("path", &self.path)
            .finish()
    }
}

impl ChainStorage {
    /// Opens (or creates) the store at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;

        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves a block under its index
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = bincode::serialize(block)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.blocks.insert(block.index().to_be_bytes(), value)?;
        Ok(())
    }

    /// Gets a block by its index
    pub fn get_block(&self, index: u64) -> Result<Block, StorageError> {
        match self.blocks.get(index.to_be_bytes())? {
            Some(value) => bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string())),
            None => Err(StorageError::NotFound(format!("Block {} not found", index))),
        }
    }

    /// Removes every stored block with an index of `from` or above
    pub fn remove_blocks_from(&self, from: u64) -> Result<usize, StorageError> {
        let mut removed = 0;
        for entry in self.blocks.range(from.to_be_bytes()..) {
            let (key, _) = entry?;
            self.blocks.remove(key)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Saves the chain record for `blocks`
    pub fn save_chain(&self, blocks: &[Block]) -> Result<(), StorageError> {
        let record = ChainRecord {
            storage_path: self.path.display().to_string(),
            blocks: blocks
                .iter()
                .map(|block| {
                    block
                        .hash()
                        .map(|hash| BlockRef {
                            index: block.index(),
                            hash: *hash,
                        })
                        .ok_or_else(|| {
                            StorageError::SerializationError(format!(
                                "Block {} has no hash",
                                block.index()
                            ))
                        })
                })
                .collect::<Result<_, _>>()?,
        };

        let value = bincode::serialize(&record)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.metadata.insert(CHAIN_KEY, value)?;
        Ok(())
    }

    /// Gets the chain record
    pub fn get_chain_record(&self) -> Result<ChainRecord, StorageError> {
        match self.metadata.get(CHAIN_KEY)? {
            Some(value) => bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string())),
            None => Err(StorageError::NotFound("Chain record not found".to_string())),
        }
    }

    /// Loads the blocks listed by the chain record, in order
    ///
    /// Every block must exist and carry the hash its reference names.
    pub fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let record = self.get_chain_record()?;
        if record.storage_path != self.path.display().to_string() {
            warn!(
                "Chain record was written at {} and is now opened at {}",
                record.storage_path,
                self.path.display()
            );
        }

        let mut blocks = Vec::with_capacity(record.blocks.len());
        for reference in &record.blocks {
            let block = match self.get_block(reference.index) {
                Err(StorageError::NotFound(reason)) => return Err(StorageError::Corrupted(reason)),
                other => other?,
            };
            if block.hash() != Some(&reference.hash) {
                return Err(StorageError::Corrupted(format!(
                    "Block {} does not match its chain reference",
                    reference.index
                )));
            }
            blocks.push(block);
        }

        Ok(blocks)
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
