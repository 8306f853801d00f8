//! Chain database surface.
//!
//! The actual store lives outside the core; the node only relies on the
//! transactional-closure contract below. `update` runs against a private
//! working copy and commits atomically on success; `view` is read-only.

use sba_types::{Block, Hash};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Errors from the chain database.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("a block is already stored at height {0}")]
    DuplicateHeight(u64),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Operations available inside a transaction.
pub trait DbTransaction {
    fn store_block(&mut self, block: &Block) -> Result<(), StorageError>;
    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError>;
    fn fetch_block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError>;
    fn tip(&self) -> Result<Option<Block>, StorageError>;

    fn store_candidate(&mut self, block: &Block) -> Result<(), StorageError>;
    fn fetch_candidate(&self, hash: &Hash) -> Result<Option<Block>, StorageError>;
    /// Remove candidates at or below `height`, returning how many went.
    fn delete_candidates(&mut self, height: u64) -> Result<u32, StorageError>;
}

/// The chain database handle.
pub trait ChainDb: Send + Sync + 'static {
    fn update<T>(
        &self,
        f: impl FnOnce(&mut dyn DbTransaction) -> Result<T, StorageError>,
    ) -> Result<T, StorageError>;

    fn view<T>(
        &self,
        f: impl FnOnce(&dyn DbTransaction) -> Result<T, StorageError>,
    ) -> Result<T, StorageError>;
}

#[derive(Debug, Clone, Default)]
struct Tables {
    blocks: HashMap<Hash, Block>,
    by_height: BTreeMap<u64, Hash>,
    candidates: HashMap<Hash, Block>,
    tip: Option<Hash>,
}

impl DbTransaction for Tables {
    fn store_block(&mut self, block: &Block) -> Result<(), StorageError> {
        let height = block.header.height;
        if let Some(existing) = self.by_height.get(&height) {
            if *existing != block.header.hash {
                return Err(StorageError::DuplicateHeight(height));
            }
        }
        self.by_height.insert(height, block.header.hash);
        self.blocks.insert(block.header.hash, block.clone());
        self.tip = Some(block.header.hash);
        Ok(())
    }

    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn fetch_block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        Ok(self
            .by_height
            .get(&height)
            .and_then(|hash| self.blocks.get(hash))
            .cloned())
    }

    fn tip(&self) -> Result<Option<Block>, StorageError> {
        Ok(self
            .tip
            .as_ref()
            .and_then(|hash| self.blocks.get(hash))
            .cloned())
    }

    fn store_candidate(&mut self, block: &Block) -> Result<(), StorageError> {
        self.candidates.insert(block.header.hash, block.clone());
        Ok(())
    }

    fn fetch_candidate(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        Ok(self.candidates.get(hash).cloned())
    }

    fn delete_candidates(&mut self, height: u64) -> Result<u32, StorageError> {
        let before = self.candidates.len();
        self.candidates.retain(|_, b| b.header.height > height);
        Ok((before - self.candidates.len()) as u32)
    }
}

/// In-memory chain database for tests and the dev node.
#[derive(Debug, Default)]
pub struct MemoryDb {
    tables: RwLock<Tables>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainDb for MemoryDb {
    fn update<T>(
        &self,
        f: impl FnOnce(&mut dyn DbTransaction) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut tables = self.tables.write().expect("storage lock");
        // Run against a working copy so a failing closure leaves no trace.
        let mut working = tables.clone();
        let result = f(&mut working)?;
        *tables = working;
        Ok(result)
    }

    fn view<T>(
        &self,
        f: impl FnOnce(&dyn DbTransaction) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let tables = self.tables.read().expect("storage lock");
        f(&*tables)
    }
}
