//! Candidate block validation and the per-round candidate store.
//!
//! Hash and root are recomputed before a candidate may enter the store, so a
//! malicious peer cannot overwrite the candidate payload behind a hash.

use crate::ChainError;
use sba_types::{Block, Certificate, Hash};
use sba_wire::block_from_bytes;
use std::collections::HashMap;
use std::sync::Mutex;

/// The header hash as it was computed before any certificate was attached.
pub fn pre_certificate_hash(block: &Block) -> Hash {
    let mut header = block.header.clone();
    header.certificate = Certificate::empty();
    header.compute_hash()
}

/// Recompute the header hash and compare byte-for-byte.
pub fn check_hash(block: &Block) -> Result<(), ChainError> {
    if pre_certificate_hash(block) != block.header.hash {
        return Err(ChainError::InvalidBlockHash);
    }
    Ok(())
}

/// Recompute the transaction merkle root and compare byte-for-byte.
pub fn check_root(block: &Block) -> Result<(), ChainError> {
    if block.compute_root() != block.header.tx_root {
        return Err(ChainError::InvalidMerkleRoot);
    }
    Ok(())
}

/// Decode and fully validate a candidate payload.
pub fn validate(payload: &[u8]) -> Result<Block, ChainError> {
    let block = block_from_bytes(payload)?;
    check_hash(&block)?;
    check_root(&block)?;
    Ok(block)
}

/// Candidate blocks of the current and adjacent rounds, keyed by hash.
#[derive(Debug, Default)]
pub struct CandidateStore {
    blocks: Mutex<HashMap<Hash, Block>>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, block: Block) {
        self.blocks
            .lock()
            .expect("candidate lock")
            .insert(block.header.hash, block);
    }

    pub fn get(&self, hash: &Hash) -> Option<Block> {
        self.blocks.lock().expect("candidate lock").get(hash).cloned()
    }

    /// Sweep candidates at or below `height`, returning how many went.
    pub fn delete_up_to(&self, height: u64) -> usize {
        let mut blocks = self.blocks.lock().expect("candidate lock");
        let before = blocks.len();
        blocks.retain(|_, b| b.header.height > height);
        before - blocks.len()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().expect("candidate lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
