//! Blocks, certificates and step votes.

use crate::{compute_merkle_root, BlsSignature, Hash, Transaction};

/// Current block format version.
pub const BLOCK_VERSION: u8 = 0;

/// The 33-byte seed carried by every block header and fed into sortition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed(pub [u8; 33]);

impl Seed {
    pub const BYTES: usize = 33;

    /// The genesis seed (all zeroes).
    pub const ZERO: Self = Self([0u8; 33]);

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; 33];
        arr.copy_from_slice(bytes);
        Self(arr)
    }
}

/// Aggregated votes for one reduction step.
///
/// `bit_set` packs the voting committee members in sorted-key order; the
/// aggregated signature verifies against exactly those members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepVotes {
    pub step: u8,
    pub bit_set: u64,
    pub signature: BlsSignature,
}

impl StepVotes {
    /// Placeholder step votes, used by the genesis certificate.
    pub fn empty(step: u8) -> Self {
        Self {
            step,
            bit_set: 0,
            signature: BlsSignature::zeroed(),
        }
    }

    fn hash_bytes(&self, out: &mut Vec<u8>) {
        out.push(self.step);
        out.extend_from_slice(&self.bit_set.to_le_bytes());
        out.extend_from_slice(self.signature.as_bytes());
    }
}

/// Proof that both reduction steps reached quorum on the committed hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Certificate {
    pub step_one_batch: StepVotes,
    pub step_two_batch: StepVotes,
    pub first_reduction_hash: Hash,
    pub second_reduction_hash: Hash,
}

impl Certificate {
    /// Empty certificate carried by genesis and candidate headers.
    pub fn empty() -> Self {
        Self {
            step_one_batch: StepVotes::empty(0),
            step_two_batch: StepVotes::empty(0),
            first_reduction_hash: Hash::ZERO,
            second_reduction_hash: Hash::ZERO,
        }
    }

    /// Hash of the certificate, folded into the block header hash.
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(2 * (1 + 8 + 96) + 64);
        self.step_one_batch.hash_bytes(&mut bytes);
        self.step_two_batch.hash_bytes(&mut bytes);
        bytes.extend_from_slice(self.first_reduction_hash.as_bytes());
        bytes.extend_from_slice(self.second_reduction_hash.as_bytes());
        Hash::from_bytes(&bytes)
    }
}

/// Block header.
///
/// `hash` commits to every other header field through [`BlockHeader::compute_hash`];
/// it is stored denormalized so lookups do not rehash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u8,
    pub height: u64,
    pub timestamp: i64,
    pub prev_hash: Hash,
    pub seed: Seed,
    pub tx_root: Hash,
    pub hash: Hash,
    pub certificate: Certificate,
}

impl BlockHeader {
    /// Compute the header hash:
    /// `H(version ‖ height ‖ timestamp ‖ prev_hash ‖ seed ‖ tx_root ‖ cert_hash)`.
    pub fn compute_hash(&self) -> Hash {
        Hash::from_parts(&[
            &[self.version],
            &self.height.to_le_bytes(),
            &self.timestamp.to_le_bytes(),
            self.prev_hash.as_bytes(),
            self.seed.as_bytes(),
            self.tx_root.as_bytes(),
            self.certificate.hash().as_bytes(),
        ])
    }
}

/// Complete block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    /// Create a block with an unset hash and root; call [`Block::set_root`]
    /// and [`Block::set_hash`] once the transaction list is final.
    pub fn new(height: u64, timestamp: i64, prev_hash: Hash, seed: Seed) -> Self {
        Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                height,
                timestamp,
                prev_hash,
                seed,
                tx_root: Hash::ZERO,
                hash: Hash::ZERO,
                certificate: Certificate::empty(),
            },
            txs: Vec::new(),
        }
    }

    /// The genesis block.
    pub fn genesis() -> Self {
        let mut blk = Self::new(0, 0, Hash::ZERO, Seed::ZERO);
        blk.set_root();
        blk.set_hash();
        blk
    }

    /// Recompute and store the transaction merkle root.
    pub fn set_root(&mut self) {
        self.header.tx_root = self.compute_root();
    }

    /// Recompute and store the header hash.
    pub fn set_hash(&mut self) {
        self.header.hash = self.header.compute_hash();
    }

    /// Merkle root over the transaction hashes.
    pub fn compute_root(&self) -> Hash {
        let leaves: Vec<Hash> = self.txs.iter().map(Transaction::hash).collect();
        compute_merkle_root(&leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StandardFields;

    fn sample_block() -> Block {
        let mut blk = Block::new(5, 1_700_000_000, Hash::from_bytes(b"prev"), Seed([2u8; 33]));
        blk.txs.push(Transaction::Standard(StandardFields {
            outputs: vec![[1u8; 32], [2u8; 32]],
        }));
        blk.set_root();
        blk.set_hash();
        blk
    }

    #[test]
    fn hash_commits_to_header_fields() {
        let blk = sample_block();
        let mut other = blk.clone();
        other.header.height += 1;
        assert_ne!(blk.header.compute_hash(), other.header.compute_hash());

        let mut reseeded = blk.clone();
        reseeded.header.seed = Seed([3u8; 33]);
        assert_ne!(blk.header.compute_hash(), reseeded.header.compute_hash());
    }

    #[test]
    fn hash_commits_to_certificate() {
        let blk = sample_block();
        let mut certified = blk.clone();
        certified.header.certificate.first_reduction_hash = Hash::from_bytes(b"h1");
        assert_ne!(blk.header.compute_hash(), certified.header.compute_hash());
    }

    #[test]
    fn root_changes_with_txs() {
        let blk = sample_block();
        let mut more = blk.clone();
        more.txs.push(Transaction::Standard(StandardFields {
            outputs: vec![[9u8; 32]],
        }));
        assert_ne!(blk.compute_root(), more.compute_root());
    }

    #[test]
    fn genesis_is_self_consistent() {
        let genesis = Block::genesis();
        assert_eq!(genesis.header.hash, genesis.header.compute_hash());
        assert_eq!(genesis.header.tx_root, Hash::ZERO);
    }
}
