//! Core types for the SBA consensus node: hashes, key material, blocks,
//! certificates, transactions, the provisioner set and sortition.

mod block;
mod hash;
mod keys;
mod provisioners;
mod sortition;
mod transaction;

pub use block::{Block, BlockHeader, Certificate, Seed, StepVotes, BLOCK_VERSION};
pub use hash::{compute_merkle_root, Hash, HexError};
pub use keys::{
    aggregate_bls, verify_aggregate_bls, verify_bls, verify_ed25519, BlsKeyPair, BlsPublicKey,
    BlsSignature, EdKeyPair, EdPublicKey, EdSignature, Keys, BLS_DST,
};
pub use provisioners::{Bid, BidList, Provisioner, Provisioners, Stake};
pub use sortition::{committee_seed, VotingCommittee};
pub use transaction::{
    commit_amount, BidFields, Commitment, StakeFields, StandardFields, Transaction,
};
