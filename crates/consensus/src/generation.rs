//! Candidate and score generation.
//!
//! Each `Generation` trigger produces a candidate block for the round plus a
//! blind-bid score event over it. The proof system itself is outside the
//! core; it enters through the [`ScoreProver`] capability as pure functions.

use crate::ConsensusError;
use sba_types::{BidList, Block, Hash, Keys, Seed};
use sba_wire::{Header, RoundUpdate, ScoreEvent};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Blind-bid proving and verification, injected as pure functions.
pub trait ScoreProver: Send + Sync {
    /// Produce `(score, z, proof)` for the generator's secret bid `(d, k)`
    /// under the given seed and bid-list subset.
    fn prove(&self, d: u64, k: &[u8; 32], seed: &Seed, bid_subset: &[u8]) -> (Hash, Hash, Vec<u8>);

    /// Check a received score event's proof.
    fn verify(&self, ev: &ScoreEvent) -> Result<(), ConsensusError>;
}

const DOM_SCORE: &[u8] = b"blind-bid-score";
const DOM_Z: &[u8] = b"blind-bid-z";
const DOM_PROOF: &[u8] = b"blind-bid-proof";

/// Deterministic hash-commitment stand-in for the blind-bid proof system.
///
/// The proof binds `(score, z, seed, subset)`; verification recomputes the
/// commitment. Used by tests and the dev node.
pub struct HashProver;

impl HashProver {
    fn commitment(score: &Hash, z: &Hash, seed: &Seed, subset: &[u8]) -> Hash {
        Hash::from_parts(&[
            DOM_PROOF,
            score.as_bytes(),
            z.as_bytes(),
            seed.as_bytes(),
            subset,
        ])
    }
}

impl ScoreProver for HashProver {
    fn prove(&self, d: u64, k: &[u8; 32], seed: &Seed, bid_subset: &[u8]) -> (Hash, Hash, Vec<u8>) {
        let score = Hash::from_parts(&[DOM_SCORE, &d.to_le_bytes(), k, seed.as_bytes()]);
        let z = Hash::from_parts(&[DOM_Z, k, seed.as_bytes()]);
        let proof = Self::commitment(&score, &z, seed, bid_subset);
        (score, z, proof.to_bytes().to_vec())
    }

    fn verify(&self, ev: &ScoreEvent) -> Result<(), ConsensusError> {
        let expected = Self::commitment(&ev.score, &ev.z, &ev.seed, &ev.bid_list_subset);
        if ev.proof == expected.to_bytes() {
            Ok(())
        } else {
            Err(ConsensusError::InvalidScoreProof)
        }
    }
}

/// Derive the seed a candidate block carries from the previous round's seed.
pub fn derive_seed(prev: &Seed, keys: &Keys, round: u64) -> Seed {
    let digest = Hash::from_parts(&[
        prev.as_bytes(),
        keys.bls.public_key().as_bytes(),
        &round.to_le_bytes(),
    ]);
    let mut seed = [0u8; 33];
    seed[0] = 0x02;
    seed[1..].copy_from_slice(digest.as_bytes());
    Seed(seed)
}

/// How many bid values the score event discloses as its anonymity subset.
const BID_SUBSET_LEN: usize = 8;

/// Builds the candidate block and score event for a round.
pub struct BlockGenerator {
    keys: Arc<Keys>,
    prover: Arc<dyn ScoreProver>,
    /// The generator's secret bid amount.
    d: u64,
    /// The generator's secret bid blinder.
    k: [u8; 32],
    bid_list: RwLock<BidList>,
}

impl BlockGenerator {
    pub fn new(keys: Arc<Keys>, prover: Arc<dyn ScoreProver>, d: u64, k: [u8; 32]) -> Self {
        Self {
            keys,
            prover,
            d,
            k,
            bid_list: RwLock::new(BidList::new()),
        }
    }

    /// Replace the bid list snapshot (on accepted blocks).
    pub fn set_bid_list(&self, bids: BidList) {
        *self.bid_list.write().expect("bid list lock") = bids;
    }

    /// Produce the candidate block and its score event for the round in `ru`.
    pub fn generate(&self, ru: &RoundUpdate) -> (Block, ScoreEvent) {
        let seed = derive_seed(&ru.seed, &self.keys, ru.round);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut candidate = Block::new(ru.round, timestamp, ru.prev_hash, seed);
        candidate.set_root();
        candidate.set_hash();

        let subset = self
            .bid_list
            .read()
            .expect("bid list lock")
            .subset_bytes(BID_SUBSET_LEN);
        let (score, z, proof) = self.prover.prove(self.d, &self.k, &seed, &subset);

        let event = ScoreEvent {
            header: Header {
                sender: self.keys.bls.public_key(),
                round: ru.round,
                step: 1,
                block_hash: candidate.header.hash,
            },
            score,
            proof,
            z,
            seed,
            bid_list_subset: subset,
            prev_hash: ru.prev_hash,
            candidate_hash: candidate.header.hash,
        };

        (candidate, event)
    }
}
