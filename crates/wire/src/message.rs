//! Consensus event marshalling.
//!
//! Every consensus event starts with the common [`Header`]; the remainder is
//! variant-specific. Vote signatures cover the compact signable form
//! (`round ‖ step ‖ block_hash`), never the full marshalled event.

use crate::{
    write_256, write_u64, write_u8, write_var_bytes, Reader, WireError,
};
use sba_types::{
    verify_bls, verify_ed25519, BlsPublicKey, BlsSignature, EdKeyPair, EdPublicKey, EdSignature,
    Hash, Keys, Seed, StepVotes,
};

/// The header carried by every consensus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub sender: BlsPublicKey,
    pub round: u64,
    pub step: u8,
    pub block_hash: Hash,
}

impl Header {
    pub fn marshal(&self, w: &mut Vec<u8>) {
        write_var_bytes(w, self.sender.as_bytes());
        write_u64(w, self.round);
        write_u8(w, self.step);
        write_256(w, self.block_hash.as_bytes());
    }

    pub fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let sender = r.read_var_bytes()?;
        if sender.len() != BlsPublicKey::BYTES {
            return Err(WireError::InvalidFieldLength {
                what: "BLS public key",
                expected: BlsPublicKey::BYTES,
                actual: sender.len(),
            });
        }
        let sender = BlsPublicKey::from_slice(sender);
        let round = r.read_u64()?;
        let step = r.read_u8()?;
        let block_hash = Hash::from(r.read_256()?);
        Ok(Self {
            sender,
            round,
            step,
            block_hash,
        })
    }

    /// Decode only the header of a full event payload.
    pub fn peek(payload: &[u8]) -> Result<Self, WireError> {
        Self::unmarshal(&mut Reader::new(payload))
    }
}

/// The compact byte form a vote signature commits to.
pub fn signable_vote_bytes(round: u64, step: u8, block_hash: &Hash) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + 1 + 32);
    write_u64(&mut bytes, round);
    write_u8(&mut bytes, step);
    write_256(&mut bytes, block_hash.as_bytes());
    bytes
}

/// A signed reduction vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionEvent {
    pub header: Header,
    pub signed_vote: BlsSignature,
}

impl ReductionEvent {
    /// Build and sign a vote for `block_hash` at `(round, step)`.
    pub fn sign(keys: &Keys, round: u64, step: u8, block_hash: Hash) -> Self {
        let header = Header {
            sender: keys.bls.public_key(),
            round,
            step,
            block_hash,
        };
        let signed_vote = keys.bls.sign(&signable_vote_bytes(round, step, &block_hash));
        Self {
            header,
            signed_vote,
        }
    }

    /// Check the vote signature against the sender key.
    pub fn verify(&self) -> bool {
        let msg = signable_vote_bytes(self.header.round, self.header.step, &self.header.block_hash);
        verify_bls(&self.header.sender, &msg, &self.signed_vote)
    }

    pub fn marshal(&self, w: &mut Vec<u8>) {
        self.header.marshal(w);
        w.extend_from_slice(self.signed_vote.as_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.marshal(&mut buf);
        buf
    }

    pub fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let header = Header::unmarshal(r)?;
        let signed_vote = BlsSignature::from_slice(r.read_bytes(BlsSignature::BYTES)?);
        Ok(Self {
            header,
            signed_vote,
        })
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let ev = Self::unmarshal(&mut r)?;
        r.finish()?;
        Ok(ev)
    }
}

/// A blind-bid score event.
///
/// `score` compares as unsigned big-endian; larger is better. The header's
/// block hash equals `candidate_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEvent {
    pub header: Header,
    pub score: Hash,
    pub proof: Vec<u8>,
    pub z: Hash,
    pub seed: Seed,
    pub bid_list_subset: Vec<u8>,
    pub prev_hash: Hash,
    pub candidate_hash: Hash,
}

impl ScoreEvent {
    pub fn marshal(&self, w: &mut Vec<u8>) {
        self.header.marshal(w);
        write_256(w, self.score.as_bytes());
        write_var_bytes(w, &self.proof);
        write_256(w, self.z.as_bytes());
        write_var_bytes(w, self.seed.as_bytes());
        write_var_bytes(w, &self.bid_list_subset);
        write_256(w, self.prev_hash.as_bytes());
        write_256(w, self.candidate_hash.as_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.marshal(&mut buf);
        buf
    }

    pub fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let header = Header::unmarshal(r)?;
        let score = Hash::from(r.read_256()?);
        let proof = r.read_var_bytes()?.to_vec();
        let z = Hash::from(r.read_256()?);
        let seed = r.read_var_bytes()?;
        if seed.len() != Seed::BYTES {
            return Err(WireError::InvalidFieldLength {
                what: "seed",
                expected: Seed::BYTES,
                actual: seed.len(),
            });
        }
        let seed = Seed::from_slice(seed);
        let bid_list_subset = r.read_var_bytes()?.to_vec();
        let prev_hash = Hash::from(r.read_256()?);
        let candidate_hash = Hash::from(r.read_256()?);
        Ok(Self {
            header,
            score,
            proof,
            z,
            seed,
            bid_list_subset,
            prev_hash,
            candidate_hash,
        })
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let ev = Self::unmarshal(&mut r)?;
        r.finish()?;
        Ok(ev)
    }
}

pub fn marshal_step_votes(sv: &StepVotes, w: &mut Vec<u8>) {
    write_u8(w, sv.step);
    write_u64(w, sv.bit_set);
    w.extend_from_slice(sv.signature.as_bytes());
}

pub fn unmarshal_step_votes(r: &mut Reader<'_>) -> Result<StepVotes, WireError> {
    let step = r.read_u8()?;
    let bit_set = r.read_u64()?;
    let signature = BlsSignature::from_slice(r.read_bytes(BlsSignature::BYTES)?);
    Ok(StepVotes {
        step,
        bit_set,
        signature,
    })
}

/// The aggregated agreement gossiped after a successful reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedAgreement {
    pub header: Header,
    /// The sender's BLS signature over [`AggregatedAgreement::votes_bytes`].
    pub signed_votes: BlsSignature,
    pub votes_per_step: [StepVotes; 2],
}

impl AggregatedAgreement {
    /// Build an unsigned agreement; call [`AggregatedAgreement::sign_votes`]
    /// before gossiping.
    pub fn new(header: Header, votes_per_step: [StepVotes; 2]) -> Self {
        Self {
            header,
            signed_votes: BlsSignature::zeroed(),
            votes_per_step,
        }
    }

    /// The byte form `signed_votes` commits to.
    pub fn votes_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 * (1 + 8 + BlsSignature::BYTES));
        marshal_step_votes(&self.votes_per_step[0], &mut bytes);
        marshal_step_votes(&self.votes_per_step[1], &mut bytes);
        bytes
    }

    /// Sign the step votes with the sender's BLS key.
    pub fn sign_votes(&mut self, keys: &Keys) {
        self.signed_votes = keys.bls.sign(&self.votes_bytes());
    }

    /// Verify the sender's signature over the step votes.
    pub fn verify_signed_votes(&self) -> bool {
        verify_bls(&self.header.sender, &self.votes_bytes(), &self.signed_votes)
    }

    pub fn marshal(&self, w: &mut Vec<u8>) {
        self.header.marshal(w);
        w.extend_from_slice(self.signed_votes.as_bytes());
        marshal_step_votes(&self.votes_per_step[0], w);
        marshal_step_votes(&self.votes_per_step[1], w);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.marshal(&mut buf);
        buf
    }

    pub fn unmarshal(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let header = Header::unmarshal(r)?;
        let signed_votes = BlsSignature::from_slice(r.read_bytes(BlsSignature::BYTES)?);
        let first = unmarshal_step_votes(r)?;
        let second = unmarshal_step_votes(r)?;
        Ok(Self {
            header,
            signed_votes,
            votes_per_step: [first, second],
        })
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let ev = Self::unmarshal(&mut r)?;
        r.finish()?;
        Ok(ev)
    }
}

/// Seal a payload in the Ed25519 transport envelope:
/// `[signature ‖ public key ‖ payload]`.
pub fn seal_envelope(keys: &EdKeyPair, payload: &[u8]) -> Vec<u8> {
    let signature = keys.sign(payload);
    let mut sealed = Vec::with_capacity(EdSignature::BYTES + EdPublicKey::BYTES + payload.len());
    sealed.extend_from_slice(signature.as_bytes());
    sealed.extend_from_slice(keys.public_key().as_bytes());
    sealed.extend_from_slice(payload);
    sealed
}

/// Open a transport envelope, verifying the Ed25519 signature.
pub fn open_envelope(sealed: &[u8]) -> Result<(EdPublicKey, &[u8]), WireError> {
    let mut r = Reader::new(sealed);
    let signature = EdSignature::from_slice(&r.read_512()?);
    let sender = EdPublicKey::from_slice(&r.read_bytes(EdPublicKey::BYTES)?);
    let payload = &sealed[EdSignature::BYTES + EdPublicKey::BYTES..];
    if !verify_ed25519(&sender, payload, &signature) {
        return Err(WireError::BadEnvelope);
    }
    Ok((sender, payload))
}

/// The payload of a `RoundUpdate` event: where the chain tip is and which
/// seed the next sortition draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundUpdate {
    pub round: u64,
    pub prev_hash: Hash,
    pub seed: Seed,
}

impl RoundUpdate {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 32 + 1 + Seed::BYTES);
        write_u64(&mut buf, self.round);
        write_256(&mut buf, self.prev_hash.as_bytes());
        write_var_bytes(&mut buf, self.seed.as_bytes());
        buf
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let round = r.read_u64()?;
        let prev_hash = Hash::from(r.read_256()?);
        let seed = r.read_var_bytes()?;
        if seed.len() != Seed::BYTES {
            return Err(WireError::InvalidFieldLength {
                what: "seed",
                expected: Seed::BYTES,
                actual: seed.len(),
            });
        }
        let seed = Seed::from_slice(seed);
        r.finish()?;
        Ok(Self {
            round,
            prev_hash,
            seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Keys {
        Keys::from_seed(&[42u8; 32])
    }

    fn header(keys: &Keys) -> Header {
        Header {
            sender: keys.bls.public_key(),
            round: 8,
            step: 3,
            block_hash: Hash::from_bytes(b"candidate"),
        }
    }

    #[test]
    fn header_roundtrip() {
        let h = header(&keys());
        let mut buf = Vec::new();
        h.marshal(&mut buf);
        assert_eq!(Header::peek(&buf).unwrap(), h);
    }

    #[test]
    fn reduction_sign_verify_roundtrip() {
        let ev = ReductionEvent::sign(&keys(), 8, 3, Hash::from_bytes(b"candidate"));
        assert!(ev.verify());

        let decoded = ReductionEvent::from_bytes(&ev.to_bytes()).unwrap();
        assert_eq!(decoded, ev);
        assert!(decoded.verify());
    }

    #[test]
    fn tampered_reduction_fails_verification() {
        let mut ev = ReductionEvent::sign(&keys(), 8, 3, Hash::from_bytes(b"candidate"));
        ev.header.round = 9;
        assert!(!ev.verify());
    }

    #[test]
    fn score_roundtrip() {
        let keys = keys();
        let ev = ScoreEvent {
            header: header(&keys),
            score: Hash::from_bytes(b"score"),
            proof: vec![1, 2, 3, 4],
            z: Hash::from_bytes(b"z"),
            seed: Seed([7u8; 33]),
            bid_list_subset: vec![9; 64],
            prev_hash: Hash::from_bytes(b"prev"),
            candidate_hash: Hash::from_bytes(b"candidate"),
        };
        let decoded = ScoreEvent::from_bytes(&ev.to_bytes()).unwrap();
        assert_eq!(decoded, ev);
    }

    #[test]
    fn agreement_roundtrip_and_signature() {
        let keys = keys();
        let votes = [
            StepVotes {
                step: 2,
                bit_set: 0b1011,
                signature: keys.bls.sign(b"step two"),
            },
            StepVotes {
                step: 3,
                bit_set: 0b0111,
                signature: keys.bls.sign(b"step three"),
            },
        ];
        let mut agreement = AggregatedAgreement::new(header(&keys), votes);
        agreement.sign_votes(&keys);
        assert!(agreement.verify_signed_votes());

        let decoded = AggregatedAgreement::from_bytes(&agreement.to_bytes()).unwrap();
        assert_eq!(decoded, agreement);
        assert!(decoded.verify_signed_votes());
    }

    #[test]
    fn envelope_roundtrip_and_tamper() {
        let keys = keys();
        let sealed = seal_envelope(&keys.ed, b"gossip me");
        let (sender, payload) = open_envelope(&sealed).unwrap();
        assert_eq!(sender, keys.ed.public_key());
        assert_eq!(payload, b"gossip me");

        let mut tampered = sealed.clone();
        *tampered.last_mut().unwrap() ^= 1;
        assert_eq!(open_envelope(&tampered), Err(WireError::BadEnvelope));
    }

    #[test]
    fn round_update_roundtrip() {
        let update = RoundUpdate {
            round: 99,
            prev_hash: Hash::from_bytes(b"tip"),
            seed: Seed([6u8; 33]),
        };
        assert_eq!(RoundUpdate::from_bytes(&update.to_bytes()).unwrap(), update);
    }
}
