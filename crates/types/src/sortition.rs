//! Deterministic weighted sortition.
//!
//! For every `(round, step)` a voting committee is drawn from the provisioner
//! set. The draw is keyed by `H(round ‖ step ‖ seed)` and walks the cumulative
//! stake intervals in sorted-key order, so every node derives the identical
//! committee. Ties between equal stakes resolve to the lexicographically
//! smaller key by construction of the walk.

use crate::{BlsPublicKey, Hash, Provisioners, Seed};
use std::collections::{BTreeMap, BTreeSet};

/// Hash keying the committee draw for a `(round, step)`.
pub fn committee_seed(round: u64, step: u8, seed: &Seed) -> Hash {
    Hash::from_parts(&[&round.to_le_bytes(), &[step], seed.as_bytes()])
}

/// The committee for one `(round, step)`: members with their seat counts.
///
/// Members are kept in sorted-key order; that ordering defines the bit
/// positions used by [`VotingCommittee::pack`] and the step-vote bitsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VotingCommittee {
    seats: BTreeMap<BlsPublicKey, usize>,
    total_seats: usize,
}

impl VotingCommittee {
    /// Draw a committee of `size` seats.
    ///
    /// Each seat is assigned by reducing a per-seat hash draw into the total
    /// active stake and walking the members' cumulative intervals. A
    /// provisioner may hold several seats; its votes then weigh accordingly.
    pub fn extract(
        provisioners: &Provisioners,
        round: u64,
        step: u8,
        seed: &Seed,
        size: usize,
    ) -> Self {
        let total_weight = provisioners.total_weight_at(round);
        if total_weight == 0 || size == 0 {
            return Self::default();
        }

        let draw_seed = committee_seed(round, step, seed);
        let mut seats: BTreeMap<BlsPublicKey, usize> = BTreeMap::new();

        for seat in 0..size as u64 {
            let draw = Hash::from_parts(&[draw_seed.as_bytes(), &seat.to_le_bytes()]);
            let mut score = draw.as_u64() % total_weight;

            for member in provisioners.iter() {
                let weight = member.weight_at(round);
                if score < weight {
                    *seats.entry(member.public_key_bls).or_insert(0) += 1;
                    break;
                }
                score -= weight;
            }
        }

        let total_seats = seats.values().sum();
        Self { seats, total_seats }
    }

    /// Build a committee directly from seat counts (tests, mocks).
    pub fn from_seats(seats: BTreeMap<BlsPublicKey, usize>) -> Self {
        let total_seats = seats.values().sum();
        Self { seats, total_seats }
    }

    pub fn is_member(&self, pk: &BlsPublicKey) -> bool {
        self.seats.contains_key(pk)
    }

    /// Seats held by `pk` (0 for non-members).
    pub fn seats(&self, pk: &BlsPublicKey) -> usize {
        self.seats.get(pk).copied().unwrap_or(0)
    }

    /// Total seats drawn.
    pub fn size(&self) -> usize {
        self.total_seats
    }

    /// Distinct members.
    pub fn member_count(&self) -> usize {
        self.seats.len()
    }

    /// Quorum threshold: `ceil(2 * size / 3)`.
    pub fn quorum(&self) -> usize {
        (2 * self.total_seats).div_ceil(3)
    }

    /// Members in bitset order.
    pub fn members(&self) -> impl Iterator<Item = &BlsPublicKey> {
        self.seats.keys()
    }

    /// Pack a subset of members into the 64-bit membership bitset.
    ///
    /// Bit `i` corresponds to the i-th member in sorted-key order. Members
    /// beyond position 63 cannot be represented and are skipped.
    pub fn pack(&self, subset: &BTreeSet<BlsPublicKey>) -> u64 {
        let mut bits = 0u64;
        for (i, pk) in self.seats.keys().enumerate().take(64) {
            if subset.contains(pk) {
                bits |= 1 << i;
            }
        }
        bits
    }

    /// Recover the members a bitset designates, in bitset order.
    pub fn unpack(&self, bit_set: u64) -> Vec<BlsPublicKey> {
        self.seats
            .keys()
            .enumerate()
            .take(64)
            .filter(|(i, _)| bit_set & (1 << i) != 0)
            .map(|(_, pk)| *pk)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EdPublicKey;

    fn provisioners(weights: &[(u8, u64)]) -> Provisioners {
        let mut set = Provisioners::new();
        for &(id, weight) in weights {
            set.add_stake(
                BlsPublicKey([id; 48]),
                EdPublicKey([id; 32]),
                weight,
                0,
                1_000,
            );
        }
        set
    }

    #[test]
    fn extraction_is_deterministic() {
        let set = provisioners(&[(1, 100), (2, 200), (3, 50)]);
        let a = VotingCommittee::extract(&set, 7, 2, &Seed::ZERO, 64);
        let b = VotingCommittee::extract(&set, 7, 2, &Seed::ZERO, 64);
        assert_eq!(a, b);
        assert_eq!(a.size(), 64);
    }

    #[test]
    fn different_steps_draw_different_committees() {
        let set = provisioners(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        let a = VotingCommittee::extract(&set, 7, 2, &Seed::ZERO, 16);
        let b = VotingCommittee::extract(&set, 7, 3, &Seed::ZERO, 16);
        assert_ne!(a, b);
    }

    #[test]
    fn sole_staker_takes_all_seats() {
        let set = provisioners(&[(1, 100)]);
        let committee = VotingCommittee::extract(&set, 1, 1, &Seed::ZERO, 10);
        assert_eq!(committee.seats(&BlsPublicKey([1u8; 48])), 10);
        assert_eq!(committee.quorum(), 7);
    }

    #[test]
    fn empty_set_yields_empty_committee() {
        let set = Provisioners::new();
        let committee = VotingCommittee::extract(&set, 1, 1, &Seed::ZERO, 10);
        assert_eq!(committee.size(), 0);
        assert_eq!(committee.quorum(), 0);
    }

    #[test]
    fn quorum_is_two_thirds_rounded_up() {
        let mut seats = BTreeMap::new();
        for i in 0..50u8 {
            seats.insert(BlsPublicKey([i; 48]), 1);
        }
        let committee = VotingCommittee::from_seats(seats);
        assert_eq!(committee.quorum(), 34);
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let set = provisioners(&[(1, 100), (2, 100), (3, 100)]);
        let committee = VotingCommittee::extract(&set, 1, 1, &Seed::ZERO, 12);

        let subset: BTreeSet<BlsPublicKey> = committee.members().copied().take(2).collect();
        let bits = committee.pack(&subset);
        let unpacked: BTreeSet<BlsPublicKey> = committee.unpack(bits).into_iter().collect();
        assert_eq!(unpacked, subset);
    }
}
