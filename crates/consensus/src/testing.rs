//! Shared fixtures for consensus tests: deterministic keypairs, committees
//! with known membership and pre-signed vote builders.

use crate::reduction::aggregate_steps_for_tests;
use crate::CommitteeSet;
use sba_types::{BlsPublicKey, Hash, Keys, Provisioners, VotingCommittee};
use sba_wire::{AggregatedAgreement, Header, ReductionEvent};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A set of participants with deterministic keys.
///
/// Two membership modes:
/// - `new`: real sortition over equal stakes,
/// - `flat`: a fixed committee giving every participant exactly one seat,
///   for scenarios that pin committee size and quorum.
pub struct CommitteeFixture {
    pub keys: Vec<Keys>,
    by_pk: HashMap<BlsPublicKey, usize>,
    provisioners: Provisioners,
    committee_size: usize,
    flat: bool,
}

impl CommitteeFixture {
    /// `n` equally staked participants, committees drawn by sortition with
    /// `committee_size` seats.
    pub fn new(n: usize, committee_size: usize) -> Self {
        Self::build(n, committee_size, false)
    }

    /// `n` participants each holding exactly one committee seat at every
    /// `(round, step)`; quorum is `ceil(2n/3)`.
    pub fn flat(n: usize) -> Self {
        Self::build(n, n, true)
    }

    fn build(n: usize, committee_size: usize, flat: bool) -> Self {
        let mut keys = Vec::with_capacity(n);
        let mut provisioners = Provisioners::new();
        let mut by_pk = HashMap::new();

        for i in 0..n {
            let mut seed = [0u8; 32];
            seed[0] = (i % 251) as u8;
            seed[1] = (i / 251) as u8;
            seed[31] = 0x77;
            let k = Keys::from_seed(&seed);
            provisioners.add_stake(
                k.bls.public_key(),
                k.ed.public_key(),
                100,
                0,
                u64::MAX,
            );
            by_pk.insert(k.bls.public_key(), i);
            keys.push(k);
        }

        Self {
            keys,
            by_pk,
            provisioners,
            committee_size,
            flat,
        }
    }

    /// The committee oracle as seen by participant `owner`.
    pub fn committee_set(&self, owner: usize) -> CommitteeSet {
        self.committee_set_with_keys(Arc::new(self.keys[owner].clone()))
    }

    /// The committee oracle as seen by an arbitrary node, member or not.
    pub fn committee_set_with_keys(&self, keys: Arc<Keys>) -> CommitteeSet {
        if self.flat {
            let seats: BTreeMap<BlsPublicKey, usize> = self
                .keys
                .iter()
                .map(|k| (k.bls.public_key(), 1))
                .collect();
            CommitteeSet::with_fixed_committee(keys, VotingCommittee::from_seats(seats))
        } else {
            CommitteeSet::new(keys, self.provisioners.clone(), self.committee_size)
        }
    }

    /// The keys behind a committee member.
    pub fn keys_for(&self, pk: &BlsPublicKey) -> &Keys {
        &self.keys[self.by_pk[pk]]
    }

    /// One valid signed vote for `hash` from every committee member at
    /// `(round, step)`, in committee order.
    pub fn votes(&self, round: u64, step: u8, hash: Hash) -> Vec<ReductionEvent> {
        let committee = self.committee_set(0).committee(round, step);
        committee
            .members()
            .map(|pk| ReductionEvent::sign(self.keys_for(pk), round, step, hash))
            .collect()
    }

    /// Valid aggregated agreements for `hash`, one from every committee
    /// member at `(round, second_step)`. The embedded step votes cover
    /// `second_step - 1` and `second_step` with full participation.
    pub fn agreements(&self, round: u64, second_step: u8, hash: Hash) -> Vec<AggregatedAgreement> {
        let committee_set = self.committee_set(0);
        let mut votes = self.votes(round, second_step - 1, hash);
        votes.extend(self.votes(round, second_step, hash));
        let votes_per_step = aggregate_steps_for_tests(&votes, &committee_set, round)
            .expect("fixture votes cover two steps");

        committee_set
            .committee(round, second_step)
            .members()
            .map(|pk| {
                let mut agreement = AggregatedAgreement::new(
                    Header {
                        sender: *pk,
                        round,
                        step: second_step,
                        block_hash: hash,
                    },
                    votes_per_step,
                );
                agreement.sign_votes(self.keys_for(pk));
                agreement
            })
            .collect()
    }
}
