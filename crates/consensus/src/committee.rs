//! Committee membership over the provisioner set.

use sba_types::{BlsPublicKey, Keys, Provisioners, Seed, VotingCommittee};
use sba_wire::ReductionEvent;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

/// Membership oracle for `(round, step)` committees.
///
/// Holds the live provisioner set and the sortition seed of the current
/// round. Committee extraction is deterministic, so the most recent draw is
/// cached; steps within a round hit the cache on every vote verification.
pub struct CommitteeSet {
    keys: Arc<Keys>,
    provisioners: RwLock<Provisioners>,
    seed: RwLock<Seed>,
    size: usize,
    last: Mutex<Option<((u64, u8), VotingCommittee)>>,
    fixed: Option<VotingCommittee>,
}

impl CommitteeSet {
    pub fn new(keys: Arc<Keys>, provisioners: Provisioners, size: usize) -> Self {
        Self {
            keys,
            provisioners: RwLock::new(provisioners),
            seed: RwLock::new(Seed::ZERO),
            size,
            last: Mutex::new(None),
            fixed: None,
        }
    }

    /// A membership oracle that returns the same committee for every
    /// `(round, step)`. Test and mock support.
    pub fn with_fixed_committee(keys: Arc<Keys>, committee: VotingCommittee) -> Self {
        let size = committee.size();
        Self {
            keys,
            provisioners: RwLock::new(Provisioners::new()),
            seed: RwLock::new(Seed::ZERO),
            size,
            last: Mutex::new(None),
            fixed: Some(committee),
        }
    }

    /// The committee for `(round, step)`.
    pub fn committee(&self, round: u64, step: u8) -> VotingCommittee {
        if let Some(fixed) = &self.fixed {
            return fixed.clone();
        }
        {
            let cache = self.last.lock().expect("committee cache");
            if let Some(((r, s), committee)) = cache.as_ref() {
                if (*r, *s) == (round, step) {
                    return committee.clone();
                }
            }
        }

        let committee = {
            let provisioners = self.provisioners.read().expect("provisioners lock");
            let seed = *self.seed.read().expect("seed lock");
            VotingCommittee::extract(&provisioners, round, step, &seed, self.size)
        };

        *self.last.lock().expect("committee cache") = Some(((round, step), committee.clone()));
        committee
    }

    /// Whether this node holds a seat at `(round, step)`.
    pub fn am_member(&self, round: u64, step: u8) -> bool {
        self.is_member(&self.keys.bls.public_key(), round, step)
    }

    pub fn is_member(&self, pk: &BlsPublicKey, round: u64, step: u8) -> bool {
        self.committee(round, step).is_member(pk)
    }

    /// Seats held by `pk` at `(round, step)`.
    pub fn votes_for(&self, pk: &BlsPublicKey, round: u64, step: u8) -> usize {
        self.committee(round, step).seats(pk)
    }

    pub fn quorum(&self, round: u64, step: u8) -> usize {
        self.committee(round, step).quorum()
    }

    /// Pack a member subset into the step-vote bitset.
    pub fn pack(&self, members: &BTreeSet<BlsPublicKey>, round: u64, step: u8) -> u64 {
        self.committee(round, step).pack(members)
    }

    /// The members a bitset designates, in bitset order.
    pub fn unpack(&self, bit_set: u64, round: u64, step: u8) -> Vec<BlsPublicKey> {
        self.committee(round, step).unpack(bit_set)
    }

    /// Log committee members whose vote never arrived.
    pub fn report_absentees(&self, received: &[ReductionEvent], round: u64, step: u8) {
        let voted: BTreeSet<BlsPublicKey> = received.iter().map(|ev| ev.header.sender).collect();
        for member in self.committee(round, step).members() {
            if !voted.contains(member) {
                warn!(
                    target: "committee",
                    round,
                    step,
                    absentee = %hex::encode(&member.as_bytes()[..8]),
                    "committee member did not vote"
                );
            }
        }
    }

    /// Replace the sortition seed (on round update).
    pub fn set_seed(&self, seed: Seed) {
        *self.seed.write().expect("seed lock") = seed;
        self.last.lock().expect("committee cache").take();
    }

    /// Mutate the provisioner set.
    pub fn update_provisioners(&self, f: impl FnOnce(&mut Provisioners)) {
        let mut provisioners = self.provisioners.write().expect("provisioners lock");
        f(&mut provisioners);
        self.last.lock().expect("committee cache").take();
    }

    /// Drop stakes that expired before `height`.
    pub fn remove_expired(&self, height: u64) {
        self.update_provisioners(|p| p.remove_expired(height));
    }

    pub fn own_public_key(&self) -> BlsPublicKey {
        self.keys.bls.public_key()
    }
}
