//! Two-step binary reduction.
//!
//! A reducer instance drives one attempt: vote on the selected hash, collect
//! a first-step quorum, vote on its outcome, collect a second-step quorum,
//! and on matching non-zero results gossip the aggregated agreement. Whatever
//! happens, the attempt ends by bumping the step and publishing `Restart`.

use crate::{
    Accumulator, CommitteeSet, ConsensusError, Handler, RoundState, Signer, StepTimer,
};
use sba_types::{aggregate_bls, BlsPublicKey, Hash, Keys, StepVotes};
use sba_wire::{AggregatedAgreement, Header, ReductionEvent, Topic};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Verification capability for reduction votes.
pub struct ReductionHandler {
    committee: Arc<CommitteeSet>,
    state: Arc<RoundState>,
}

impl ReductionHandler {
    pub fn new(committee: Arc<CommitteeSet>, state: Arc<RoundState>) -> Self {
        Self { committee, state }
    }
}

impl Handler<ReductionEvent> for ReductionHandler {
    fn verify(&self, ev: &ReductionEvent) -> Result<(), ConsensusError> {
        if !ev.verify() {
            return Err(ConsensusError::InvalidSignature);
        }
        if !self
            .committee
            .is_member(&ev.header.sender, ev.header.round, ev.header.step)
        {
            return Err(ConsensusError::NotCommitteeMember);
        }
        Ok(())
    }

    fn identifier(&self, ev: &ReductionEvent) -> Hash {
        ev.header.block_hash
    }

    fn quorum(&self) -> usize {
        let (round, step) = self.state.round_and_step();
        self.committee.quorum(round, step)
    }

    fn weight(&self, ev: &ReductionEvent) -> usize {
        self.committee
            .votes_for(&ev.header.sender, ev.header.round, ev.header.step)
    }
}

/// One reduction attempt.
pub struct Reducer {
    keys: Arc<Keys>,
    committee: Arc<CommitteeSet>,
    state: Arc<RoundState>,
    signer: Signer,
    timer: Arc<StepTimer>,
    accumulator: Arc<Accumulator<ReductionEvent>>,
    votes_rx: Mutex<Option<tokio::sync::mpsc::Receiver<Vec<ReductionEvent>>>>,
    stale: tokio::sync::watch::Sender<bool>,
}

impl Reducer {
    pub fn new(
        keys: Arc<Keys>,
        committee: Arc<CommitteeSet>,
        state: Arc<RoundState>,
        signer: Signer,
        timer: Arc<StepTimer>,
        worker_amount: usize,
    ) -> Arc<Self> {
        let handler = Arc::new(ReductionHandler::new(
            Arc::clone(&committee),
            Arc::clone(&state),
        ));
        let (accumulator, votes_rx) = Accumulator::new(handler, worker_amount);
        let (stale, _) = tokio::sync::watch::channel(false);

        Arc::new(Self {
            keys,
            committee,
            state,
            signer,
            timer,
            accumulator: Arc::new(accumulator),
            votes_rx: Mutex::new(Some(votes_rx)),
            stale,
        })
    }

    fn in_committee(&self) -> bool {
        let (round, step) = self.state.round_and_step();
        self.committee.am_member(round, step)
    }

    /// Start the attempt: vote for `hash` and run both steps in a task.
    pub fn start_reduction(self: &Arc<Self>, hash: Hash) {
        trace!(target: "reducer", hash = %hash, "starting reduction");
        if self.in_committee() {
            self.send_reduction(hash);
        }
        let reducer = Arc::clone(self);
        tokio::spawn(async move { reducer.begin().await });
    }

    /// Feed a relevant vote into the accumulator.
    pub fn process(&self, ev: ReductionEvent) {
        self.accumulator.process(ev);
    }

    /// Abort: any pending fetch returns promptly, nothing is published
    /// afterwards.
    pub fn end(&self) {
        let _ = self.stale.send(true);
        self.accumulator.stop();
    }

    fn is_stale(&self) -> bool {
        *self.stale.borrow()
    }

    async fn begin(self: Arc<Self>) {
        let mut votes_rx = match self.votes_rx.lock().expect("votes lock").take() {
            Some(rx) => rx,
            // A second begin() on the same attempt is a logic bug upstream.
            None => {
                warn!(target: "reducer", "reduction attempt already running");
                return;
            }
        };

        let first_batch = self.fetch(&mut votes_rx).await;
        if self.is_stale() {
            return;
        }

        let hash1 = extract_hash(&first_batch);
        let first_timed_out = first_batch.is_empty();
        if first_timed_out {
            let (round, step) = self.state.round_and_step();
            self.committee
                .report_absentees(&self.accumulator.all(), round, step);
        }
        trace!(target: "reducer", hash = %hash1, timed_out = first_timed_out, "first step completed");

        // Reset before the step bump: the bump makes the coordinator replay
        // queued next-step votes into this accumulator.
        self.accumulator.clear();
        self.signer.forward();
        if self.in_committee() {
            self.send_reduction(hash1);
        }

        let second_batch = self.fetch(&mut votes_rx).await;
        if self.is_stale() {
            return;
        }

        let hash2 = extract_hash(&second_batch);
        let second_timed_out = second_batch.is_empty();
        if second_timed_out {
            let (round, step) = self.state.round_and_step();
            self.committee
                .report_absentees(&self.accumulator.all(), round, step);
        }
        trace!(target: "reducer", hash = %hash2, timed_out = second_timed_out, "second step completed");

        let successful = hash1 == hash2 && !hash1.is_zero();
        if successful && self.in_committee() {
            let all_votes: Vec<ReductionEvent> = first_batch
                .iter()
                .chain(second_batch.iter())
                .copied()
                .collect();
            debug!(
                target: "reducer",
                votes = all_votes.len(),
                block_hash = %hash1,
                "reduction successful"
            );
            self.send_agreement(&all_votes, hash2);
        }

        if first_timed_out || second_timed_out {
            self.timer.increase();
        } else if successful {
            self.timer.reset();
        }

        self.signer.forward();
        self.publish_regeneration();
    }

    /// Wait for a quorum batch, the step timeout or cancellation.
    async fn fetch(
        &self,
        votes_rx: &mut tokio::sync::mpsc::Receiver<Vec<ReductionEvent>>,
    ) -> Vec<ReductionEvent> {
        let mut stale_rx = self.stale.subscribe();
        tokio::select! {
            batch = votes_rx.recv() => batch.unwrap_or_default(),
            _ = tokio::time::sleep(self.timer.timeout()) => Vec::new(),
            _ = stale_rx.wait_for(|stale| *stale) => Vec::new(),
        }
    }

    fn send_reduction(&self, hash: Hash) {
        let (round, step) = self.state.round_and_step();
        let vote = ReductionEvent::sign(&self.keys, round, step, hash);
        self.signer
            .send_authenticated(Topic::Reduction, &vote.to_bytes());
    }

    fn send_agreement(&self, votes: &[ReductionEvent], hash: Hash) {
        let (round, step) = self.state.round_and_step();
        let votes_per_step = match aggregate_steps(votes, &self.committee, round) {
            Some(votes_per_step) => votes_per_step,
            None => {
                warn!(target: "reducer", "could not aggregate step votes");
                return;
            }
        };

        let mut agreement = AggregatedAgreement::new(
            Header {
                sender: self.keys.bls.public_key(),
                round,
                step,
                block_hash: hash,
            },
            votes_per_step,
        );
        agreement.sign_votes(&self.keys);
        self.signer
            .send_authenticated(Topic::Agreement, &agreement.to_bytes());
    }

    fn publish_regeneration(&self) {
        let (round, step) = self.state.round_and_step();
        let mut payload = round.to_le_bytes().to_vec();
        payload.push(step);
        self.signer.send_internally(Topic::Restart, &payload);
    }
}

/// The hash a batch agreed on, or the zero sentinel for an empty batch.
fn extract_hash(batch: &[ReductionEvent]) -> Hash {
    batch
        .first()
        .map(|ev| ev.header.block_hash)
        .unwrap_or(Hash::ZERO)
}

/// Test support: expose the step aggregation to the fixtures module.
pub(crate) fn aggregate_steps_for_tests(
    votes: &[ReductionEvent],
    committee: &CommitteeSet,
    round: u64,
) -> Option<[StepVotes; 2]> {
    aggregate_steps(votes, committee, round)
}

/// Fold both steps' votes into their `StepVotes`, ordered by step.
fn aggregate_steps(
    votes: &[ReductionEvent],
    committee: &CommitteeSet,
    round: u64,
) -> Option<[StepVotes; 2]> {
    let mut steps: Vec<u8> = votes.iter().map(|ev| ev.header.step).collect();
    steps.sort_unstable();
    steps.dedup();
    if steps.len() != 2 {
        return None;
    }

    let mut votes_per_step = Vec::with_capacity(2);
    for step in steps {
        let step_votes: Vec<&ReductionEvent> =
            votes.iter().filter(|ev| ev.header.step == step).collect();
        let signatures: Vec<_> = step_votes.iter().map(|ev| ev.signed_vote).collect();
        let senders: BTreeSet<BlsPublicKey> =
            step_votes.iter().map(|ev| ev.header.sender).collect();

        votes_per_step.push(StepVotes {
            step,
            bit_set: committee.pack(&senders, round, step),
            signature: aggregate_bls(&signatures)?,
        });
    }

    Some([votes_per_step[0], votes_per_step[1]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn extract_hash_of_empty_batch_is_zero() {
        assert_eq!(extract_hash(&[]), Hash::ZERO);
    }

    #[test]
    fn aggregate_steps_requires_two_steps() {
        let fixture = testing::CommitteeFixture::new(4, 64);
        let hash = Hash::from_bytes(b"h");
        let votes: Vec<ReductionEvent> = fixture.votes(1, 2, hash);
        assert!(aggregate_steps(&votes, &fixture.committee_set(0), 1).is_none());
    }

    #[test]
    fn aggregate_steps_packs_both_steps() {
        let fixture = testing::CommitteeFixture::new(4, 64);
        let hash = Hash::from_bytes(b"h");
        let mut votes = fixture.votes(1, 2, hash);
        votes.extend(fixture.votes(1, 3, hash));

        let [first, second] =
            aggregate_steps(&votes, &fixture.committee_set(0), 1).expect("two steps");
        assert_eq!(first.step, 2);
        assert_eq!(second.step, 3);
        assert_ne!(first.bit_set, 0);
        assert_ne!(second.bit_set, 0);
    }
}
