//! Agreement accumulation and certification.
//!
//! Aggregated agreements from committee members accumulate per block hash;
//! the first hash to reach quorum within the round is certified by publishing
//! `AgreementEvent` (the full winning agreement) and `WinningBlockHash` on
//! the internal bus.

use crate::{Accumulator, CommitteeSet, ConsensusError, Handler, RoundState};
use sba_bus::EventBus;
use sba_types::{verify_aggregate_bls, Hash};
use sba_wire::{signable_vote_bytes, AggregatedAgreement, Topic};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Verification capability for aggregated agreements.
pub struct AgreementHandler {
    committee: Arc<CommitteeSet>,
    state: Arc<RoundState>,
}

impl AgreementHandler {
    pub fn new(committee: Arc<CommitteeSet>, state: Arc<RoundState>) -> Self {
        Self { committee, state }
    }
}

impl Handler<AggregatedAgreement> for AgreementHandler {
    fn verify(&self, ev: &AggregatedAgreement) -> Result<(), ConsensusError> {
        if !ev.verify_signed_votes() {
            return Err(ConsensusError::InvalidSignature);
        }

        let round = ev.header.round;
        for step_votes in &ev.votes_per_step {
            let members = self
                .committee
                .unpack(step_votes.bit_set, round, step_votes.step);
            // Quorum counts seats, so a member's vote weighs its seat count.
            let seats: usize = members
                .iter()
                .map(|pk| self.committee.votes_for(pk, round, step_votes.step))
                .sum();
            let quorum = self.committee.quorum(round, step_votes.step);
            if seats < quorum {
                return Err(ConsensusError::BelowQuorum {
                    got: seats,
                    quorum,
                });
            }

            let msg = signable_vote_bytes(round, step_votes.step, &ev.header.block_hash);
            if !verify_aggregate_bls(&step_votes.signature, &msg, &members) {
                return Err(ConsensusError::InvalidAggregate {
                    step: step_votes.step,
                });
            }
        }

        Ok(())
    }

    fn identifier(&self, ev: &AggregatedAgreement) -> Hash {
        ev.header.block_hash
    }

    fn quorum(&self) -> usize {
        // The agreement committee is keyed to the round, independent of the
        // reduction step currently in flight.
        self.committee.quorum(self.state.round(), 1)
    }

    fn weight(&self, ev: &AggregatedAgreement) -> usize {
        self.committee
            .votes_for(&ev.header.sender, ev.header.round, ev.header.step)
    }
}

/// The agreement component for one round.
pub struct Agreement {
    committee: Arc<CommitteeSet>,
    accumulator: Arc<Accumulator<AggregatedAgreement>>,
    finalized: AtomicBool,
    listen_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Agreement {
    /// Spawn the component: accumulation plus the listener that publishes
    /// the certificate once quorum is reached.
    pub fn new(
        committee: Arc<CommitteeSet>,
        state: Arc<RoundState>,
        bus: Arc<EventBus>,
        worker_amount: usize,
    ) -> Arc<Self> {
        let handler = Arc::new(AgreementHandler::new(Arc::clone(&committee), state));
        let (accumulator, mut votes_rx) = Accumulator::new(handler, worker_amount);

        let listen_task = tokio::spawn(async move {
            if let Some(batch) = votes_rx.recv().await {
                let winner = &batch[0];
                info!(
                    target: "agreement",
                    round = winner.header.round,
                    block_hash = %winner.header.block_hash,
                    agreements = batch.len(),
                    "quorum of agreements reached"
                );
                bus.publish(Topic::AgreementEvent, &winner.to_bytes());
                bus.publish(
                    Topic::WinningBlockHash,
                    winner.header.block_hash.as_bytes(),
                );
            }
        });

        Arc::new(Self {
            committee,
            accumulator: Arc::new(accumulator),
            finalized: AtomicBool::new(false),
            listen_task: Mutex::new(Some(listen_task)),
        })
    }

    /// Feed an agreement event. Non-members are dropped before accumulation.
    pub fn process(&self, ev: AggregatedAgreement) {
        if self.finalized.load(Ordering::Acquire) {
            return;
        }
        if !self
            .committee
            .is_member(&ev.header.sender, ev.header.round, ev.header.step)
        {
            debug!(target: "agreement", "dropping agreement from non-member");
            return;
        }
        self.accumulator.process(ev);
    }

    /// Stop accumulation and the certificate listener. Idempotent; nothing
    /// is published afterwards.
    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        self.accumulator.stop();
        if let Some(task) = self.listen_task.lock().expect("listen task lock").take() {
            task.abort();
        }
    }
}

impl Drop for Agreement {
    fn drop(&mut self) {
        self.finalize();
    }
}
