//! Concurrent verify-then-aggregate of consensus votes.

use crate::ConsensusError;
use sba_types::Hash;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Per-phase capability the accumulator verifies and groups events with.
pub trait Handler<E>: Send + Sync + 'static {
    /// Full validity check; failing events are dropped.
    fn verify(&self, ev: &E) -> Result<(), ConsensusError>;

    /// Grouping key, typically the voted block hash.
    fn identifier(&self, ev: &E) -> Hash;

    /// Votes needed before a batch is emitted.
    fn quorum(&self) -> usize;

    /// Weight of one event (committee seats of its sender).
    fn weight(&self, _ev: &E) -> usize {
        1
    }
}

struct Shared<E> {
    /// Verified events grouped by identifier, with their weights.
    collected: RwLock<HashMap<Hash, Vec<(E, usize)>>>,
    /// Whether a batch was already emitted for the current (round, step).
    emitted: Mutex<bool>,
}

/// Worker-pool accumulator.
///
/// `worker_amount` threads pull events off a shared channel, verify them via
/// the handler and group them under a write lock. The first identifier whose
/// accumulated weight reaches quorum is emitted on the collected-votes
/// channel exactly once; later arrivals keep accumulating silently until
/// [`Accumulator::clear`].
pub struct Accumulator<E> {
    input: Mutex<Option<crossbeam::channel::Sender<E>>>,
    shared: Arc<Shared<E>>,
}

impl<E: Clone + Send + Sync + 'static> Accumulator<E> {
    /// Spawn the worker pool. Returns the accumulator and the channel quorum
    /// batches arrive on.
    pub fn new(
        handler: Arc<dyn Handler<E>>,
        worker_amount: usize,
    ) -> (Self, tokio::sync::mpsc::Receiver<Vec<E>>) {
        let (input_tx, input_rx) = crossbeam::channel::unbounded::<E>();
        let (votes_tx, votes_rx) = tokio::sync::mpsc::channel(1);
        let shared = Arc::new(Shared {
            collected: RwLock::new(HashMap::new()),
            emitted: Mutex::new(false),
        });

        for _ in 0..worker_amount.max(1) {
            let input_rx = input_rx.clone();
            let votes_tx = votes_tx.clone();
            let handler = Arc::clone(&handler);
            let shared = Arc::clone(&shared);

            std::thread::spawn(move || {
                while let Ok(ev) = input_rx.recv() {
                    if let Err(err) = handler.verify(&ev) {
                        debug!(target: "accumulator", %err, "dropping invalid event");
                        continue;
                    }

                    let id = handler.identifier(&ev);
                    let weight = handler.weight(&ev).max(1);
                    let quorum = handler.quorum();

                    let mut collected = shared.collected.write().expect("collected lock");
                    let entry = collected.entry(id).or_default();
                    entry.push((ev, weight));
                    let total: usize = entry.iter().map(|(_, w)| *w).sum();

                    if quorum > 0 && total >= quorum {
                        let mut emitted = shared.emitted.lock().expect("emitted lock");
                        if !*emitted {
                            *emitted = true;
                            let batch: Vec<E> = entry.iter().map(|(e, _)| e.clone()).collect();
                            drop(emitted);
                            drop(collected);
                            let _ = votes_tx.try_send(batch);
                        }
                    }
                }
            });
        }

        (
            Self {
                input: Mutex::new(Some(input_tx)),
                shared,
            },
            votes_rx,
        )
    }

    /// Enqueue an event for verification. Non-blocking; a stopped
    /// accumulator silently drops.
    pub fn process(&self, ev: E) {
        if let Some(input) = self.input.lock().expect("input lock").as_ref() {
            let _ = input.send(ev);
        }
    }

    /// Snapshot of every verified event.
    pub fn all(&self) -> Vec<E> {
        self.shared
            .collected
            .read()
            .expect("collected lock")
            .values()
            .flat_map(|entry| entry.iter().map(|(e, _)| e.clone()))
            .collect()
    }

    /// Reset for the next step: forget collected events and re-arm emission.
    pub fn clear(&self) {
        let mut collected = self.shared.collected.write().expect("collected lock");
        collected.clear();
        *self.shared.emitted.lock().expect("emitted lock") = false;
    }

    /// Stop the workers once the queue drains. Idempotent.
    pub fn stop(&self) {
        self.input.lock().expect("input lock").take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    struct TestVote {
        id: Hash,
        valid: bool,
        weight: usize,
    }

    struct TestHandler {
        quorum: usize,
    }

    impl Handler<TestVote> for TestHandler {
        fn verify(&self, ev: &TestVote) -> Result<(), ConsensusError> {
            if ev.valid {
                Ok(())
            } else {
                Err(ConsensusError::InvalidSignature)
            }
        }

        fn identifier(&self, ev: &TestVote) -> Hash {
            ev.id
        }

        fn quorum(&self) -> usize {
            self.quorum
        }

        fn weight(&self, ev: &TestVote) -> usize {
            ev.weight
        }
    }

    fn vote(id: u8, weight: usize) -> TestVote {
        TestVote {
            id: Hash::from_bytes(&[id]),
            valid: true,
            weight,
        }
    }

    fn recv(rx: &mut tokio::sync::mpsc::Receiver<Vec<TestVote>>) -> Option<Vec<TestVote>> {
        for _ in 0..200 {
            match rx.try_recv() {
                Ok(batch) => return Some(batch),
                Err(_) => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        None
    }

    #[test]
    fn emits_batch_at_quorum() {
        let (acc, mut rx) = Accumulator::new(Arc::new(TestHandler { quorum: 3 }), 2);
        for _ in 0..3 {
            acc.process(vote(1, 1));
        }
        let batch = recv(&mut rx).expect("quorum batch");
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|v| v.id == Hash::from_bytes(&[1])));
    }

    #[test]
    fn emits_only_once_until_cleared() {
        let (acc, mut rx) = Accumulator::new(Arc::new(TestHandler { quorum: 2 }), 2);
        for _ in 0..6 {
            acc.process(vote(1, 1));
        }
        assert!(recv(&mut rx).is_some());
        assert!(recv(&mut rx).is_none());

        acc.clear();
        acc.process(vote(2, 1));
        acc.process(vote(2, 1));
        let batch = recv(&mut rx).expect("batch after clear");
        assert!(batch.iter().all(|v| v.id == Hash::from_bytes(&[2])));
    }

    #[test]
    fn invalid_events_do_not_count() {
        let (acc, mut rx) = Accumulator::new(Arc::new(TestHandler { quorum: 2 }), 2);
        acc.process(TestVote {
            id: Hash::from_bytes(&[1]),
            valid: false,
            weight: 1,
        });
        acc.process(vote(1, 1));
        assert!(recv(&mut rx).is_none());
        assert_eq!(acc.all().len(), 1);
    }

    #[test]
    fn weights_count_toward_quorum() {
        let (acc, mut rx) = Accumulator::new(Arc::new(TestHandler { quorum: 4 }), 2);
        acc.process(vote(1, 3));
        assert!(recv(&mut rx).is_none());
        acc.process(vote(1, 1));
        let batch = recv(&mut rx).expect("weighted quorum");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn stop_is_idempotent_and_silences_process() {
        let (acc, mut rx) = Accumulator::new(Arc::new(TestHandler { quorum: 1 }), 2);
        acc.stop();
        acc.stop();
        acc.process(vote(1, 1));
        assert!(recv(&mut rx).is_none());
    }
}
