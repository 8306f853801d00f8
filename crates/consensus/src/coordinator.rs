//! The per-round state machine.
//!
//! The coordinator owns the authoritative `(round, step)` pair and the
//! lifecycle of every phase. All consensus topics funnel into its task; each
//! event is classified against the current position and either routed to the
//! active phase, deferred in the event queue, or dropped.
//!
//! Phase sequence: `Generation → Selection → Reduction1 → Reduction2 →
//! Agreement → commit → Generation(R+1)`. A `Restart` from the reducer
//! re-enters `Generation` within the current round.

use crate::{
    Agreement, BlockGenerator, CommitteeSet, Config, Reducer, RoundState, ScoreProver, Selector,
    StepTimer,
};
use sba_bus::{EventBus, EventQueue, Listener};
use sba_types::{Hash, Keys};
use sba_wire::{
    block_to_bytes, prepend_topic, seal_envelope, AggregatedAgreement, Header, ReductionEvent,
    RoundUpdate, ScoreEvent, Topic,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Where an event sits relative to the current `(round, step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Obsolete,
    Relevant,
    Early,
}

/// Classify an event header against the current position.
pub fn classify(current_round: u64, current_step: u8, round: u64, step: u8) -> Status {
    if round < current_round {
        return Status::Obsolete;
    }
    if round > current_round {
        return Status::Early;
    }
    if step < current_step {
        Status::Obsolete
    } else if step > current_step {
        Status::Early
    } else {
        Status::Relevant
    }
}

/// Messages feeding the coordinator task.
#[derive(Debug)]
pub enum CoordinatorMsg {
    /// A consensus event arrived on the bus.
    Event { topic: Topic, payload: Vec<u8> },
    /// A phase bumped the step; queued events for the new position must be
    /// replayed.
    FlushQueue,
    /// The chain moved to a new round.
    RoundUpdate(RoundUpdate),
}

/// The narrow capability phases hold instead of the coordinator itself.
///
/// Covers signing-and-emitting plus the step bump, nothing more.
#[derive(Clone)]
pub struct Signer {
    keys: Arc<Keys>,
    state: Arc<RoundState>,
    bus: Arc<EventBus>,
    coordinator_tx: mpsc::UnboundedSender<CoordinatorMsg>,
}

impl Signer {
    pub fn new(
        keys: Arc<Keys>,
        state: Arc<RoundState>,
        bus: Arc<EventBus>,
        coordinator_tx: mpsc::UnboundedSender<CoordinatorMsg>,
    ) -> Self {
        Self {
            keys,
            state,
            bus,
            coordinator_tx,
        }
    }

    pub fn round(&self) -> u64 {
        self.state.round()
    }

    pub fn step(&self) -> u8 {
        self.state.step()
    }

    /// Bump the step and ask the coordinator to replay deferred events for
    /// the new position. Returns the new step.
    pub fn forward(&self) -> u8 {
        let step = self.state.increment_step();
        let _ = self.coordinator_tx.send(CoordinatorMsg::FlushQueue);
        step
    }

    /// Emit an event on the internal bus only.
    pub fn send_internally(&self, topic: Topic, payload: &[u8]) {
        self.bus.publish(topic, payload);
    }

    /// Emit an event internally and gossip it to the network inside the
    /// Ed25519 transport envelope.
    pub fn send_authenticated(&self, topic: Topic, payload: &[u8]) {
        // Loop back first so our own vote reaches the local accumulator.
        self.bus.publish(topic, payload);
        let sealed = seal_envelope(&self.keys.ed, payload);
        self.bus.stream(Topic::Gossip, &prepend_topic(topic, &sealed));
    }
}

/// The coordinator task.
pub struct Coordinator {
    bus: Arc<EventBus>,
    keys: Arc<Keys>,
    committee: Arc<CommitteeSet>,
    config: Config,
    state: Arc<RoundState>,
    timer: Arc<StepTimer>,
    selector: Arc<Selector>,
    generator: Arc<BlockGenerator>,
    queue: EventQueue<(Topic, Vec<u8>)>,
    reducer: Option<Arc<Reducer>>,
    agreement: Option<Arc<Agreement>>,
    round_update: Option<RoundUpdate>,
    msg_tx: mpsc::UnboundedSender<CoordinatorMsg>,
    msg_rx: mpsc::UnboundedReceiver<CoordinatorMsg>,
}

impl Coordinator {
    /// Wire a coordinator to the bus. The returned value must be driven via
    /// [`Coordinator::run`] (or [`Coordinator::spawn`]).
    pub fn new(
        bus: Arc<EventBus>,
        keys: Arc<Keys>,
        committee: Arc<CommitteeSet>,
        generator: Arc<BlockGenerator>,
        prover: Arc<dyn ScoreProver>,
        config: Config,
    ) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RoundState::new(0));
        let timer = Arc::new(StepTimer::new(config.timeout(), config.max_timeout()));
        let selector = Selector::new(prover, Arc::clone(&bus));

        for topic in [
            Topic::Score,
            Topic::Reduction,
            Topic::Agreement,
            Topic::Restart,
            Topic::Generation,
            Topic::BestScore,
        ] {
            let tx = msg_tx.clone();
            bus.subscribe(
                topic,
                Listener::callback(move |payload| {
                    let _ = tx.send(CoordinatorMsg::Event { topic, payload });
                    Ok(())
                }),
            );
        }

        let tx = msg_tx.clone();
        bus.subscribe(
            Topic::RoundUpdate,
            Listener::callback(move |payload| match RoundUpdate::from_bytes(&payload) {
                Ok(update) => {
                    let _ = tx.send(CoordinatorMsg::RoundUpdate(update));
                    Ok(())
                }
                Err(err) => {
                    warn!(target: "coordinator", %err, "undecodable round update");
                    Ok(())
                }
            }),
        );

        Self {
            bus,
            keys,
            committee,
            config,
            state,
            timer,
            selector,
            generator,
            queue: EventQueue::new(),
            reducer: None,
            agreement: None,
            round_update: None,
            msg_tx,
            msg_rx,
        }
    }

    /// The shared round/step state.
    pub fn state(&self) -> Arc<RoundState> {
        Arc::clone(&self.state)
    }

    /// The capability handed to phases.
    pub fn signer(&self) -> Signer {
        Signer::new(
            Arc::clone(&self.keys),
            Arc::clone(&self.state),
            Arc::clone(&self.bus),
            self.msg_tx.clone(),
        )
    }

    /// Drive the coordinator until the bus goes away.
    pub async fn run(mut self) {
        while let Some(msg) = self.msg_rx.recv().await {
            self.handle(msg);
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn handle(&mut self, msg: CoordinatorMsg) {
        match msg {
            CoordinatorMsg::RoundUpdate(update) => self.on_round_update(update),
            CoordinatorMsg::FlushQueue => self.flush_current(),
            CoordinatorMsg::Event { topic, payload } => self.on_event(topic, payload),
        }
    }

    /// Enter a new round: reset the position, sweep the queue, stop every
    /// in-flight phase and trigger generation.
    fn on_round_update(&mut self, update: RoundUpdate) {
        if self.round_update.is_some() && update.round <= self.state.round() {
            debug!(target: "coordinator", round = update.round, "stale round update");
            return;
        }
        trace!(target: "coordinator", round = update.round, "round update");

        self.state.set_round(update.round);
        self.committee.set_seed(update.seed);
        self.committee.remove_expired(update.round);
        self.queue.consume_until(update.round);

        self.selector.stop();
        if let Some(reducer) = self.reducer.take() {
            reducer.end();
        }
        if let Some(agreement) = self.agreement.take() {
            agreement.finalize();
        }
        self.agreement = Some(Agreement::new(
            Arc::clone(&self.committee),
            Arc::clone(&self.state),
            Arc::clone(&self.bus),
            self.config.accumulator_workers,
        ));
        self.round_update = Some(update);

        // Replay everything that was queued for this round; events still
        // ahead of the current step re-queue themselves.
        let mut deferred = Vec::new();
        while let Some((events, _)) = self.queue.consume_next_step(update.round) {
            deferred.extend(events);
        }
        for (topic, payload) in deferred {
            self.on_event(topic, payload);
        }

        self.signer().send_internally(Topic::Generation, &[]);
    }

    fn on_event(&mut self, topic: Topic, payload: Vec<u8>) {
        match topic {
            Topic::Generation => self.on_generation(),
            Topic::Restart => self.on_restart(&payload),
            Topic::BestScore => self.on_best_score(&payload),
            Topic::Score => self.on_score(payload),
            Topic::Reduction => self.on_reduction(payload),
            Topic::Agreement => self.on_agreement(payload),
            other => debug!(target: "coordinator", topic = ?other, "unexpected topic"),
        }
    }

    /// Open the selection window and emit our candidate and score.
    fn on_generation(&mut self) {
        let update = match self.round_update {
            Some(update) => update,
            None => return,
        };

        self.selector.start_selection(self.timer.timeout());

        // Replay scores that arrived before the window opened.
        for (topic, payload) in self.queue.drain(update.round, 1) {
            self.on_event(topic, payload);
        }

        let (candidate, score) = self.generator.generate(&update);
        self.bus
            .publish(Topic::Candidate, &block_to_bytes(&candidate));
        self.signer()
            .send_authenticated(Topic::Score, &score.to_bytes());
    }

    /// A reducer finished (either way): re-enter generation for this round.
    fn on_restart(&mut self, payload: &[u8]) {
        if payload.len() < 8 {
            return;
        }
        let round = u64::from_le_bytes(payload[..8].try_into().unwrap());
        if round != self.state.round() {
            debug!(target: "coordinator", round, "restart for another round");
            return;
        }
        if let Some(reducer) = self.reducer.take() {
            reducer.end();
        }
        self.signer().send_internally(Topic::Generation, &[]);
    }

    /// Selection finished: bump the step and open the first reduction.
    fn on_best_score(&mut self, payload: &[u8]) {
        let hash = if payload.is_empty() {
            Hash::ZERO
        } else {
            match ScoreEvent::from_bytes(payload) {
                Ok(best) => best.candidate_hash,
                Err(err) => {
                    warn!(target: "coordinator", %err, "undecodable best score");
                    Hash::ZERO
                }
            }
        };

        if let Some(previous) = self.reducer.take() {
            previous.end();
        }
        self.signer().forward();
        let reducer = Reducer::new(
            Arc::clone(&self.keys),
            Arc::clone(&self.committee),
            Arc::clone(&self.state),
            self.signer(),
            Arc::clone(&self.timer),
            self.config.accumulator_workers,
        );
        reducer.start_reduction(hash);
        self.reducer = Some(reducer);
    }

    fn on_score(&mut self, payload: Vec<u8>) {
        let header = match Header::peek(&payload) {
            Ok(header) => header,
            Err(err) => {
                debug!(target: "coordinator", %err, "undecodable score header");
                return;
            }
        };

        let round = self.state.round();
        if header.round < round {
            return;
        }
        if header.round > round || !self.selector.is_selecting() {
            self.queue.put(header.round, 1, (Topic::Score, payload));
            return;
        }

        match ScoreEvent::from_bytes(&payload) {
            Ok(ev) => {
                if let Err(err) = self.selector.process(ev) {
                    debug!(target: "coordinator", %err, "score rejected");
                }
            }
            Err(err) => debug!(target: "coordinator", %err, "undecodable score"),
        }
    }

    fn on_reduction(&mut self, payload: Vec<u8>) {
        let header = match Header::peek(&payload) {
            Ok(header) => header,
            Err(err) => {
                debug!(target: "coordinator", %err, "undecodable reduction header");
                return;
            }
        };

        let (round, step) = self.state.round_and_step();
        match classify(round, step, header.round, header.step) {
            Status::Obsolete => {
                trace!(target: "coordinator", round = header.round, step = header.step, "obsolete vote");
            }
            Status::Early => {
                self.queue
                    .put(header.round, header.step, (Topic::Reduction, payload));
            }
            Status::Relevant => match &self.reducer {
                Some(reducer) => match ReductionEvent::from_bytes(&payload) {
                    Ok(ev) => reducer.process(ev),
                    Err(err) => debug!(target: "coordinator", %err, "undecodable reduction"),
                },
                // No collector yet for this step; keep it until one starts.
                None => self
                    .queue
                    .put(header.round, header.step, (Topic::Reduction, payload)),
            },
        }
    }

    fn on_agreement(&mut self, payload: Vec<u8>) {
        let header = match Header::peek(&payload) {
            Ok(header) => header,
            Err(err) => {
                debug!(target: "coordinator", %err, "undecodable agreement header");
                return;
            }
        };

        // Agreements are round-scoped: any step within the current round is
        // relevant.
        let round = self.state.round();
        if header.round < round {
            return;
        }
        if header.round > round {
            self.queue
                .put(header.round, header.step, (Topic::Agreement, payload));
            return;
        }

        if let Some(agreement) = &self.agreement {
            match AggregatedAgreement::from_bytes(&payload) {
                Ok(ev) => agreement.process(ev),
                Err(err) => debug!(target: "coordinator", %err, "undecodable agreement"),
            }
        }
    }

    /// Replay deferred events for the current `(round, step)`.
    fn flush_current(&mut self) {
        let (round, step) = self.state.round_and_step();
        let deferred = self.queue.drain(round, step);
        for (topic, payload) in deferred {
            self.on_event(topic, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_round_then_step() {
        assert_eq!(classify(4, 3, 3, 9), Status::Obsolete);
        assert_eq!(classify(4, 3, 5, 1), Status::Early);
        assert_eq!(classify(4, 3, 4, 2), Status::Obsolete);
        assert_eq!(classify(4, 3, 4, 4), Status::Early);
        assert_eq!(classify(4, 3, 4, 3), Status::Relevant);
    }
}
