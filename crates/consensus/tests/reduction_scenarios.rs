//! Reducer behavior under full quorum, missing quorum and disagreement.

use sba_bus::{EventBus, Listener};
use sba_consensus::testing::CommitteeFixture;
use sba_consensus::{CoordinatorMsg, Reducer, RoundState, Signer, StepTimer};
use sba_types::Hash;
use sba_wire::{AggregatedAgreement, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const BASE_TIMEOUT: Duration = Duration::from_millis(400);
const QUORUM_OF_50: u32 = 34;

struct Harness {
    state: Arc<RoundState>,
    timer: Arc<StepTimer>,
    reducer: Arc<Reducer>,
    agreement_rx: mpsc::Receiver<Vec<u8>>,
    restart_rx: mpsc::Receiver<Vec<u8>>,
    // Keeps the signer's flush channel open for the test's lifetime.
    _coordinator_rx: mpsc::UnboundedReceiver<CoordinatorMsg>,
}

/// A reducer at `(round 1, step 2)`, the position the coordinator hands over
/// after a best score.
fn harness(fixture: &CommitteeFixture) -> Harness {
    let bus = Arc::new(EventBus::new());
    let keys = Arc::new(fixture.keys[0].clone());
    let committee = Arc::new(fixture.committee_set(0));
    let state = Arc::new(RoundState::new(1));
    state.increment_step();

    let (coordinator_tx, coordinator_rx) = mpsc::unbounded_channel();
    let signer = Signer::new(
        Arc::clone(&keys),
        Arc::clone(&state),
        Arc::clone(&bus),
        coordinator_tx,
    );
    let timer = Arc::new(StepTimer::new(BASE_TIMEOUT, Duration::from_secs(5)));

    let (agreement_tx, agreement_rx) = mpsc::channel(8);
    bus.subscribe(Topic::Agreement, Listener::channel(agreement_tx));
    let (restart_tx, restart_rx) = mpsc::channel(8);
    bus.subscribe(Topic::Restart, Listener::channel(restart_tx));

    let reducer = Reducer::new(keys, committee, Arc::clone(&state), signer, Arc::clone(&timer), 1);

    Harness {
        state,
        timer,
        reducer,
        agreement_rx,
        restart_rx,
        _coordinator_rx: coordinator_rx,
    }
}

async fn wait_for_step(state: &RoundState, step: u8) {
    timeout(Duration::from_secs(3), async {
        while state.step() < step {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("step was never reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_round_gossips_agreement_and_restarts() {
    let fixture = CommitteeFixture::flat(50);
    let mut hx = harness(&fixture);
    let hash = Hash::from([0x11u8; 32]);

    hx.reducer.start_reduction(hash);
    for vote in fixture.votes(1, 2, hash).into_iter().take(40) {
        hx.reducer.process(vote);
    }

    wait_for_step(&hx.state, 3).await;
    for vote in fixture.votes(1, 3, hash).into_iter().take(40) {
        hx.reducer.process(vote);
    }

    let payload = timeout(Duration::from_secs(3), hx.agreement_rx.recv())
        .await
        .expect("agreement before the step timeout")
        .expect("channel open");
    let agreement = AggregatedAgreement::from_bytes(&payload).unwrap();

    assert_eq!(agreement.header.block_hash, hash);
    assert!(agreement.verify_signed_votes());
    assert_eq!(agreement.votes_per_step[0].step, 2);
    assert_eq!(agreement.votes_per_step[1].step, 3);
    assert!(agreement.votes_per_step[0].bit_set.count_ones() >= QUORUM_OF_50);
    assert!(agreement.votes_per_step[1].bit_set.count_ones() >= QUORUM_OF_50);

    // Restart fires exactly once per attempt.
    timeout(Duration::from_secs(1), hx.restart_rx.recv())
        .await
        .expect("restart")
        .expect("channel open");
    assert!(hx.restart_rx.try_recv().is_err());

    // A fully successful reduction keeps the base timeout.
    assert_eq!(hx.timer.timeout(), BASE_TIMEOUT);
    assert_eq!(hx.state.round_and_step(), (1, 4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_quorum_times_out_and_doubles_the_timeout() {
    let fixture = CommitteeFixture::flat(50);
    let mut hx = harness(&fixture);
    let hash = Hash::from([0x11u8; 32]);

    hx.reducer.start_reduction(hash);
    // Only 10 of 50 vote: well below the quorum of 34.
    for vote in fixture.votes(1, 2, hash).into_iter().take(10) {
        hx.reducer.process(vote);
    }

    timeout(Duration::from_secs(3), hx.restart_rx.recv())
        .await
        .expect("restart after both step timeouts")
        .expect("channel open");

    assert!(hx.agreement_rx.try_recv().is_err());
    assert_eq!(hx.timer.timeout(), BASE_TIMEOUT * 2);
    assert_eq!(hx.state.round_and_step(), (1, 4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disagreeing_steps_produce_no_agreement() {
    let fixture = CommitteeFixture::flat(50);
    let mut hx = harness(&fixture);
    let first_hash = Hash::from([0x11u8; 32]);
    let second_hash = Hash::from([0x22u8; 32]);

    hx.reducer.start_reduction(first_hash);
    for vote in fixture.votes(1, 2, first_hash).into_iter().take(40) {
        hx.reducer.process(vote);
    }

    wait_for_step(&hx.state, 3).await;
    for vote in fixture.votes(1, 3, second_hash).into_iter().take(40) {
        hx.reducer.process(vote);
    }

    timeout(Duration::from_secs(3), hx.restart_rx.recv())
        .await
        .expect("restart despite disagreement")
        .expect("channel open");

    assert!(hx.agreement_rx.try_recv().is_err());
    // Both steps reached quorum, so the timeout neither doubled nor reset.
    assert_eq!(hx.timer.timeout(), BASE_TIMEOUT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn end_suppresses_all_further_publications() {
    let fixture = CommitteeFixture::flat(50);
    let mut hx = harness(&fixture);
    let hash = Hash::from([0x11u8; 32]);

    hx.reducer.start_reduction(hash);
    hx.reducer.end();

    for vote in fixture.votes(1, 2, hash) {
        hx.reducer.process(vote);
    }

    tokio::time::sleep(BASE_TIMEOUT * 3).await;
    assert!(hx.agreement_rx.try_recv().is_err());
    assert!(hx.restart_rx.try_recv().is_err());
}
