//! Coordinator pipeline: early-event deferral, obsolete-event dropping and a
//! full round driven to a winning block hash.

use sba_bus::{EventBus, Listener};
use sba_consensus::testing::CommitteeFixture;
use sba_consensus::{BlockGenerator, Config, Coordinator, HashProver};
use sba_types::{Hash, Keys, Seed};
use sba_wire::{AggregatedAgreement, RoundUpdate, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn config() -> Config {
    Config {
        default_timeout_ms: 600,
        max_timeout_ms: 5_000,
        committee_size: 50,
        accumulator_workers: 4,
        ..Config::mock()
    }
}

struct Pipeline {
    bus: Arc<EventBus>,
    state: Arc<sba_consensus::RoundState>,
    agreement_rx: mpsc::Receiver<Vec<u8>>,
    winner_rx: mpsc::Receiver<Vec<u8>>,
}

fn pipeline(fixture: &CommitteeFixture) -> Pipeline {
    let bus = Arc::new(EventBus::new());
    let keys = Arc::new(fixture.keys[0].clone());
    let committee = Arc::new(fixture.committee_set(0));
    let generator = Arc::new(BlockGenerator::new(
        Arc::clone(&keys),
        Arc::new(HashProver),
        50,
        [0u8; 32],
    ));

    let (agreement_tx, agreement_rx) = mpsc::channel(16);
    bus.subscribe(Topic::Agreement, Listener::channel(agreement_tx));
    let (winner_tx, winner_rx) = mpsc::channel(16);
    bus.subscribe(Topic::WinningBlockHash, Listener::channel(winner_tx));

    let coordinator = Coordinator::new(
        Arc::clone(&bus),
        keys,
        committee,
        generator,
        Arc::new(HashProver),
        config(),
    );
    let state = coordinator.state();
    coordinator.spawn();

    Pipeline {
        bus,
        state,
        agreement_rx,
        winner_rx,
    }
}

fn round_update(round: u64, tag: &[u8]) -> RoundUpdate {
    RoundUpdate {
        round,
        prev_hash: Hash::from_bytes(tag),
        seed: Seed::ZERO,
    }
}

async fn wait_for_position(state: &sba_consensus::RoundState, round: u64, step: u8) {
    timeout(Duration::from_secs(10), async {
        loop {
            let (r, s) = state.round_and_step();
            if r >= round && (r > round || s >= step) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("position was never reached");
}

/// Early votes for the next round are queued, survive the round update and
/// drive that round's reduction to an agreement; obsolete votes vanish
/// without a trace.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn early_votes_survive_the_round_update_and_win() {
    let fixture = CommitteeFixture::flat(50);
    let mut px = pipeline(&fixture);

    px.bus
        .publish(Topic::RoundUpdate, &round_update(4, b"tip3").to_bytes());

    // Early: votes for round 5, step 2, while the coordinator sits in
    // round 4.
    let hash = Hash::from([0x11u8; 32]);
    for vote in fixture.votes(5, 2, hash) {
        px.bus.publish(Topic::Reduction, &vote.to_bytes());
    }

    // Obsolete: round 3 is long gone and must leave no trace.
    let old_hash = Hash::from([0x22u8; 32]);
    for vote in fixture.votes(3, 2, old_hash) {
        px.bus.publish(Topic::Reduction, &vote.to_bytes());
    }

    px.bus
        .publish(Topic::RoundUpdate, &round_update(5, b"tip4").to_bytes());

    // The queued step-2 votes give the first reduction an instant quorum;
    // feed the second step once the reducer gets there.
    wait_for_position(&px.state, 5, 3).await;
    for vote in fixture.votes(5, 3, hash) {
        px.bus.publish(Topic::Reduction, &vote.to_bytes());
    }

    let agreement = loop {
        let payload = timeout(Duration::from_secs(10), px.agreement_rx.recv())
            .await
            .expect("agreement")
            .expect("channel open");
        let agreement = AggregatedAgreement::from_bytes(&payload).unwrap();
        assert_ne!(
            agreement.header.block_hash, old_hash,
            "obsolete votes must never produce an agreement"
        );
        if agreement.header.round == 5 {
            break agreement;
        }
    };

    assert_eq!(agreement.header.block_hash, hash);
    assert_eq!(agreement.votes_per_step[0].step, 2);
    assert_eq!(agreement.votes_per_step[1].step, 3);

    // Foreign agreements push the hash over the agreement quorum.
    for foreign in fixture.agreements(5, 3, hash) {
        px.bus.publish(Topic::Agreement, &foreign.to_bytes());
    }

    let winner = timeout(Duration::from_secs(10), px.winner_rx.recv())
        .await
        .expect("winning block hash")
        .expect("channel open");
    assert_eq!(winner, hash.as_bytes());
}

/// A node that is not a committee member never emits votes or agreements.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outsider_observes_without_voting() {
    let fixture = CommitteeFixture::flat(10);
    let outsider = Arc::new(Keys::from_seed(&[0xeeu8; 32]));

    let bus = Arc::new(EventBus::new());
    let committee = Arc::new(fixture.committee_set_with_keys(Arc::clone(&outsider)));
    let generator = Arc::new(BlockGenerator::new(
        Arc::clone(&outsider),
        Arc::new(HashProver),
        50,
        [0xeeu8; 32],
    ));

    let (reduction_tx, mut reduction_rx) = mpsc::channel(16);
    bus.subscribe(Topic::Reduction, Listener::channel(reduction_tx));

    let coordinator = Coordinator::new(
        Arc::clone(&bus),
        outsider,
        committee,
        generator,
        Arc::new(HashProver),
        Config {
            default_timeout_ms: 200,
            ..config()
        },
    );
    coordinator.spawn();

    bus.publish(Topic::RoundUpdate, &round_update(1, b"tip0").to_bytes());

    // Give the pipeline time to run selection and a reduction attempt.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(
        reduction_rx.try_recv().is_err(),
        "an outsider must not publish reduction votes"
    );
}
