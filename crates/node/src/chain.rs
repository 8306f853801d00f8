//! Block acceptance.
//!
//! The chain consumes candidates and certified winning hashes, persists the
//! winner, feeds `Stake`/`Bid` transactions into the membership state and
//! restarts consensus for the next round.

use crate::{candidate, CandidateStore, ChainDb, ChainError, DbTransaction};
use sba_bus::{EventBus, Listener};
use sba_consensus::{BlockGenerator, CommitteeSet, Config};
use sba_types::{Bid, BidList, Block, Certificate, Hash, Transaction};
use sba_wire::{
    block_to_bytes, prepend_topic, AggregatedAgreement, Inv, InvKind, RoundUpdate, Topic,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Derive a blind-bid lottery value from a bid's amount and commitment.
///
/// Stand-in for the proof system's `X = zk(d, m)`; the real computation is
/// outside the core.
fn bid_x(d: u64, m: &[u8; 32]) -> [u8; 32] {
    Hash::from_parts(&[b"bid-x", &d.to_le_bytes(), m]).to_bytes()
}

/// The node's view of the chain.
pub struct Chain<D: ChainDb> {
    bus: Arc<EventBus>,
    db: Arc<D>,
    committee: Arc<CommitteeSet>,
    generator: Arc<BlockGenerator>,
    config: Config,
    prev_block: Mutex<Block>,
    bid_list: Mutex<BidList>,
    candidates: CandidateStore,
    /// Certificate from the latest `AgreementEvent`, consumed by the
    /// following `WinningBlockHash`.
    pending_certificate: Mutex<Option<(Hash, Certificate)>>,
}

impl<D: ChainDb> Chain<D> {
    /// Open the chain, storing the genesis block on first run.
    pub fn new(
        bus: Arc<EventBus>,
        db: Arc<D>,
        committee: Arc<CommitteeSet>,
        generator: Arc<BlockGenerator>,
        config: Config,
    ) -> Result<Arc<Self>, ChainError> {
        let tip = match db.view(|tx| tx.tip())? {
            Some(tip) => tip,
            None => {
                let genesis = Block::genesis();
                db.update(|tx| tx.store_block(&genesis))?;
                genesis
            }
        };

        Ok(Arc::new(Self {
            bus,
            db,
            committee,
            generator,
            config,
            prev_block: Mutex::new(tip),
            bid_list: Mutex::new(BidList::new()),
            candidates: CandidateStore::new(),
            pending_certificate: Mutex::new(None),
        }))
    }

    /// The current tip.
    pub fn tip(&self) -> Block {
        self.prev_block.lock().expect("tip lock").clone()
    }

    /// Subscribe to the bus and run the listener task.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut candidate_rx = self.channel_for(Topic::Candidate);
        let mut agreement_rx = self.channel_for(Topic::AgreementEvent);
        let mut winning_rx = self.channel_for(Topic::WinningBlockHash);
        let mut block_rx = self.channel_for(Topic::Block);

        let chain = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(payload) = candidate_rx.recv() => chain.handle_candidate(&payload),
                    Some(payload) = agreement_rx.recv() => chain.handle_agreement_event(&payload),
                    Some(payload) = winning_rx.recv() => chain.handle_winning_hash(&payload),
                    Some(payload) = block_rx.recv() => chain.handle_foreign_block(&payload),
                    else => break,
                }
            }
        })
    }

    fn channel_for(&self, topic: Topic) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(64);
        self.bus.subscribe(topic, Listener::channel(tx));
        rx
    }

    /// Kick consensus off from the current tip.
    pub fn start_consensus(&self) {
        let tip = self.tip();
        let update = RoundUpdate {
            round: tip.header.height + 1,
            prev_hash: tip.header.hash,
            seed: tip.header.seed,
        };
        self.bus.publish(Topic::RoundUpdate, &update.to_bytes());
    }

    fn handle_candidate(&self, payload: &[u8]) {
        match candidate::validate(payload) {
            Ok(block) => {
                debug!(target: "chain", hash = %block.header.hash, "storing candidate");
                if let Err(err) = self.db.update(|tx| tx.store_candidate(&block)) {
                    warn!(target: "chain", %err, "storing candidate failed");
                }
                self.candidates.insert(block);
            }
            Err(err) => warn!(target: "chain", %err, "rejecting candidate"),
        }
    }

    /// Stash the certificate carried by the agreement and try to commit.
    fn handle_agreement_event(&self, payload: &[u8]) {
        let agreement = match AggregatedAgreement::from_bytes(payload) {
            Ok(agreement) => agreement,
            Err(err) => {
                warn!(target: "chain", %err, "undecodable agreement event");
                return;
            }
        };
        let hash = agreement.header.block_hash;
        let certificate = Certificate {
            step_one_batch: agreement.votes_per_step[0],
            step_two_batch: agreement.votes_per_step[1],
            first_reduction_hash: hash,
            second_reduction_hash: hash,
        };
        *self.pending_certificate.lock().expect("certificate lock") = Some((hash, certificate));
        self.try_commit(hash);
    }

    /// Resolve the winning hash against the candidate store and commit.
    ///
    /// The certificate arrives on the companion `AgreementEvent`; whichever
    /// of the two messages lands second completes the commit.
    fn handle_winning_hash(&self, payload: &[u8]) {
        if payload.len() != Hash::BYTES {
            warn!(target: "chain", "malformed winning hash payload");
            return;
        }
        let hash = Hash::from_hash_bytes(payload);
        if self.tip().header.hash == hash {
            return;
        }
        self.try_commit(hash);
    }

    /// Commit `hash` if its candidate and certificate are both at hand.
    fn try_commit(&self, hash: Hash) {
        let certificate = {
            let pending = self.pending_certificate.lock().expect("certificate lock");
            match pending.as_ref() {
                Some((certified_hash, certificate)) if *certified_hash == hash => *certificate,
                _ => {
                    debug!(target: "chain", hash = %hash, "no certificate yet for winning hash");
                    return;
                }
            }
        };

        let mut block = match self.resolve_candidate(&hash) {
            Some(block) => block,
            None => {
                warn!(target: "chain", hash = %hash, "winning candidate not in store");
                return;
            }
        };
        block.header.certificate = certificate;

        match self.accept_block(block) {
            Ok(()) => {
                self.pending_certificate
                    .lock()
                    .expect("certificate lock")
                    .take();
            }
            Err(err) => error!(target: "chain", %err, "accepting winning block failed"),
        }
    }

    fn resolve_candidate(&self, hash: &Hash) -> Option<Block> {
        if let Some(block) = self.candidates.get(hash) {
            return Some(block);
        }
        self.db.view(|tx| tx.fetch_candidate(hash)).ok().flatten()
    }

    /// A full block arrived from the network.
    fn handle_foreign_block(&self, payload: &[u8]) {
        match sba_wire::block_from_bytes(payload) {
            Ok(block) => {
                if let Err(err) = self.accept_block(block) {
                    warn!(target: "chain", %err, "rejecting foreign block");
                }
            }
            Err(err) => warn!(target: "chain", %err, "undecodable block"),
        }
    }

    /// Accept a block: verify, persist, register membership transactions,
    /// notify, advertise and sweep. A store failure aborts the round and
    /// leaves the previous tip, provisioner set and bid list untouched.
    pub fn accept_block(&self, block: Block) -> Result<(), ChainError> {
        let prev = self.tip();
        self.verify_block(&block, &prev)?;

        self.db.update(|tx| tx.store_block(&block))?;

        self.register_consensus_txs(&block);
        *self.prev_block.lock().expect("tip lock") = block.clone();

        info!(
            target: "chain",
            height = block.header.height,
            hash = %block.header.hash,
            "block accepted"
        );

        self.bus
            .publish(Topic::AcceptedBlock, &block_to_bytes(&block));
        self.advertise_block(&block);

        // Sweeping is best-effort; a failure must not abort acceptance.
        let height = block.header.height;
        self.candidates.delete_up_to(height);
        match self.db.update(|tx| tx.delete_candidates(height)) {
            Ok(count) => debug!(target: "chain", count, "candidate blocks deleted"),
            Err(err) => warn!(target: "chain", %err, "deleting candidate blocks failed"),
        }

        let update = RoundUpdate {
            round: height + 1,
            prev_hash: block.header.hash,
            seed: block.header.seed,
        };
        self.bus.publish(Topic::RoundUpdate, &update.to_bytes());
        Ok(())
    }

    fn verify_block(&self, block: &Block, prev: &Block) -> Result<(), ChainError> {
        if block.header.height != prev.header.height + 1
            || block.header.prev_hash != prev.header.hash
        {
            return Err(ChainError::BadLinkage);
        }
        candidate::check_hash(block)?;
        candidate::check_root(block)?;
        Ok(())
    }

    /// Feed `Stake` and `Bid` transactions into the membership state,
    /// effective from the next height.
    fn register_consensus_txs(&self, block: &Block) {
        let start_height = block.header.height + 1;
        let mut bids_changed = false;

        for tx in &block.txs {
            match tx {
                Transaction::Stake(stake) => {
                    let amount = tx.total_output_amount();
                    let lock_time = if stake.lock_time == 0 {
                        self.config.default_lock_time
                    } else {
                        stake.lock_time
                    };
                    self.committee.update_provisioners(|provisioners| {
                        provisioners.add_stake(
                            stake.pk_bls,
                            stake.pk_ed,
                            amount,
                            start_height,
                            start_height + lock_time,
                        );
                    });
                }
                Transaction::Bid(bid) => {
                    let amount = tx.total_output_amount();
                    let lock_time = if bid.lock_time == 0 {
                        self.config.default_lock_time
                    } else {
                        bid.lock_time
                    };
                    self.bid_list.lock().expect("bid list lock").add(Bid {
                        x: bid_x(amount, &bid.m),
                        end_height: start_height + lock_time,
                    });
                    bids_changed = true;
                }
                Transaction::Standard(_) => {}
            }
        }

        let mut bid_list = self.bid_list.lock().expect("bid list lock");
        bid_list.remove_expired(start_height);
        if bids_changed || !bid_list.is_empty() {
            self.generator.set_bid_list(bid_list.clone());
        }
    }

    /// Gossip an inventory advertisement for the new tip.
    fn advertise_block(&self, block: &Block) {
        let mut inv = Inv::default();
        inv.add(InvKind::Block, block.header.hash);
        let framed = prepend_topic(Topic::Inv, &inv.to_bytes());
        self.bus.stream(Topic::Gossip, &framed);
    }
}
