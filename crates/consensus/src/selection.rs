//! Best-score selection.
//!
//! The selector opens a timed window per round. Score events that verify are
//! compared against the running best; when the window expires the winner (or
//! the empty sentinel) is published on the internal `BestScore` topic.

use crate::{ConsensusError, ScoreProver};
use sba_bus::EventBus;
use sba_wire::{ScoreEvent, Topic};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Whether `challenger` beats `best`.
///
/// Larger score wins; equal scores fall back to the lexicographically
/// smaller sender key so the outcome does not depend on arrival order.
fn beats(challenger: &ScoreEvent, best: &ScoreEvent) -> bool {
    (challenger.score, Reverse(challenger.header.sender))
        > (best.score, Reverse(best.header.sender))
}

/// The score selection window.
pub struct Selector {
    prover: Arc<dyn ScoreProver>,
    bus: Arc<EventBus>,
    best: Mutex<Option<ScoreEvent>>,
    selecting: AtomicBool,
    /// Window generation; a timer task only fires for the window it opened.
    window: AtomicU64,
    cancel: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl Selector {
    pub fn new(prover: Arc<dyn ScoreProver>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            prover,
            bus,
            best: Mutex::new(None),
            selecting: AtomicBool::new(false),
            window: AtomicU64::new(0),
            cancel: Mutex::new(None),
        })
    }

    /// Whether a window is currently open.
    pub fn is_selecting(&self) -> bool {
        self.selecting.load(Ordering::Acquire)
    }

    /// Open a selection window. Any previous window is aborted first.
    ///
    /// On expiry the best event observed (or an empty payload when none
    /// arrived) goes out on `BestScore` and the selector returns to idle.
    pub fn start_selection(self: &Arc<Self>, timeout: Duration) {
        self.stop();
        let window = self.window.fetch_add(1, Ordering::AcqRel) + 1;
        self.selecting.store(true, Ordering::Release);

        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
        *self.cancel.lock().expect("cancel lock") = Some(cancel_tx);

        let selector = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    // A timer that outlived its window must not touch the
                    // next one.
                    if selector.window.load(Ordering::Acquire) == window
                        && selector.selecting.swap(false, Ordering::AcqRel)
                    {
                        let best = selector.best.lock().expect("best lock").take();
                        let payload = best.map(|ev| ev.to_bytes()).unwrap_or_default();
                        trace!(target: "selector", empty = payload.is_empty(), "selection window expired");
                        selector.bus.publish(Topic::BestScore, &payload);
                    }
                }
                _ = cancel_rx => {}
            }
        });
    }

    /// Feed a score event into the open window.
    pub fn process(&self, ev: ScoreEvent) -> Result<(), ConsensusError> {
        if !self.is_selecting() {
            return Err(ConsensusError::Stopped);
        }

        self.prover.verify(&ev)?;

        let mut best = self.best.lock().expect("best lock");
        match best.as_ref() {
            Some(current) if !beats(&ev, current) => {
                debug!(target: "selector", score = %ev.score, "score does not beat current best");
            }
            _ => *best = Some(ev),
        }
        Ok(())
    }

    /// Abort the window without emitting.
    pub fn stop(&self) {
        self.selecting.store(false, Ordering::Release);
        if let Some(cancel) = self.cancel.lock().expect("cancel lock").take() {
            let _ = cancel.send(());
        }
        self.best.lock().expect("best lock").take();
    }
}
