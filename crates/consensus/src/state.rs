//! Shared round/step state.

use std::sync::RwLock;

/// The authoritative `(round, step)` pair.
///
/// Round is monotonically non-decreasing; step resets to 1 on every round
/// change. Shared between the coordinator and the phase that is currently
/// allowed to bump the step.
#[derive(Debug)]
pub struct RoundState {
    inner: RwLock<(u64, u8)>,
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RoundState {
    pub fn new(round: u64) -> Self {
        Self {
            inner: RwLock::new((round, 1)),
        }
    }

    pub fn round(&self) -> u64 {
        self.inner.read().expect("state lock").0
    }

    pub fn step(&self) -> u8 {
        self.inner.read().expect("state lock").1
    }

    pub fn round_and_step(&self) -> (u64, u8) {
        *self.inner.read().expect("state lock")
    }

    /// Enter a new round; the step resets to 1.
    pub fn set_round(&self, round: u64) {
        *self.inner.write().expect("state lock") = (round, 1);
    }

    /// Bump the step within the current round, returning the new step.
    pub fn increment_step(&self) -> u8 {
        let mut guard = self.inner.write().expect("state lock");
        guard.1 = guard.1.saturating_add(1);
        guard.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_change_resets_step() {
        let state = RoundState::new(4);
        state.increment_step();
        state.increment_step();
        assert_eq!(state.round_and_step(), (4, 3));

        state.set_round(5);
        assert_eq!(state.round_and_step(), (5, 1));
    }
}
