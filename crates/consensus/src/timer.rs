//! Step timeout with back-off.

use std::sync::Mutex;
use std::time::Duration;

/// The step timeout shared across rounds.
///
/// Doubles whenever a reduction step times out and resets to the configured
/// default on a fully successful reduction, bounded by `max`.
#[derive(Debug)]
pub struct StepTimer {
    base: Duration,
    max: Duration,
    current: Mutex<Duration>,
}

impl StepTimer {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: Mutex::new(base),
        }
    }

    pub fn timeout(&self) -> Duration {
        *self.current.lock().expect("timer lock")
    }

    /// Double the timeout for the next round.
    pub fn increase(&self) {
        let mut current = self.current.lock().expect("timer lock");
        *current = (*current * 2).min(self.max);
    }

    /// Back to the configured default.
    pub fn reset(&self) {
        *self.current.lock().expect("timer lock") = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_and_caps() {
        let timer = StepTimer::new(Duration::from_millis(100), Duration::from_millis(350));
        timer.increase();
        assert_eq!(timer.timeout(), Duration::from_millis(200));
        timer.increase();
        assert_eq!(timer.timeout(), Duration::from_millis(350));
    }

    #[test]
    fn reset_restores_base() {
        let timer = StepTimer::new(Duration::from_millis(100), Duration::from_secs(1));
        timer.increase();
        timer.reset();
        assert_eq!(timer.timeout(), Duration::from_millis(100));
    }
}
