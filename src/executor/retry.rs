//! Bounded retry counters for the polling steps

use tracing::debug;

/// Counts polling attempts against a ceiling
///
/// A step that keeps waiting for an on-chain condition asks the counter on every pass;
/// once the ceiling is reached the step gives up and restarts its flow.
#[derive(Debug, Clone)]
pub struct RetryCounter {
    name: &'static str,
    max_retries: u64,
    attempt: u64,
}

impl RetryCounter {
    pub fn new(name: &'static str, max_retries: u64) -> Self {
        Self {
            name,
            max_retries,
            attempt: 0,
        }
    }

    /// Records one attempt. Returns `true` once the ceiling has been reached.
    pub fn process(&mut self) -> bool {
        if self.attempt >= self.max_retries {
            debug!(
                counter = self.name,
                max = self.max_retries,
                "retry ceiling reached"
            );
            return true;
        }

        self.attempt += 1;
        debug!(
            counter = self.name,
            attempt = self.attempt,
            max = self.max_retries,
            "retrying"
        );
        false
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn max_retries(&self) -> u64 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_reached_on_call_after_max() {
        let mut counter = RetryCounter::new("quorum", 3);
        assert!(!counter.process());
        assert!(!counter.process());
        assert!(!counter.process());
        assert!(counter.process());
        assert!(counter.process());
        assert_eq!(counter.attempt(), 3);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut counter = RetryCounter::new("quorum", 1);
        assert!(!counter.process());
        assert!(counter.process());
        counter.reset();
        assert_eq!(counter.attempt(), 0);
        assert!(!counter.process());
    }
}
