// Job clock - hands out strictly increasing start timestamps
//
// Start timestamps double as correlation keys between the executor and the
// shell, so two jobs started within the same millisecond must not collide.

use crate::port::TimeProvider;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub struct JobClock {
    time_provider: Arc<dyn TimeProvider>,
    last: AtomicI64,
}

impl JobClock {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            last: AtomicI64::new(0),
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }

    /// `max(now, last + 1)`
    pub fn next_timestamp(&self) -> i64 {
        let now = self.time_provider.now_millis();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::MockTimeProvider;

    #[test]
    fn test_timestamps_unique_within_same_millisecond() {
        let time = Arc::new(MockTimeProvider::new(1_000));
        let clock = JobClock::new(time.clone());

        assert_eq!(clock.next_timestamp(), 1_000);
        assert_eq!(clock.next_timestamp(), 1_001);
        assert_eq!(clock.next_timestamp(), 1_002);

        time.set(5_000);
        assert_eq!(clock.next_timestamp(), 5_000);
    }

    #[test]
    fn test_clock_going_backwards_stays_monotonic() {
        let time = Arc::new(MockTimeProvider::new(10_000));
        let clock = JobClock::new(time.clone());
        assert_eq!(clock.next_timestamp(), 10_000);

        time.set(9_000);
        assert_eq!(clock.next_timestamp(), 10_001);
    }
}
