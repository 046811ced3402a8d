use std::time::Duration;

/// Capped exponential backoff: `initial`, doubling each step, then held at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(Duration::from_millis(1));
        let initial = initial.max(Duration::from_millis(1)).min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self
            .next
            .checked_mul(2)
            .map_or(self.max, |doubled| doubled.min(self.max));
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}
