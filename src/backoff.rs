use std::time::Duration;

/// Exponential backoff: `base * 2^attempt`, capped at `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.min(10);
        let delay = self.base.saturating_mul(factor);
        if self.cap.is_zero() {
            delay
        } else {
            delay.min(self.cap)
        }
    }

    /// Returns the delay for the current attempt and advances.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut b = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn zero_cap_means_uncapped() {
        let b = Backoff::new(Duration::from_millis(1), Duration::ZERO);
        assert_eq!(b.delay_for(20), Duration::from_millis(1024));
    }
}
