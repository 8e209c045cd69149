use std::time::Duration;

/// Exponential backoff with a fixed doubling factor and a hard ceiling.
///
/// The same quantum serves two purposes: it throttles reconnect attempts
/// and bounds each send attempt to the gateway, so a distressed gateway
/// automatically slows the worker down instead of blocking it.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// The current delay quantum.
    pub fn delay(&self) -> Duration {
        self.current
    }

    /// Double the quantum, capped at the ceiling.
    pub fn on_failure(&mut self) {
        self.current = (self.current * 2).min(self.ceiling);
    }

    /// Reset to the floor after any fully successful send.
    pub fn on_success(&mut self) {
        self.current = self.floor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn doubles_from_floor_and_caps_at_ceiling() {
        let mut backoff = Backoff::new(secs(1), secs(128));
        for k in 0..12u32 {
            let expected = secs(1 << k).min(secs(128));
            assert_eq!(backoff.delay(), expected, "after {k} failures");
            backoff.on_failure();
        }
        assert_eq!(backoff.delay(), secs(128));
    }

    #[test]
    fn success_resets_to_floor_from_any_state() {
        let mut backoff = Backoff::new(secs(1), secs(128));
        backoff.on_success();
        assert_eq!(backoff.delay(), secs(1));

        for _ in 0..9 {
            backoff.on_failure();
        }
        backoff.on_success();
        assert_eq!(backoff.delay(), secs(1));
    }

    #[test]
    fn three_closures_without_success_walk_floor_2x_4x() {
        let mut backoff = Backoff::new(secs(1), secs(128));
        let mut observed = Vec::new();
        for _ in 0..3 {
            observed.push(backoff.delay());
            backoff.on_failure();
        }
        assert_eq!(observed, vec![secs(1), secs(2), secs(4)]);
    }
}
