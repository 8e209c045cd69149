use crate::types::Notification;

/// Fixed-capacity ring buffer of the most recently sent notifications.
///
/// Both transport workers of one application record successful sends here;
/// whichever worker observes an unacknowledged closure reads back the
/// suspect window. Items are stored by value.
#[derive(Debug)]
pub struct RetryCache {
    slots: Vec<Option<Notification>>,
    /// Index of the most recently written slot. Starts at `capacity - 1`
    /// so the first write lands on slot 0.
    cursor: usize,
}

impl RetryCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "retry cache capacity must be non-zero");
        Self {
            slots: vec![None; capacity],
            cursor: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Record a successful send, advancing the cursor and overwriting the
    /// oldest entry once the buffer has wrapped.
    pub fn record(&mut self, item: Notification) {
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.slots[self.cursor] = Some(item);
    }

    /// Read back the `unsent` most recent entries, oldest of the window
    /// first. The count is clamped to capacity so a gateway reporting more
    /// in-flight items than we retain can never walk past the write cursor
    /// into slots that were already overwritten.
    pub fn read_back(&self, unsent: usize) -> Vec<Notification> {
        let capacity = self.slots.len();
        let clamped = unsent.min(capacity);
        let mut items = Vec::with_capacity(clamped);
        for i in (1..=clamped).rev() {
            let idx = (self.cursor + capacity - i + 1) % capacity;
            if let Some(item) = &self.slots[idx] {
                items.push(item.clone());
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(tag: &str) -> Notification {
        Notification::new(format!("token-{tag}"), tag)
    }

    fn alerts(items: &[Notification]) -> Vec<&str> {
        items.iter().map(|n| n.alert.as_str()).collect()
    }

    #[test]
    fn retains_only_the_last_capacity_items() {
        let mut cache = RetryCache::new(4);
        for tag in ["a", "b", "c", "d", "e", "f", "g"] {
            cache.record(note(tag));
        }
        assert_eq!(alerts(&cache.read_back(4)), vec!["d", "e", "f", "g"]);
    }

    #[test]
    fn reads_back_most_recent_k_oldest_first() {
        let mut cache = RetryCache::new(8);
        for tag in ["a", "b", "c", "d", "e"] {
            cache.record(note(tag));
        }
        assert_eq!(alerts(&cache.read_back(2)), vec!["d", "e"]);
        assert_eq!(alerts(&cache.read_back(5)), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn clamps_requests_beyond_capacity() {
        let mut cache = RetryCache::new(4);
        for tag in ["a", "b", "c", "d", "e", "f"] {
            cache.record(note(tag));
        }
        let replay = cache.read_back(10);
        assert_eq!(replay.len(), 4);
        assert_eq!(alerts(&replay), vec!["c", "d", "e", "f"]);
    }

    #[test]
    fn six_sends_closure_of_three_replays_last_three() {
        let mut cache = RetryCache::new(4);
        for tag in ["a", "b", "c", "d", "e", "f"] {
            cache.record(note(tag));
        }
        assert_eq!(alerts(&cache.read_back(3)), vec!["d", "e", "f"]);
    }

    #[test]
    fn skips_slots_never_written() {
        let mut cache = RetryCache::new(4);
        cache.record(note("a"));
        cache.record(note("b"));
        // Reported count larger than what was ever sent.
        assert_eq!(alerts(&cache.read_back(4)), vec!["a", "b"]);
    }
}
