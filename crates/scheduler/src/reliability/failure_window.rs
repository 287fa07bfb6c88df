//! Fixed-capacity ring of recent task outcomes

/// Rolling record of the last `capacity` outcomes, `true` meaning failure.
///
/// Pushing into a full window overwrites the oldest slot, so both push and
/// eviction are O(1) and the failure count is kept incrementally.
#[derive(Debug, Clone)]
pub struct FailureWindow {
    slots: Vec<bool>,
    head: usize,
    len: usize,
    failures: usize,
}

impl FailureWindow {
    /// Create an empty window. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![false; capacity.max(1)],
            head: 0,
            len: 0,
            failures: 0,
        }
    }

    /// Record one outcome, evicting the oldest when full.
    pub fn push(&mut self, failed: bool) {
        let capacity = self.slots.len();
        let index = (self.head + self.len) % capacity;

        if self.len == capacity {
            // index == head here; the slot being overwritten is the oldest
            if self.slots[index] {
                self.failures -= 1;
            }
            self.head = (self.head + 1) % capacity;
        } else {
            self.len += 1;
        }

        self.slots[index] = failed;
        if failed {
            self.failures += 1;
        }
    }

    /// Failures divided by recorded outcomes; 0.0 when empty.
    pub fn failure_rate(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.failures as f64 / self.len as f64
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.failures = 0;
    }

    /// Outcomes from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        let capacity = self.slots.len();
        (0..self.len).map(move |i| self.slots[(self.head + i) % capacity])
    }
}
