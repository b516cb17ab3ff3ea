use std::collections::VecDeque;

use alloy::primitives::U256;

/// Fixed-capacity ring of the most recent amounts with a running sum.
///
/// `total()` always equals the sum of the retained amounts. A capacity of
/// zero turns every push into a no-op.
#[derive(Debug, Clone)]
pub struct SlidingWindowAccumulator {
    capacity: usize,
    window: VecDeque<U256>,
    total: U256,
}

impl SlidingWindowAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
            total: U256::ZERO,
        }
    }

    pub fn push(&mut self, amount: U256) {
        if self.capacity == 0 {
            return;
        }

        self.window.push_back(amount);
        self.total = self.total.saturating_add(amount);

        if self.window.len() > self.capacity {
            if let Some(evicted) = self.window.pop_front() {
                self.total = self.total.saturating_sub(evicted);
            }
        }
    }

    pub fn total(&self) -> U256 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
