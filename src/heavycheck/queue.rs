// src/heavycheck/queue.rs

//! Admission budget shared by every item waiting for, or undergoing,
//! heavy verification.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Item count and total byte size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub num: u64,
    pub size: u64,
}

impl Metric {
    pub const fn new(num: u64, size: u64) -> Self {
        Self { num, size }
    }

    /// Cost of a single item of `size` bytes.
    pub const fn item(size: u64) -> Self {
        Self { num: 1, size }
    }

    fn saturating_add(self, other: Metric) -> Metric {
        Metric {
            num: self.num.saturating_add(other.num),
            size: self.size.saturating_add(other.size),
        }
    }

    fn saturating_sub(self, other: Metric) -> Metric {
        Metric {
            num: self.num.saturating_sub(other.num),
            size: self.size.saturating_sub(other.size),
        }
    }

    fn fits(&self, limit: &Metric) -> bool {
        self.num <= limit.num && self.size <= limit.size
    }
}

/// Non-blocking counting budget. Admission either succeeds immediately or
/// is refused; nothing ever waits here.
#[derive(Debug)]
pub struct TaskBudget {
    limit: Metric,
    used: Mutex<Metric>,
}

impl TaskBudget {
    pub fn new(limit: Metric) -> Arc<Self> {
        Arc::new(Self {
            limit,
            used: Mutex::new(Metric::default()),
        })
    }

    /// Charges `cost` if it fits under both bounds. The returned permit
    /// gives the cost back when dropped.
    pub fn try_acquire(self: &Arc<Self>, cost: Metric) -> Option<BudgetPermit> {
        let mut used = self.used.lock();
        let next = used.saturating_add(cost);
        if !next.fits(&self.limit) {
            return None;
        }
        *used = next;
        Some(BudgetPermit {
            budget: Arc::clone(self),
            cost,
        })
    }

    pub fn used(&self) -> Metric {
        *self.used.lock()
    }

    pub fn limit(&self) -> Metric {
        self.limit
    }

    /// True once either bound is reached.
    pub fn is_full(&self) -> bool {
        let used = self.used();
        used.num >= self.limit.num || used.size >= self.limit.size
    }

    fn release(&self, cost: Metric) {
        let mut used = self.used.lock();
        *used = used.saturating_sub(cost);
    }
}

/// A charged slice of the budget.
#[derive(Debug)]
pub struct BudgetPermit {
    budget: Arc<TaskBudget>,
    cost: Metric,
}

impl BudgetPermit {
    pub fn cost(&self) -> Metric {
        self.cost
    }
}

impl Drop for BudgetPermit {
    fn drop(&mut self) {
        self.budget.release(self.cost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_limit_backpressure() {
        let budget = TaskBudget::new(Metric::new(100, 1_000));
        let mut permits = Vec::new();
        for i in 0..10 {
            match budget.try_acquire(Metric::item(150)) {
                Some(p) => permits.push(p),
                None => {
                    assert_eq!(i, 6, "the seventh item must be the first refused");
                    break;
                }
            }
        }
        assert_eq!(permits.len(), 6);
        assert_eq!(budget.used(), Metric::new(6, 900));
        assert!(budget.try_acquire(Metric::item(150)).is_none());

        permits.pop();
        assert_eq!(budget.used(), Metric::new(5, 750));
        assert!(budget.try_acquire(Metric::item(150)).is_some());
    }

    #[test]
    fn test_count_limit() {
        let budget = TaskBudget::new(Metric::new(2, u64::MAX));
        let a = budget.try_acquire(Metric::item(1));
        let b = budget.try_acquire(Metric::item(1));
        assert!(a.is_some() && b.is_some());
        assert!(budget.is_full());
        assert!(budget.try_acquire(Metric::item(1)).is_none());
        drop(a);
        assert!(!budget.is_full());
        assert!(budget.try_acquire(Metric::item(1)).is_some());
    }
}
