//! Cooperative time budget for a tick.

use std::time::{Duration, Instant};

use crate::lock::InterfaceLock;

/// Why a tick stopped before running out of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyExit {
    /// The time budget ran out.
    Deadline,
    /// A priority caller is waiting on the interface lock.
    PriorityWaiter,
}

/// Checks the clock and the lock's priority waiters every `check_interval`
/// items, so the common path is a counter increment.
#[derive(Debug)]
pub struct TickBudget {
    deadline: Option<Instant>,
    check_interval: u32,
    counter: u32,
    exit: Option<EarlyExit>,
}

impl TickBudget {
    /// A budget of `budget` starting now. `None` never runs out of time.
    pub fn new(budget: Option<Duration>, check_interval: u32) -> Self {
        Self {
            deadline: budget.map(|b| Instant::now() + b),
            check_interval: check_interval.max(1),
            counter: 0,
            exit: None,
        }
    }

    /// Count one item of work and report whether the tick should stop.
    pub fn should_exit_early<T>(&mut self, lock: &InterfaceLock<T>) -> bool {
        if self.exit.is_some() {
            return true;
        }
        self.counter = self.counter.wrapping_add(1);
        if self.counter % self.check_interval != 0 {
            return false;
        }
        if lock.has_priority_waiters() {
            self.exit = Some(EarlyExit::PriorityWaiter);
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.exit = Some(EarlyExit::Deadline);
        }
        self.exit.is_some()
    }

    /// Reason the tick stopped early, if it did.
    pub fn exit_reason(&self) -> Option<EarlyExit> {
        self.exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_exits() {
        let lock = InterfaceLock::new(());
        let mut budget = TickBudget::new(None, 4);
        for _ in 0..1000 {
            assert!(!budget.should_exit_early(&lock));
        }
        assert_eq!(budget.exit_reason(), None);
    }

    #[test]
    fn test_deadline_checked_sparsely() {
        let lock = InterfaceLock::new(());
        let mut budget = TickBudget::new(Some(Duration::ZERO), 3);
        assert!(!budget.should_exit_early(&lock));
        assert!(!budget.should_exit_early(&lock));
        assert!(budget.should_exit_early(&lock));
        assert_eq!(budget.exit_reason(), Some(EarlyExit::Deadline));
        // Sticky once tripped.
        assert!(budget.should_exit_early(&lock));
    }
}
