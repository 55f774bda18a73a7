//! Structural generation counter.
//!
//! A model bumps its generation on every structural mutation. Derived
//! structures remember the value they were built from and compare it with
//! the live counter before use.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared handle to a model's generation counter.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    counter: Arc<AtomicU64>,
}

impl Generation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Advance the generation, returning the new value.
    pub fn bump(&self) -> u64 {
        let previous = self.counter.fetch_add(1, Ordering::AcqRel);
        previous.wrapping_add(1)
    }

    /// True if the counter still reads `built_at`.
    #[must_use]
    pub fn is_current(&self, built_at: u64) -> bool {
        self.current() == built_at
    }

    /// An independent counter starting at this one's current value.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(self.current())),
        }
    }

    /// True if both handles observe the same counter.
    #[must_use]
    pub fn same_counter(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.counter, &other.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_is_visible_through_clones() {
        let generation = Generation::new();
        let observer = generation.clone();
        assert_eq!(observer.current(), 0);

        assert_eq!(generation.bump(), 1);
        assert_eq!(observer.current(), 1);
        assert!(observer.is_current(1));
        assert!(!observer.is_current(0));
        assert!(generation.same_counter(&observer));
    }

    #[test]
    fn test_fork_starts_at_current_and_moves_alone() {
        let generation = Generation::new();
        generation.bump();
        let fork = generation.fork();

        assert_eq!(fork.current(), 1);
        assert!(!fork.same_counter(&generation));
        fork.bump();
        assert_eq!(generation.current(), 1);
        assert_eq!(fork.current(), 2);
    }

    #[test]
    fn test_independent_counters_are_distinct() {
        assert!(!Generation::new().same_counter(&Generation::new()));
    }
}
