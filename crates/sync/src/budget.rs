//! Wall-clock budget shared by all work done in one tick.

use std::time::{Duration, Instant};

/// Deadline started once per tick.
///
/// A zero limit is exceeded immediately, so every budgeted operation defers.
#[derive(Debug, Clone, Copy)]
pub struct TickBudget {
    started: Instant,
    limit: Duration,
}

impl TickBudget {
    /// Start a budget now.
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Budget that never runs out.
    pub fn unlimited() -> Self {
        Self::start(Duration::MAX)
    }

    /// Whether the deadline has passed.
    pub fn exceeded(&self) -> bool {
        self.started.elapsed() >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_is_always_exceeded() {
        assert!(TickBudget::start(Duration::ZERO).exceeded());
    }

    #[test]
    fn unlimited_budget_never_expires() {
        assert!(!TickBudget::unlimited().exceeded());
    }
}
