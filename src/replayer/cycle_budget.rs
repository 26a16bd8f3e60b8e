//! Per-call cycle budget

/// Upper bound on cycles a single routine call may consume
#[derive(Debug, Clone, Copy)]
pub struct CycleBudget {
    limit: u64,
    used: u64,
}

impl CycleBudget {
    /// Fresh budget of `limit` cycles.
    pub fn new(limit: u64) -> Self {
        CycleBudget { limit, used: 0 }
    }

    /// Record `cycles` as spent.
    pub fn charge(&mut self, cycles: u32) {
        self.used += cycles as u64;
    }

    /// Cycles spent so far
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Configured limit
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Whether the limit has been reached
    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }
}
