//! Allocation strategies consulted before a flow record is created

use crate::error::{FlowError, FlowResult};

/// Decides whether the registry may hold one more live flow
pub trait AllocationStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Called with the current number of live flows; Err refuses the slot
    fn reserve(&self, live: usize) -> FlowResult<()>;
}

/// Never refuses
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl AllocationStrategy for Unbounded {
    fn name(&self) -> &str {
        "unbounded"
    }

    fn reserve(&self, _live: usize) -> FlowResult<()> {
        Ok(())
    }
}

/// Caps the number of live flows
#[derive(Debug, Clone, Copy)]
pub struct Bounded {
    capacity: usize,
}

impl Bounded {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl AllocationStrategy for Bounded {
    fn name(&self) -> &str {
        "bounded"
    }

    fn reserve(&self, live: usize) -> FlowResult<()> {
        if live >= self.capacity {
            return Err(FlowError::allocation(format!(
                "{} live flows reached capacity {}",
                live, self.capacity
            )));
        }
        Ok(())
    }
}

/// Always refuses; simulates resource exhaustion
#[derive(Debug, Clone, Copy, Default)]
pub struct Exhausted;

impl AllocationStrategy for Exhausted {
    fn name(&self) -> &str {
        "exhausted"
    }

    fn reserve(&self, _live: usize) -> FlowResult<()> {
        Err(FlowError::allocation("allocator exhausted"))
    }
}
