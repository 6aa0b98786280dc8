//! Flow registry: a generational handle table owning every flow record

use crate::allocator::{AllocationStrategy, Bounded};
use crate::config::Config;
use crate::error::{FlowError, FlowResult};
use crate::flow::{FlowRecord, FlowStatus};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Opaque reference to a flow record.
///
/// A handle stays valid until the flow is released; after that the slot's
/// generation moves on and the old handle is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowHandle {
    index: u32,
    generation: u32,
}

impl FlowHandle {
    /// Raw encoding; never 0, so 0 can serve as the null sentinel
    pub fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64 + 1)
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        let low = (raw & 0xFFFF_FFFF) as u32;
        if low == 0 {
            return None;
        }
        Some(Self {
            index: low - 1,
            generation: (raw >> 32) as u32,
        })
    }

    pub fn index(self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    record: Option<FlowRecord>,
}

#[derive(Debug, Default)]
struct Table {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Table {
    fn get(&self, handle: FlowHandle) -> Option<&FlowRecord> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_ref())
    }

    fn get_mut(&mut self, handle: FlowHandle) -> Option<&mut FlowRecord> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_mut())
    }
}

/// Owns all flow records; callers only ever hold handles
pub struct FlowRegistry {
    table: Mutex<Table>,
    default_strategy: Box<dyn AllocationStrategy>,
    config: Config,
}

impl FlowRegistry {
    /// Registry whose default strategy is bounded by `registry.max_live_flows`
    pub fn new(config: Config) -> Self {
        let strategy = Bounded::new(config.registry.max_live_flows);
        Self::with_strategy(config, strategy)
    }

    pub fn with_strategy(config: Config, strategy: impl AllocationStrategy + 'static) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            default_strategy: Box::new(strategy),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a flow using the registry's default allocation strategy
    pub fn create(&self, name: &str, instructions: &str) -> FlowResult<FlowHandle> {
        self.create_with(name, instructions, self.default_strategy.as_ref())
    }

    /// Create a flow, asking `strategy` for permission first
    pub fn create_with(
        &self,
        name: &str,
        instructions: &str,
        strategy: &dyn AllocationStrategy,
    ) -> FlowResult<FlowHandle> {
        let mut table = self.table.lock();

        if let Err(e) = strategy.reserve(table.live) {
            tracing::warn!("Refused flow '{}' ({}): {}", name, strategy.name(), e);
            return Err(e);
        }

        let record = FlowRecord::new(name, instructions);
        let handle = match table.free.pop() {
            Some(index) => {
                let slot = &mut table.slots[index as usize];
                slot.record = Some(record);
                FlowHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(table.slots.len())
                    .ok()
                    .filter(|i| *i < u32::MAX)
                    .ok_or_else(|| FlowError::allocation("handle table is full"))?;
                table.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                FlowHandle {
                    index,
                    generation: 0,
                }
            }
        };
        table.live += 1;

        tracing::debug!(
            "Created flow '{}' as {:#x} ({} live)",
            name,
            handle.to_raw(),
            table.live
        );
        Ok(handle)
    }

    /// Drop the record behind `handle`; the handle is dead afterwards.
    ///
    /// Running flows cannot be released.
    pub fn release(&self, handle: FlowHandle) -> FlowResult<()> {
        let mut table = self.table.lock();
        let slot = table
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.record.is_some())
            .ok_or(FlowError::InvalidHandle)?;

        if slot.record.as_ref().map(|r| r.status) == Some(FlowStatus::Running) {
            return Err(FlowError::FlowBusy);
        }

        slot.record = None;
        slot.generation = slot.generation.wrapping_add(1);
        table.free.push(handle.index);
        table.live -= 1;

        tracing::debug!("Released flow {:#x}", handle.to_raw());
        Ok(())
    }

    /// Read a record under the table lock.
    ///
    /// The lock is not reentrant: `f` must not call back into this registry
    /// or it deadlocks. `{:?}` on the registry is the one exception; it shows
    /// `live: "<locked>"` instead of waiting.
    pub fn with_flow<R>(
        &self,
        handle: FlowHandle,
        f: impl FnOnce(&FlowRecord) -> R,
    ) -> FlowResult<R> {
        let table = self.table.lock();
        table.get(handle).map(f).ok_or(FlowError::InvalidHandle)
    }

    /// Mutate a record under the table lock. Status transitions belong to the
    /// executor, so this stays crate-private.
    ///
    /// Same locking rule as [`with_flow`](Self::with_flow): `f` must not call
    /// back into this registry.
    pub(crate) fn with_flow_mut<R>(
        &self,
        handle: FlowHandle,
        f: impl FnOnce(&mut FlowRecord) -> R,
    ) -> FlowResult<R> {
        let mut table = self.table.lock();
        table.get_mut(handle).map(f).ok_or(FlowError::InvalidHandle)
    }

    pub fn status(&self, handle: FlowHandle) -> FlowResult<FlowStatus> {
        self.with_flow(handle, |record| record.status)
    }

    pub fn contains(&self, handle: FlowHandle) -> bool {
        self.table.lock().get(handle).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.table.lock().live
    }

    /// Handles of every live flow, in slot order
    pub fn handles(&self) -> Vec<FlowHandle> {
        let table = self.table.lock();
        table
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.record.is_some())
            .map(|(index, slot)| FlowHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new(Config::default_minimal())
    }
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("FlowRegistry");
        match self.table.try_lock() {
            Some(table) => s.field("live", &table.live),
            None => s.field("live", &"<locked>"),
        };
        s.field("strategy", &self.default_strategy.name()).finish()
    }
}

static GLOBAL: Lazy<FlowRegistry> = Lazy::new(|| {
    let config = Config::try_load().unwrap_or_else(Config::default_minimal);
    FlowRegistry::new(config)
});

/// Process-wide registry behind the C ABI
pub fn global() -> &'static FlowRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{Exhausted, Unbounded};
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_handle_raw_roundtrip_is_never_null() {
        let handle = FlowHandle {
            index: 0,
            generation: 0,
        };
        assert_ne!(handle.to_raw(), 0);
        assert_eq!(FlowHandle::from_raw(handle.to_raw()), Some(handle));
        assert_eq!(FlowHandle::from_raw(0), None);
    }

    #[test]
    fn test_create_and_read() {
        let registry = FlowRegistry::default();
        let handle = registry.create("Research Assistant", "Help users.").unwrap();

        let name = registry.with_flow(handle, |r| r.name.clone()).unwrap();
        assert_eq!(name, "Research Assistant");
        assert_eq!(registry.status(handle).unwrap(), FlowStatus::Created);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_empty_strings_accepted() {
        let registry = FlowRegistry::default();
        assert!(registry.create("", "").is_ok());
    }

    #[test]
    fn test_handles_are_unique() {
        let registry = FlowRegistry::default();
        let handles: HashSet<_> = (0..100)
            .map(|i| registry.create(&format!("flow-{i}"), "").unwrap())
            .collect();
        assert_eq!(handles.len(), 100);
    }

    #[test]
    fn test_released_handle_is_rejected_after_slot_reuse() {
        let registry = FlowRegistry::default();
        let old = registry.create("old", "").unwrap();
        registry.release(old).unwrap();

        let new = registry.create("new", "").unwrap();
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);

        assert_eq!(registry.status(old), Err(FlowError::InvalidHandle));
        assert_eq!(registry.release(old), Err(FlowError::InvalidHandle));
        assert_eq!(registry.status(new).unwrap(), FlowStatus::Created);
    }

    #[test]
    fn test_never_issued_handle_is_rejected() {
        let registry = FlowRegistry::default();
        let bogus = FlowHandle::from_raw(0xdead_0000_0042).unwrap();
        assert!(!registry.contains(bogus));
        assert_eq!(registry.status(bogus), Err(FlowError::InvalidHandle));
    }

    #[test]
    fn test_default_strategy_capacity() {
        let mut config = Config::default_minimal();
        config.registry.max_live_flows = 2;
        let registry = FlowRegistry::new(config);

        let a = registry.create("a", "").unwrap();
        registry.create("b", "").unwrap();
        assert!(matches!(
            registry.create("c", ""),
            Err(FlowError::AllocationFailed { .. })
        ));

        registry.release(a).unwrap();
        assert!(registry.create("c", "").is_ok());
    }

    #[test]
    fn test_exhausted_strategy_creates_nothing() {
        let registry = FlowRegistry::default();
        assert!(registry.create_with("x", "", &Exhausted).is_err());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_running_flow_cannot_be_released() {
        let registry = FlowRegistry::default();
        let handle = registry.create("busy", "").unwrap();
        registry
            .with_flow_mut(handle, |r| r.status = FlowStatus::Running)
            .unwrap();

        assert_eq!(registry.release(handle), Err(FlowError::FlowBusy));
    }

    #[test]
    fn test_debug_inside_with_flow_does_not_block() {
        let registry = FlowRegistry::default();
        let handle = registry.create("a", "").unwrap();

        let inside = registry.with_flow(handle, |_| format!("{:?}", registry)).unwrap();
        assert!(inside.contains("<locked>"));

        let outside = format!("{:?}", registry);
        assert!(outside.contains("live: 1"));
    }

    #[test]
    fn test_handles_lists_live_flows() {
        let registry = FlowRegistry::default();
        let a = registry.create("a", "").unwrap();
        let b = registry.create("b", "").unwrap();
        registry.release(a).unwrap();

        assert_eq!(registry.handles(), vec![b]);
    }

    #[test]
    fn test_concurrent_creates_are_unique() {
        let registry = Arc::new(FlowRegistry::with_strategy(
            Config::default_minimal(),
            Unbounded,
        ));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| registry.create(&format!("{t}-{i}"), "").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let all: HashSet<_> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        assert_eq!(all.len(), 400);
        assert_eq!(registry.live_count(), 400);
    }
}
