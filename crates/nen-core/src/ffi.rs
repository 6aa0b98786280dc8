//! C ABI
//!
//! Flows cross the boundary as `*mut NenFlow`. The pointer value is an encoded
//! [`FlowHandle`], not an address, so a stale or forged pointer is rejected by
//! the registry instead of being dereferenced. Failures are reported only as
//! sentinels (null or a non-zero status); `nen_last_error_message` carries the
//! detail. No panic unwinds out of an exported function.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("the nen C ABI encodes flow handles in 64-bit pointers");

use crate::allocator::{AllocationStrategy, Bounded, Exhausted, Unbounded};
use crate::error::{FlowError, FlowResult, StatusCode};
use crate::executor::Executor;
use crate::logging;
use crate::registry::{self, FlowHandle};
use crate::stats::{FlowStats, StatsReporter};
use libc::{c_char, c_int, size_t};
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

/// Opaque flow type; only ever seen behind a pointer
#[repr(C)]
pub struct NenFlow {
    _private: [u8; 0],
}

/// Allocation strategy chosen by the caller of `nen_create_agent_flow`
pub struct NenAllocator {
    strategy: Box<dyn AllocationStrategy>,
}

/// Stats record handed to C callers; free with `nen_free_stats`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NenFlowStats {
    /// 0 created, 1 running, 2 completed, 3 failed
    pub status: c_int,
    pub execution_count: u64,
    pub failure_count: u64,
    pub steps_completed: u64,
    pub instruction_bytes: u64,
    pub last_duration_ms: f64,
    pub total_duration_ms: f64,
}

impl From<&FlowStats> for NenFlowStats {
    fn from(stats: &FlowStats) -> Self {
        Self {
            status: stats.status.as_raw(),
            execution_count: stats.execution_count,
            failure_count: stats.failure_count,
            steps_completed: stats.steps_completed,
            instruction_bytes: stats.instruction_bytes,
            last_duration_ms: stats.last_duration_ms,
            total_duration_ms: stats.total_duration_ms,
        }
    }
}

static EXECUTOR: Lazy<Executor> =
    Lazy::new(|| Executor::new(registry::global().config().executor.clone()));

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: String) {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Run `f`, turning errors and panics into `fallback`
fn guard<T>(what: &str, fallback: T, f: impl FnOnce() -> FlowResult<T>) -> T {
    guard_with(what, |_| fallback, f)
}

/// Run `f` for a status-returning export; errors map to their own code and
/// panics to `Internal`
fn guard_status(what: &str, f: impl FnOnce() -> FlowResult<()>) -> c_int {
    let code = guard_with(
        what,
        |err| err.map_or(StatusCode::Internal, FlowError::status_code),
        || f().map(|()| StatusCode::Success),
    );
    code.as_raw()
}

fn guard_with<T>(
    what: &str,
    on_failure: impl FnOnce(Option<&FlowError>) -> T,
    f: impl FnOnce() -> FlowResult<T>,
) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            tracing::debug!("{} failed: {}", what, e);
            set_last_error(format!("{}: {}", what, e));
            on_failure(Some(&e))
        }
        Err(_) => {
            tracing::error!("{} panicked", what);
            set_last_error(format!("{}: internal panic", what));
            on_failure(None)
        }
    }
}

fn handle_from_ptr(flow: *const NenFlow) -> FlowResult<FlowHandle> {
    FlowHandle::from_raw(flow as usize as u64).ok_or(FlowError::InvalidHandle)
}

fn handle_to_ptr(handle: FlowHandle) -> *mut NenFlow {
    handle.to_raw() as usize as *mut NenFlow
}

/// Borrow a NUL-terminated UTF-8 string
///
/// # Safety
/// `ptr` must be null or point at a NUL-terminated string that outlives `'a`.
unsafe fn read_str<'a>(ptr: *const c_char, what: &str) -> FlowResult<&'a str> {
    if ptr.is_null() {
        return Err(FlowError::invalid_input(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| FlowError::invalid_input(format!("{} is not valid UTF-8", what)))
}

/// Create a flow. Returns null on failure.
///
/// A null `allocator` uses the registry's configured default.
///
/// # Safety
/// `allocator` must be null or come from a `nen_allocator_*` constructor and
/// not yet be freed. `name` and `instructions` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn nen_create_agent_flow(
    allocator: *const NenAllocator,
    name: *const c_char,
    instructions: *const c_char,
) -> *mut NenFlow {
    guard("create_agent_flow", ptr::null_mut(), || {
        let name = read_str(name, "name")?;
        let instructions = read_str(instructions, "instructions")?;
        let registry = registry::global();

        let handle = match allocator.as_ref() {
            Some(allocator) => {
                registry.create_with(name, instructions, allocator.strategy.as_ref())?
            }
            None => registry.create(name, instructions)?,
        };
        Ok(handle_to_ptr(handle))
    })
}

/// Execute a flow; 0 on success, non-zero otherwise
#[no_mangle]
pub extern "C" fn nen_execute_flow(flow: *mut NenFlow) -> c_int {
    guard_status("execute_flow", || {
        let handle = handle_from_ptr(flow)?;
        EXECUTOR.execute(registry::global(), handle)?;
        Ok(())
    })
}

/// Snapshot a flow's stats. Null on failure; free with `nen_free_stats`.
#[no_mangle]
pub extern "C" fn nen_get_flow_stats(flow: *mut NenFlow) -> *mut NenFlowStats {
    guard("get_flow_stats", ptr::null_mut(), || {
        let handle = handle_from_ptr(flow)?;
        let stats = StatsReporter::snapshot(registry::global(), handle)?;
        Ok(Box::into_raw(Box::new(NenFlowStats::from(&stats))))
    })
}

/// Free a record from `nen_get_flow_stats`. Null is ignored.
///
/// # Safety
/// `stats` must be null or a pointer returned by `nen_get_flow_stats` that
/// has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn nen_free_stats(stats: *mut NenFlowStats) {
    if !stats.is_null() {
        drop(Box::from_raw(stats));
    }
}

/// Stats as a JSON string. Null on failure; free with `nen_string_free`.
#[no_mangle]
pub extern "C" fn nen_flow_stats_json(flow: *mut NenFlow) -> *mut c_char {
    guard("flow_stats_json", ptr::null_mut(), || {
        let handle = handle_from_ptr(flow)?;
        let json = StatsReporter::snapshot(registry::global(), handle)?
            .to_json()
            .map_err(|_| FlowError::StatsUnavailable)?;
        let json = CString::new(json).map_err(|_| FlowError::StatsUnavailable)?;
        Ok(json.into_raw())
    })
}

/// Free a string returned by this library. Null is ignored.
///
/// # Safety
/// `s` must be null or a string returned by `nen_flow_stats_json` that has
/// not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn nen_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Release a flow; its pointer is invalid afterwards
#[no_mangle]
pub extern "C" fn nen_release_flow(flow: *mut NenFlow) -> c_int {
    guard_status("release_flow", || registry::global().release(handle_from_ptr(flow)?))
}

/// Current status (0 created, 1 running, 2 completed, 3 failed) or -1
#[no_mangle]
pub extern "C" fn nen_flow_status(flow: *mut NenFlow) -> c_int {
    guard("flow_status", -1, || {
        let status = registry::global().status(handle_from_ptr(flow)?)?;
        Ok(status.as_raw())
    })
}

/// Number of live flows in the process registry
#[no_mangle]
pub extern "C" fn nen_live_flow_count() -> size_t {
    guard("live_flow_count", 0, || Ok(registry::global().live_count()))
}

fn allocator_ptr(strategy: impl AllocationStrategy + 'static) -> *mut NenAllocator {
    Box::into_raw(Box::new(NenAllocator {
        strategy: Box::new(strategy),
    }))
}

#[no_mangle]
pub extern "C" fn nen_allocator_unbounded() -> *mut NenAllocator {
    allocator_ptr(Unbounded)
}

/// Allocator that refuses once `capacity` flows are live
#[no_mangle]
pub extern "C" fn nen_allocator_bounded(capacity: size_t) -> *mut NenAllocator {
    allocator_ptr(Bounded::new(capacity))
}

/// Allocator that refuses every request
#[no_mangle]
pub extern "C" fn nen_allocator_exhausted() -> *mut NenAllocator {
    allocator_ptr(Exhausted)
}

/// # Safety
/// `allocator` must be null or come from a `nen_allocator_*` constructor and
/// not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn nen_allocator_free(allocator: *mut NenAllocator) {
    if !allocator.is_null() {
        drop(Box::from_raw(allocator));
    }
}

/// Install a stderr logger. A null `filter` uses the configured filter.
/// Returns 0 when installed or already present, non-zero on a bad filter.
///
/// # Safety
/// `filter` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn nen_init_logging(filter: *const c_char) -> c_int {
    guard_status("init_logging", || {
        let filter = if filter.is_null() {
            registry::global().config().logging.filter.clone()
        } else {
            read_str(filter, "filter")?.to_string()
        };
        logging::init_logging(&filter).map_err(|e| FlowError::invalid_input(format!("{:#}", e)))?;
        Ok(())
    })
}

/// Message of the last failure on this thread, or null.
///
/// The pointer stays valid until the next failing call on the same thread.
#[no_mangle]
pub extern "C" fn nen_last_error_message() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}
