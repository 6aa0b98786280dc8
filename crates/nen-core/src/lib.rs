//! nen-core: agent-flow engine behind a stable C ABI
//!
//! Provides:
//! - Flow registry (generational handle table)
//! - Synchronous flow executor with pluggable agent logic
//! - Stats snapshots
//! - Configuration loading (nen.toml)
//! - `extern "C"` surface built into libnen

pub mod allocator;
pub mod config;
pub mod error;
pub mod executor;
pub mod ffi;
pub mod flow;
pub mod logging;
pub mod registry;
pub mod stats;

pub use allocator::{AllocationStrategy, Bounded, Exhausted, Unbounded};
pub use config::Config;
pub use error::{FlowError, FlowResult, StatusCode};
pub use executor::{AgentLogic, ExecutionReport, Executor, ScriptedAgent, StepContext};
pub use flow::{FlowRecord, FlowStatus};
pub use logging::init_logging;
pub use registry::{FlowHandle, FlowRegistry};
pub use stats::{FlowStats, StatsReporter};
