//! Read-only statistics snapshots of flows

use crate::error::FlowResult;
use crate::flow::{FlowRecord, FlowStatus};
use crate::registry::{FlowHandle, FlowRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time copy of a flow's counters.
///
/// Flows that have not finished a run yet report zeros rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStats {
    pub name: String,
    pub status: FlowStatus,
    pub created_at: DateTime<Utc>,
    pub execution_count: u64,
    pub failure_count: u64,
    pub steps_completed: u64,
    pub instruction_bytes: u64,
    pub last_duration_ms: f64,
    pub total_duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl FlowStats {
    fn from_record(record: &FlowRecord) -> Self {
        Self {
            name: record.name.clone(),
            status: record.status,
            created_at: record.created_at,
            execution_count: record.execution_count,
            failure_count: record.failure_count,
            steps_completed: record.steps_completed,
            instruction_bytes: record.instructions.len() as u64,
            last_duration_ms: record.last_duration.as_secs_f64() * 1000.0,
            total_duration_ms: record.total_duration.as_secs_f64() * 1000.0,
            last_error: record.last_error.clone(),
        }
    }

    /// True once at least one run has completed successfully
    pub fn has_results(&self) -> bool {
        self.execution_count > 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub struct StatsReporter;

impl StatsReporter {
    /// Snapshot the flow behind `handle`; never mutates the record
    pub fn snapshot(registry: &FlowRegistry, handle: FlowHandle) -> FlowResult<FlowStats> {
        let stats = registry.with_flow(handle, FlowStats::from_record)?;
        tracing::debug!("Stats for '{}': {}", stats.name, stats.status);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::executor::Executor;

    #[test]
    fn test_snapshot_before_execution_has_no_results() {
        let registry = FlowRegistry::default();
        let handle = registry.create("idle", "Do things.").unwrap();

        let stats = StatsReporter::snapshot(&registry, handle).unwrap();
        assert_eq!(stats.status, FlowStatus::Created);
        assert!(!stats.has_results());
        assert_eq!(stats.steps_completed, 0);
        assert_eq!(stats.instruction_bytes, 10);
    }

    #[test]
    fn test_repeated_snapshots_are_equal() {
        let registry = FlowRegistry::default();
        let handle = registry
            .create("Research Assistant", "Help users find information.")
            .unwrap();
        Executor::default().execute(&registry, handle).unwrap();

        let first = StatsReporter::snapshot(&registry, handle).unwrap();
        let second = StatsReporter::snapshot(&registry, handle).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, FlowStatus::Completed);
        assert_eq!(first.steps_completed, 1);
    }

    #[test]
    fn test_snapshot_of_released_flow() {
        let registry = FlowRegistry::default();
        let handle = registry.create("gone", "").unwrap();
        registry.release(handle).unwrap();

        assert_eq!(
            StatsReporter::snapshot(&registry, handle),
            Err(FlowError::InvalidHandle)
        );
    }

    #[test]
    fn test_json_shape() {
        let registry = FlowRegistry::default();
        let handle = registry.create("j", "One.").unwrap();
        Executor::default().execute(&registry, handle).unwrap();

        let json = StatsReporter::snapshot(&registry, handle)
            .unwrap()
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["execution_count"], 1);
        assert!(value.get("last_error").is_none());
    }
}
