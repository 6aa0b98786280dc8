//! Flow executor
//!
//! Runs a flow synchronously on the calling thread. The registry lock is only
//! held to claim the flow and to commit the outcome; agent logic runs unlocked
//! so other flows can be created and executed meanwhile.

use crate::config::ExecutorConfig;
use crate::error::{FlowError, FlowResult, StatusCode};
use crate::flow::{split_steps, FlowStatus};
use crate::registry::{FlowHandle, FlowRegistry};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a single step of agent logic sees
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub flow_name: &'a str,
    pub step: &'a str,
    /// Zero-based position of this step
    pub index: usize,
    pub total: usize,
}

/// The behavior behind a flow. Implementations must be deterministic enough
/// that a failed run can simply be retried.
pub trait AgentLogic: Send + Sync {
    fn run_step(&self, ctx: &StepContext<'_>) -> FlowResult<String>;
}

/// Default agent: records each instruction step as a transcript line
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedAgent;

impl AgentLogic for ScriptedAgent {
    fn run_step(&self, ctx: &StepContext<'_>) -> FlowResult<String> {
        Ok(format!(
            "{} [{}/{}]: {}",
            ctx.flow_name,
            ctx.index + 1,
            ctx.total,
            ctx.step
        ))
    }
}

/// Outcome of a successful `execute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub steps: usize,
    pub duration: Duration,
    /// True when the flow had already completed and nothing ran
    pub skipped: bool,
}

pub struct Executor {
    logic: Arc<dyn AgentLogic>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_logic(config, ScriptedAgent)
    }

    pub fn with_logic(config: ExecutorConfig, logic: impl AgentLogic + 'static) -> Self {
        Self {
            logic: Arc::new(logic),
            config,
        }
    }

    /// Run the flow behind `handle`.
    ///
    /// Created and Failed flows run; a Completed flow returns immediately with
    /// `skipped = true`; a Running flow yields `FlowBusy`.
    pub fn execute(
        &self,
        registry: &FlowRegistry,
        handle: FlowHandle,
    ) -> FlowResult<ExecutionReport> {
        let claimed = registry.with_flow_mut(handle, |record| match record.status {
            status if status.can_execute() => {
                record.status = FlowStatus::Running;
                Ok(Some((record.name.clone(), record.instructions.clone())))
            }
            status if status.is_terminal() => Ok(None),
            _ => Err(FlowError::FlowBusy),
        })??;

        let Some((name, instructions)) = claimed else {
            tracing::debug!("Flow {:#x} already completed, skipping", handle.to_raw());
            return Ok(ExecutionReport {
                steps: 0,
                duration: Duration::ZERO,
                skipped: true,
            });
        };

        tracing::debug!("Executing flow '{}'", name);
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(&name, &instructions)))
            .unwrap_or_else(|_| Err(FlowError::execution("agent logic panicked")));
        let duration = start.elapsed();

        // a failed run only touches status, failure_count and last_error
        registry.with_flow_mut(handle, |record| {
            match outcome {
                Ok(transcript) => {
                    let steps = transcript.len();
                    record.status = FlowStatus::Completed;
                    record.execution_count += 1;
                    record.last_duration = duration;
                    record.total_duration += duration;
                    record.steps_completed = steps as u64;
                    record.transcript = transcript;
                    record.last_error = None;
                    tracing::info!("Flow '{}' completed {} steps in {:?}", name, steps, duration);
                    Ok(ExecutionReport {
                        steps,
                        duration,
                        skipped: false,
                    })
                }
                Err(e) => {
                    record.status = FlowStatus::Failed;
                    record.failure_count += 1;
                    record.last_error = Some(e.to_string());
                    tracing::warn!("Flow '{}' failed: {}", name, e);
                    Err(e)
                }
            }
        })?
    }

    /// `execute` flattened to the status code the C ABI returns
    pub fn execute_status(&self, registry: &FlowRegistry, handle: FlowHandle) -> StatusCode {
        StatusCode::from(&self.execute(registry, handle))
    }

    fn run(&self, name: &str, instructions: &str) -> FlowResult<Vec<String>> {
        let steps = split_steps(instructions);
        if steps.len() > self.config.max_steps {
            return Err(FlowError::execution(format!(
                "{} steps exceed the limit of {}",
                steps.len(),
                self.config.max_steps
            )));
        }

        let total = steps.len();
        steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let ctx = StepContext {
                    flow_name: name,
                    step,
                    index,
                    total,
                };
                self.logic.run_step(&ctx)
            })
            .collect()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}
