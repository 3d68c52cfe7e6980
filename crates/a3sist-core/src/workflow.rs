//! Workflow Engine
//!
//! Runs a multi-step plan as one unit of work. A plan is a list of steps,
//! each bound to an agent and a stage:
//!
//! ```text
//! stage 0: [analyze] [lint]      ── run concurrently
//!                │
//!                ▼ previousResult
//! stage 1: [refactor]
//!                │
//!                ▼ previousResult
//! stage 2: [test]
//! ```
//!
//! Every step runs `Pending → Processing → Completed | Failed | Cancelled`.
//! A failed step is retried while its budget lasts. Cancelling a workflow
//! stops scheduling; steps already processing finish and pending ones are
//! marked cancelled.

use crate::agents::AgentRegistry;
use crate::error::{Error, Result};
use crate::processor::TaskHandler;
use crate::request::{AgentResult, Request};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Context key holding an explicit plan
pub const WORKFLOW_KEY: &str = "workflow";

/// Context key carrying the previous stage's output into the next stage
pub const PREVIOUS_RESULT_KEY: &str = "previousResult";

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Retries for steps that do not set their own
    #[serde(default = "default_retries")]
    pub default_retries: u32,
    /// Pause before retrying a failed step
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Stop scheduling later stages once a step has failed
    #[serde(default)]
    pub stop_on_failure: bool,
}

fn default_retries() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            stop_on_failure: false,
        }
    }
}

impl WorkflowConfig {
    /// Set the default retry budget
    #[must_use]
    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    /// Set the retry delay
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Stop after the first failed stage
    #[must_use]
    pub fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Status of a workflow or one of its steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Not started
    Pending,
    /// Running
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with a failure
    Failed,
    /// Stopped before finishing
    Cancelled,
}

impl WorkflowStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name, unique within the plan
    pub name: String,
    /// Agent that runs the step
    pub agent: String,
    /// Stage index; equal stages run concurrently
    #[serde(default)]
    pub stage: u32,
    /// Retry budget; the engine default when absent
    #[serde(default)]
    pub retries: Option<u32>,
}

impl WorkflowStep {
    /// Create a step
    pub fn new(name: impl Into<String>, agent: impl Into<String>, stage: u32) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            stage,
            retries: None,
        }
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// An executable plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    /// Steps in declaration order
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowPlan {
    /// Build and validate a plan
    pub fn new(steps: Vec<WorkflowStep>) -> Result<Self> {
        let plan = Self { steps };
        plan.validate()?;
        Ok(plan)
    }

    /// The plan for a request: the `workflow` context entry if present,
    /// otherwise one stage per matching agent, heaviest first.
    ///
    /// # Errors
    ///
    /// `Workflow` when the plan is malformed or nothing matches.
    pub fn from_request(request: &Request, registry: &AgentRegistry) -> Result<Self> {
        if let Some(value) = request.context.get(WORKFLOW_KEY) {
            let plan: Self = serde_json::from_value(value.clone())
                .map_err(|e| Error::Workflow(format!("invalid workflow plan: {}", e)))?;
            plan.validate()?;
            return Ok(plan);
        }

        let mut matches = registry.find(|e| e.capabilities.matches(request));
        matches.sort_by(|a, b| {
            b.capabilities
                .priority_weight
                .cmp(&a.capabilities.priority_weight)
                .then_with(|| a.name.cmp(&b.name))
        });
        let steps = matches
            .into_iter()
            .zip(0u32..)
            .map(|(entry, stage)| WorkflowStep::new(entry.name.clone(), entry.name, stage))
            .collect();
        Self::new(steps)
    }

    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Workflow("workflow has no steps".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() || step.agent.trim().is_empty() {
                return Err(Error::Workflow(
                    "workflow steps need a name and an agent".to_string(),
                ));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(Error::Workflow(format!("duplicate step '{}'", step.name)));
            }
        }
        Ok(())
    }

    /// Step indices grouped by stage, in stage order
    pub fn stages(&self) -> Vec<Vec<usize>> {
        let mut stages: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            stages.entry(step.stage).or_default().push(index);
        }
        stages.into_values().collect()
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Step name
    pub name: String,
    /// Agent that ran it
    pub agent: String,
    /// Final status
    pub status: WorkflowStatus,
    /// Whether the step succeeded
    pub success: bool,
    /// Result of the last attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    /// Attempts made
    pub attempts: u32,
    /// Time spent across attempts
    pub execution_time_ms: u64,
    /// When the first attempt started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached its final status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    fn pending(step: &WorkflowStep) -> Self {
        Self {
            name: step.name.clone(),
            agent: step.agent.clone(),
            status: WorkflowStatus::Pending,
            success: false,
            result: None,
            attempts: 0,
            execution_time_ms: 0,
            started_at: None,
            completed_at: None,
        }
    }

    fn finish(&mut self, status: WorkflowStatus, result: AgentResult, started: Instant) {
        self.status = status;
        self.success = status == WorkflowStatus::Completed;
        self.result = Some(result);
        self.execution_time_ms = started.elapsed().as_millis() as u64;
        self.completed_at = Some(Utc::now());
    }
}

/// Aggregate outcome of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    /// Workflow id (the id of the request that started it)
    pub workflow_id: Uuid,
    /// Final status
    pub status: WorkflowStatus,
    /// True only when every step succeeded
    pub success: bool,
    /// Step outcomes in plan order
    pub steps: Vec<StepResult>,
    /// Wall time of the whole workflow
    pub total_time_ms: u64,
}

impl WorkflowResult {
    /// Number of steps that succeeded
    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }

    /// Output of the last stage that produced any
    pub fn final_output(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .filter(|s| s.success)
            .find_map(|s| s.result.as_ref().and_then(|r| r.content.as_deref()))
    }
}

/// Workflow service contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Plan and run a workflow for `request`
    async fn execute_workflow(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult>;

    /// Cancel a running workflow; returns whether it was running
    fn cancel_workflow(&self, id: Uuid) -> bool;
}

/// Removes a workflow from the running table when it ends or is dropped
struct Running<'a> {
    table: &'a DashMap<Uuid, CancellationToken>,
    id: Uuid,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

/// Runs workflow plans through a [`TaskHandler`]
pub struct WorkflowEngine {
    handler: Arc<dyn TaskHandler>,
    registry: Arc<AgentRegistry>,
    running: DashMap<Uuid, CancellationToken>,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    /// Create an engine
    pub fn new(
        handler: Arc<dyn TaskHandler>,
        registry: Arc<AgentRegistry>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            handler,
            registry,
            running: DashMap::new(),
            config,
        }
    }

    /// Ids of running workflows
    pub fn running(&self) -> Vec<Uuid> {
        self.running.iter().map(|e| *e.key()).collect()
    }

    /// Run an already built plan
    pub async fn run_plan(
        &self,
        request: &Request,
        plan: &WorkflowPlan,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        let workflow_id = request.id;
        let token = cancel.child_token();
        self.running.insert(workflow_id, token.clone());
        let _running = Running {
            table: &self.running,
            id: workflow_id,
        };

        let started = Instant::now();
        let stages = plan.stages();
        info!(
            workflow_id = %workflow_id,
            steps = plan.steps.len(),
            stages = stages.len(),
            "Workflow started"
        );

        let mut steps: Vec<StepResult> = plan.steps.iter().map(StepResult::pending).collect();
        let mut previous: Option<String> = None;

        for stage in stages {
            if token.is_cancelled() {
                debug!(workflow_id = %workflow_id, "Workflow cancelled, not scheduling further stages");
                break;
            }
            if self.config.stop_on_failure
                && steps.iter().any(|s| s.status == WorkflowStatus::Failed)
            {
                debug!(workflow_id = %workflow_id, "Stopping after failed stage");
                break;
            }

            let runs = stage.iter().map(|&index| {
                self.run_step(request, &plan.steps[index], previous.as_deref(), &token)
            });
            let outcomes = join_all(runs).await;

            let mut outputs = Vec::new();
            for (&index, outcome) in stage.iter().zip(outcomes) {
                if outcome.success {
                    if let Some(content) = outcome.result.as_ref().and_then(|r| r.content.clone()) {
                        outputs.push(content);
                    }
                }
                steps[index] = outcome;
            }
            if !outputs.is_empty() {
                previous = Some(outputs.join("\n\n"));
            }
        }

        for step in &mut steps {
            if step.status == WorkflowStatus::Pending {
                step.status = WorkflowStatus::Cancelled;
            }
        }

        // A cancel that lands after every step succeeded changes nothing
        let status = if steps.iter().all(|s| s.success) {
            WorkflowStatus::Completed
        } else if token.is_cancelled() {
            WorkflowStatus::Cancelled
        } else if steps.iter().any(|s| s.status == WorkflowStatus::Failed) {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Cancelled
        };

        let result = WorkflowResult {
            workflow_id,
            status,
            success: status == WorkflowStatus::Completed,
            steps,
            total_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            workflow_id = %workflow_id,
            status = %result.status,
            succeeded = result.succeeded(),
            total = result.steps.len(),
            total_time_ms = result.total_time_ms,
            "Workflow finished"
        );
        result
    }

    async fn run_step(
        &self,
        request: &Request,
        step: &WorkflowStep,
        previous: Option<&str>,
        workflow: &CancellationToken,
    ) -> StepResult {
        let mut record = StepResult::pending(step);
        let budget = step.retries.unwrap_or(self.config.default_retries);
        let step_request = step_request(request, step, previous);
        // Steps in flight finish even if the workflow is cancelled
        let attempt_token = CancellationToken::new();

        let started = Instant::now();
        record.started_at = Some(Utc::now());
        record.status = WorkflowStatus::Processing;

        loop {
            record.attempts += 1;
            debug!(step = %step.name, agent = %step.agent, attempt = record.attempts, "Running step");
            let result = self.handler.handle_task(&step_request, &attempt_token).await;

            if result.success {
                record.finish(WorkflowStatus::Completed, result, started);
                break;
            }
            if result.is_cancelled() {
                debug!(step = %step.name, "Step cancelled");
                record.finish(WorkflowStatus::Cancelled, result, started);
                break;
            }
            if record.attempts > budget {
                warn!(
                    step = %step.name,
                    agent = %step.agent,
                    attempts = record.attempts,
                    "Step failed: {}",
                    result.message
                );
                record.finish(WorkflowStatus::Failed, result, started);
                break;
            }

            debug!(
                step = %step.name,
                retries_remaining = budget + 1 - record.attempts,
                "Step failed, retrying"
            );
            record.status = WorkflowStatus::Pending;
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay()) => {
                    record.status = WorkflowStatus::Processing;
                }
                _ = workflow.cancelled() => {
                    debug!(step = %step.name, "Workflow cancelled before retry");
                    record.finish(WorkflowStatus::Cancelled, result, started);
                    break;
                }
            }
        }
        record
    }
}

fn step_request(request: &Request, step: &WorkflowStep, previous: Option<&str>) -> Request {
    let mut step_request = Request::new(request.prompt.clone()).with_preferred_agent(step.agent.clone());
    step_request.content = request.content.clone();
    step_request.file_path = request.file_path.clone();
    step_request.context = request.context.clone();
    step_request.context.remove(WORKFLOW_KEY);
    step_request
        .context
        .insert("workflowId".to_string(), json!(request.id.to_string()));
    step_request
        .context
        .insert("workflowStep".to_string(), json!(step.name));
    if let Some(previous) = previous {
        step_request
            .context
            .insert(PREVIOUS_RESULT_KEY.to_string(), json!(previous));
    }
    step_request
}

#[async_trait]
impl WorkflowService for WorkflowEngine {
    async fn execute_workflow(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult> {
        let plan = WorkflowPlan::from_request(request, &self.registry)?;
        Ok(self.run_plan(request, &plan, cancel).await)
    }

    fn cancel_workflow(&self, id: Uuid) -> bool {
        match self.running.get(&id) {
            Some(token) => {
                token.cancel();
                info!(workflow_id = %id, "Workflow cancellation requested");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests;
