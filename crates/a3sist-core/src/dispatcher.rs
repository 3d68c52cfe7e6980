//! Dispatcher
//!
//! Entry point for every request. Classifies intent with an ordered rule
//! table, derives a priority and runs the chosen action:
//!
//! | Rule (case-insensitive)   | Action      |
//! |---------------------------|-------------|
//! | `cancel` + `taskId`       | cancel      |
//! | `dispatch`                | enqueue     |
//! | `workflow`, `coordinate`  | workflow    |
//! | `status`, `check`         | status      |
//! | `retry`                   | retry       |
//! | `balance`, `load`         | rebalance   |
//! | no match, preferred agent | direct      |
//! | no match                  | enqueue     |
//!
//! The first matching rule wins. Errors and panics below the dispatcher are
//! turned into failure results; `dispatch` always returns a result.

use crate::error::{panic_reason, Error, Result, CANCELLED_CODE};
use crate::processor::TaskHandler;
use crate::queue::QueueService;
use crate::request::{AgentResult, Priority, Request, TASK_ID_KEY};
use crate::tracker::{TaskStatus, TaskTracker};
use crate::workflow::{WorkflowService, WorkflowStatus};
use futures::FutureExt;
use regex::Regex;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the dispatcher does with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchAction {
    /// Run synchronously on the agent orchestrator
    Direct,
    /// Put on the task queue
    Enqueue,
    /// Run through the workflow engine
    Workflow,
    /// Report queue statistics
    Status,
    /// Cancel a tracked task
    Cancel,
    /// Re-enqueue at high priority
    Retry,
    /// Promote aged queue items
    Rebalance,
}

impl DispatchAction {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Enqueue => "enqueue",
            Self::Workflow => "workflow",
            Self::Status => "status",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
            Self::Rebalance => "rebalance",
        }
    }
}

impl std::fmt::Display for DispatchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct IntentRule {
    pattern: Regex,
    action: DispatchAction,
    /// Context key that must be present for the rule to apply
    requires_context: Option<&'static str>,
}

static INTENT_RULES: LazyLock<Vec<IntentRule>> = LazyLock::new(|| {
    [
        (r"(?i)\bcancel", DispatchAction::Cancel, Some(TASK_ID_KEY)),
        (r"(?i)\bdispatch", DispatchAction::Enqueue, None),
        (r"(?i)\b(workflow|coordinate)", DispatchAction::Workflow, None),
        (r"(?i)\b(status|check)", DispatchAction::Status, None),
        (r"(?i)\bretry", DispatchAction::Retry, None),
        (r"(?i)\b(re)?balanc|\bload\b", DispatchAction::Rebalance, None),
    ]
    .into_iter()
    .map(|(pattern, action, requires_context)| IntentRule {
        pattern: Regex::new(pattern).expect("intent pattern is a compile-time constant"),
        action,
        requires_context,
    })
    .collect()
});

/// Choose the action for a request. Deterministic for a given prompt and
/// context.
pub fn classify(request: &Request) -> DispatchAction {
    INTENT_RULES
        .iter()
        .find(|rule| {
            rule.pattern.is_match(&request.prompt)
                && rule
                    .requires_context
                    .is_none_or(|key| request.context.contains_key(key))
        })
        .map(|rule| rule.action)
        .unwrap_or(if request.preferred_agent.is_some() {
            DispatchAction::Direct
        } else {
            DispatchAction::Enqueue
        })
}

/// Request entry point
pub struct Dispatcher {
    queue: Arc<dyn QueueService>,
    workflows: Arc<dyn WorkflowService>,
    direct: Arc<dyn TaskHandler>,
    tracker: Arc<TaskTracker>,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        queue: Arc<dyn QueueService>,
        workflows: Arc<dyn WorkflowService>,
        direct: Arc<dyn TaskHandler>,
        tracker: Arc<TaskTracker>,
    ) -> Self {
        Self {
            queue,
            workflows,
            direct,
            tracker,
        }
    }

    /// Task tracker
    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Classify and run a request
    pub async fn dispatch(&self, request: Request, cancel: &CancellationToken) -> AgentResult {
        let started = Instant::now();
        let id = request.id;
        let action = classify(&request);
        info!(task_id = %id, action = %action, "Dispatching request");

        let outcome = AssertUnwindSafe(self.execute(action, request, cancel))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_cancellation() => {
                debug!(task_id = %id, action = %action, "Dispatch cancelled");
                AgentResult::from_error(&e)
            }
            Ok(Err(e)) => {
                warn!(task_id = %id, action = %action, error = %e, "Dispatch failed");
                AgentResult::from_error(&e)
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(task_id = %id, action = %action, "Dispatch panicked: {}", reason);
                AgentResult::from_error(&Error::Internal(format!("dispatch panicked: {}", reason)))
            }
        };

        let processing_time_ms = if result.processing_time_ms > 0 {
            result.processing_time_ms
        } else {
            started.elapsed().as_millis() as u64
        };
        result
            .with_metadata("action", json!(action.as_str()))
            .with_processing_time(processing_time_ms)
    }

    async fn execute(
        &self,
        action: DispatchAction,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        if request.prompt.trim().is_empty() {
            return Err(Error::InvalidArgument("request prompt is empty".to_string()));
        }

        match action {
            DispatchAction::Direct => Ok(self.direct.handle_task(&request, cancel).await),
            DispatchAction::Enqueue => {
                let priority = Priority::from_prompt(&request.prompt);
                let id = self.enqueue(request, priority).await?;
                Ok(AgentResult::success(format!(
                    "Task {} dispatched successfully with {} priority",
                    id, priority
                ))
                .with_metadata("taskId", json!(id))
                .with_metadata("priority", json!(priority)))
            }
            DispatchAction::Retry => {
                let id = self.enqueue(request, Priority::High).await?;
                Ok(AgentResult::success(format!(
                    "Task {} queued for retry with {} priority",
                    id,
                    Priority::High
                ))
                .with_metadata("taskId", json!(id))
                .with_metadata("priority", json!(Priority::High)))
            }
            DispatchAction::Status => self.status(&request),
            DispatchAction::Cancel => self.cancel(&request),
            DispatchAction::Rebalance => {
                let promoted = self.queue.rebalance();
                Ok(AgentResult::success(format!(
                    "Load balancing completed: {} tasks promoted",
                    promoted
                ))
                .with_metadata("promoted", json!(promoted)))
            }
            DispatchAction::Workflow => self.workflow(&request, cancel).await,
        }
    }

    async fn enqueue(&self, request: Request, priority: Priority) -> Result<Uuid> {
        let id = request.id;
        self.tracker.track(id, priority);
        if let Err(e) = self.queue.enqueue(request, priority).await {
            self.tracker.remove(id);
            return Err(e);
        }
        info!(task_id = %id, priority = %priority, "Task enqueued");
        Ok(id)
    }

    fn status(&self, request: &Request) -> Result<AgentResult> {
        let stats = self.queue.statistics();
        let mut result = AgentResult::success(format!(
            "Queue status: {} queued, {} processed",
            stats.queued.total(),
            stats.total_processed
        ))
        .with_content(serde_json::to_string_pretty(&stats)?)
        .with_metadata(
            "tasks",
            json!(self
                .tracker
                .counts()
                .into_iter()
                .map(|(status, count)| (status.as_str(), count))
                .collect::<std::collections::BTreeMap<_, _>>()),
        );

        if let Some(id) = request.target_task_id() {
            let task = match self.tracker.get(id) {
                Some(snapshot) => serde_json::to_value(snapshot)?,
                None => json!(null),
            };
            result = result.with_metadata("task", task);
        }
        Ok(result)
    }

    fn cancel(&self, request: &Request) -> Result<AgentResult> {
        let id = request.target_task_id().ok_or_else(|| {
            Error::InvalidArgument(format!("'{}' is not a valid task id", TASK_ID_KEY))
        })?;

        let message = match self.tracker.status(id) {
            Some(TaskStatus::Queued) => {
                if self.queue.cancel(id) {
                    self.tracker.mark_cancelled(id);
                    format!("Task {} removed from the queue", id)
                } else if self.tracker.cancel(id) {
                    // Picked up between the status read and the queue removal
                    format!("Cancellation requested for running task {}", id)
                } else {
                    return Err(Error::TaskNotFound(id.to_string()));
                }
            }
            Some(TaskStatus::Processing) => {
                if !self.tracker.cancel(id) {
                    return Err(Error::TaskNotFound(id.to_string()));
                }
                format!("Cancellation requested for running task {}", id)
            }
            Some(status) => {
                return Err(Error::InvalidArgument(format!(
                    "task {} already {}",
                    id, status
                )));
            }
            None if self.workflows.cancel_workflow(id) => {
                format!("Cancellation requested for workflow {}", id)
            }
            None if self.queue.cancel(id) => format!("Task {} removed from the queue", id),
            None => return Err(Error::TaskNotFound(id.to_string())),
        };

        info!(task_id = %id, "{}", message);
        Ok(AgentResult::success(message).with_metadata("taskId", json!(id)))
    }

    async fn workflow(&self, request: &Request, cancel: &CancellationToken) -> Result<AgentResult> {
        let workflow = self.workflows.execute_workflow(request, cancel).await?;
        let summary = format!(
            "Workflow {}: {}/{} steps succeeded",
            workflow.status,
            workflow.succeeded(),
            workflow.steps.len()
        );

        let mut result = if workflow.success {
            AgentResult::success(summary)
        } else {
            let code = if workflow.status == WorkflowStatus::Cancelled {
                CANCELLED_CODE
            } else {
                "WORKFLOW_FAILED"
            };
            AgentResult::failure(summary, code)
        };
        if let Some(output) = workflow.final_output() {
            result = result.with_content(output);
        }
        Ok(result
            .with_metadata("workflow", serde_json::to_value(&workflow)?)
            .with_processing_time(workflow.total_time_ms))
    }
}
