//! Task Processor
//!
//! Drains the queue with a bounded pool of worker slots:
//!
//! ```text
//!            acquire permit          dequeue            handle_task
//! run loop ─────────────────▶ slot ───────────▶ item ───────────────▶ outcome
//!    ▲                          │  none / error                          │
//!    └──────── permit released ◀┴────────────────────────────────────────┘
//! ```
//!
//! The run loop only acquires permits and spawns slots, so the next slot
//! starts as soon as a permit frees up. At most `max_concurrent_tasks`
//! slots exist at once; resizing changes how many may start, in-flight
//! work is never preempted.

use crate::error::{panic_reason, Error, Result};
use crate::queue::{QueueService, QueuedTask};
use crate::request::{AgentResult, Priority, Request};
use crate::tracker::{TaskStatus, TaskTracker};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker as SlotTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Worker slots that may process at once
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Pause after a failed dequeue before the slot is released
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_error_backoff_ms() -> u64 {
    1000
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl ProcessorConfig {
    /// Set the concurrency bound
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Set the error backoff
    #[must_use]
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff_ms = backoff.as_millis() as u64;
        self
    }

    fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Consumer of dequeued requests
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Process one request. Failures are reported in the result.
    async fn handle_task(&self, request: &Request, cancel: &CancellationToken) -> AgentResult;
}

/// Terminal report for one processed task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Request id
    pub request_id: Uuid,
    /// Priority the item was dequeued at
    pub priority: Priority,
    /// Terminal status
    pub status: TaskStatus,
    /// The result produced
    pub result: AgentResult,
}

/// Decrements the active count even if the handler panics
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded worker pool over a [`QueueService`]
pub struct TaskProcessor {
    queue: Arc<dyn QueueService>,
    handler: Arc<dyn TaskHandler>,
    tracker: Arc<TaskTracker>,
    semaphore: Arc<Semaphore>,
    max_concurrent: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    outcomes: Option<mpsc::Sender<TaskOutcome>>,
    config: ProcessorConfig,
}

impl TaskProcessor {
    /// Create a processor. A zero concurrency bound is raised to one.
    pub fn new(
        queue: Arc<dyn QueueService>,
        handler: Arc<dyn TaskHandler>,
        tracker: Arc<TaskTracker>,
        config: ProcessorConfig,
    ) -> Self {
        let max = config.max_concurrent_tasks.max(1);
        Self {
            queue,
            handler,
            tracker,
            semaphore: Arc::new(Semaphore::new(max)),
            max_concurrent: AtomicUsize::new(max),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            outcomes: None,
            config,
        }
    }

    /// Report every finished task on `sender`
    #[must_use]
    pub fn with_outcomes(mut self, sender: mpsc::Sender<TaskOutcome>) -> Self {
        self.outcomes = Some(sender);
        self
    }

    /// Task tracker shared with the dispatcher
    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Configured concurrency bound
    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Tasks being handled right now
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest simultaneous active count observed
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Slots that could start right now
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Change the concurrency bound.
    ///
    /// Growing adds slots immediately. Shrinking retires idle slots at once
    /// and busy ones as they finish; must run inside a Tokio runtime when
    /// slots are busy.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero.
    pub fn set_max_concurrent_tasks(&self, max: usize) -> Result<()> {
        if max == 0 {
            return Err(Error::InvalidArgument(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }

        let previous = self.max_concurrent.swap(max, Ordering::SeqCst);
        if max > previous {
            self.semaphore.add_permits(max - previous);
        } else if max < previous {
            let excess = u32::try_from(previous - max)
                .map_err(|_| Error::InvalidArgument(format!("cannot shrink by {}", previous - max)))?;
            match self.semaphore.clone().try_acquire_many_owned(excess) {
                Ok(permits) => permits.forget(),
                Err(_) => {
                    let runtime = tokio::runtime::Handle::try_current()
                        .map_err(|e| Error::Internal(format!("no runtime to retire slots: {}", e)))?;
                    let semaphore = self.semaphore.clone();
                    runtime.spawn(async move {
                        if let Ok(permits) = semaphore.acquire_many_owned(excess).await {
                            permits.forget();
                        }
                    });
                }
            }
        }

        info!(previous, max, "Processor concurrency changed");
        Ok(())
    }

    /// Drain the queue until `shutdown` fires, then wait for in-flight slots
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            max_concurrent = self.max_concurrent_tasks(),
            "Task processor started"
        );
        let slots = SlotTracker::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(error = %e, "Processor semaphore closed");
                        break;
                    }
                },
            };

            let processor = self.clone();
            let shutdown = shutdown.clone();
            slots.spawn(async move { processor.slot(permit, shutdown).await });
        }

        slots.close();
        debug!(in_flight = slots.len(), "Waiting for worker slots");
        slots.wait().await;
        info!(peak_active = self.peak_active(), "Task processor stopped");
    }

    async fn slot(&self, permit: OwnedSemaphorePermit, shutdown: CancellationToken) {
        match self.queue.dequeue(&shutdown).await {
            Ok(None) => {}
            Ok(Some(task)) => self.process(task, &shutdown).await,
            Err(e) if e.is_cancellation() => debug!("Dequeue cancelled"),
            Err(e) => {
                warn!(error = %e, backoff_ms = self.config.error_backoff_ms, "Dequeue failed");
                tokio::select! {
                    _ = tokio::time::sleep(self.config.error_backoff()) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        }
        drop(permit);
    }

    async fn process(&self, task: QueuedTask, shutdown: &CancellationToken) {
        let id = task.request.id;
        let Some(cancel) = self.tracker.begin_processing(id, shutdown) else {
            return;
        };

        let result = {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = ActiveGuard(&self.active);
            self.peak.fetch_max(active, Ordering::SeqCst);
            debug!(
                task_id = %id,
                priority = %task.priority,
                wait_ms = task.wait_time.as_millis() as u64,
                active,
                "Processing task"
            );
            match AssertUnwindSafe(self.handler.handle_task(&task.request, &cancel))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let reason = panic_reason(panic.as_ref());
                    error!(task_id = %id, "Task handler panicked: {}", reason);
                    AgentResult::from_error(&Error::Internal(format!(
                        "task handler panicked: {}",
                        reason
                    )))
                }
            }
        };

        let status = TaskStatus::from_result(&result);
        self.tracker.finish(id, status);
        match status {
            TaskStatus::Completed => debug!(task_id = %id, "Task completed"),
            TaskStatus::Cancelled => debug!(task_id = %id, "Task cancelled"),
            _ => warn!(
                task_id = %id,
                code = result.error_code.as_deref().unwrap_or_default(),
                "Task failed: {}",
                result.message
            ),
        }

        if let Some(outcomes) = &self.outcomes {
            let outcome = TaskOutcome {
                request_id: id,
                priority: task.priority,
                status,
                result,
            };
            if outcomes.send(outcome).await.is_err() {
                debug!(task_id = %id, "Outcome receiver dropped");
            }
        }
    }
}
