//! Task Tracker
//!
//! Lifecycle of dispatched requests, keyed by request id:
//!
//! ```text
//! Queued ──▶ Processing ──▶ Completed | Failed | Cancelled
//!    └──────────────────────────────────────▶ Cancelled
//! ```
//!
//! A cancellation token is held only while a task is `Processing`; that is
//! what the dispatcher's cancel path signals.

use crate::request::{AgentResult, Priority};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle state of a tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue
    Queued,
    /// Picked up by a worker slot
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with a failure result
    Failed,
    /// Cancelled before or during processing
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transition can happen
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Terminal status for a finished attempt
    #[must_use]
    pub fn from_result(result: &AgentResult) -> Self {
        if result.success {
            Self::Completed
        } else if result.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Failed
        }
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of one tracked task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Request id
    pub id: Uuid,
    /// Current status
    pub status: TaskStatus,
    /// Priority the task was dispatched with
    pub priority: Priority,
    /// When tracking started
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

struct TrackedTask {
    status: TaskStatus,
    priority: Priority,
    token: Option<CancellationToken>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TrackedTask {
    fn transition(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if status != TaskStatus::Processing {
            self.token = None;
        }
    }

    fn snapshot(&self, id: Uuid) -> TaskSnapshot {
        TaskSnapshot {
            id,
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Concurrent map of task lifecycles
#[derive(Default)]
pub struct TaskTracker {
    tasks: DashMap<Uuid, TrackedTask>,
}

impl TaskTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a queued task
    pub fn track(&self, id: Uuid, priority: Priority) {
        let now = Utc::now();
        self.tasks.insert(
            id,
            TrackedTask {
                status: TaskStatus::Queued,
                priority,
                token: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Move a task to `Processing` and hand out its cancellation token.
    ///
    /// The token is a child of `parent`. Untracked tasks are tracked on the
    /// spot; returns `None` if the task was already cancelled.
    pub fn begin_processing(&self, id: Uuid, parent: &CancellationToken) -> Option<CancellationToken> {
        let now = Utc::now();
        let mut entry = self.tasks.entry(id).or_insert_with(|| TrackedTask {
            status: TaskStatus::Queued,
            priority: Priority::default(),
            token: None,
            created_at: now,
            updated_at: now,
        });
        if entry.status.is_terminal() {
            debug!(task_id = %id, status = %entry.status, "Task already finished, skipping");
            return None;
        }
        let token = parent.child_token();
        entry.transition(TaskStatus::Processing);
        entry.token = Some(token.clone());
        Some(token)
    }

    /// Record the terminal status of a task
    pub fn finish(&self, id: Uuid, status: TaskStatus) {
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            entry.transition(status);
        }
    }

    /// Current status of a task
    pub fn status(&self, id: Uuid) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|e| e.status)
    }

    /// Snapshot of a task
    pub fn get(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.tasks.get(&id).map(|e| e.snapshot(id))
    }

    /// Cancel a processing task by signalling its token.
    ///
    /// Returns whether a token was signalled.
    pub fn cancel(&self, id: Uuid) -> bool {
        let Some(mut entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        match entry.token.take() {
            Some(token) => {
                token.cancel();
                entry.transition(TaskStatus::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Mark a queued task cancelled
    pub fn mark_cancelled(&self, id: Uuid) {
        self.finish(id, TaskStatus::Cancelled);
    }

    /// Stop tracking a task
    pub fn remove(&self, id: Uuid) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Drop terminal tasks last updated more than `age` ago; returns how many
    pub fn prune_finished(&self, age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let before = self.tasks.len();
        self.tasks
            .retain(|_, task| !(task.status.is_terminal() && task.updated_at <= cutoff));
        before - self.tasks.len()
    }

    /// Number of tasks in each status
    pub fn counts(&self) -> Vec<(TaskStatus, usize)> {
        let mut counts = std::collections::HashMap::new();
        for entry in self.tasks.iter() {
            *counts.entry(entry.status).or_insert(0usize) += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by_key(|(status, _)| status.as_str());
        counts
    }

    /// Tracked task count
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let tracker = TaskTracker::new();
        let id = Uuid::new_v4();
        let shutdown = CancellationToken::new();

        tracker.track(id, Priority::High);
        assert_eq!(tracker.status(id), Some(TaskStatus::Queued));

        let token = tracker.begin_processing(id, &shutdown).unwrap();
        assert_eq!(tracker.status(id), Some(TaskStatus::Processing));
        assert!(!token.is_cancelled());

        tracker.finish(id, TaskStatus::Completed);
        let snapshot = tracker.get(id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.priority, Priority::High);
        // No token survives the terminal transition
        assert!(!tracker.cancel(id));
    }

    #[test]
    fn test_cancel_processing_signals_token() {
        let tracker = TaskTracker::new();
        let id = Uuid::new_v4();
        tracker.track(id, Priority::Normal);

        assert!(!tracker.cancel(id), "queued tasks hold no token");

        let token = tracker.begin_processing(id, &CancellationToken::new()).unwrap();
        assert!(tracker.cancel(id));
        assert!(token.is_cancelled());
        assert_eq!(tracker.status(id), Some(TaskStatus::Cancelled));
    }

    #[test]
    fn test_cancelled_task_is_not_processed() {
        let tracker = TaskTracker::new();
        let id = Uuid::new_v4();
        tracker.track(id, Priority::Normal);
        tracker.mark_cancelled(id);

        assert!(tracker.begin_processing(id, &CancellationToken::new()).is_none());
    }

    #[test]
    fn test_shutdown_cancels_children() {
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let token = tracker.begin_processing(Uuid::new_v4(), &shutdown).unwrap();

        shutdown.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_prune_finished_keeps_live_tasks() {
        let tracker = TaskTracker::new();
        let done = Uuid::new_v4();
        let queued = Uuid::new_v4();
        tracker.track(done, Priority::Normal);
        tracker.track(queued, Priority::Normal);
        tracker.finish(done, TaskStatus::Failed);

        assert_eq!(tracker.prune_finished(Duration::ZERO), 1);
        assert_eq!(tracker.status(done), None);
        assert_eq!(tracker.status(queued), Some(TaskStatus::Queued));
    }

    #[test]
    fn test_status_from_result() {
        assert_eq!(
            TaskStatus::from_result(&AgentResult::success("ok")),
            TaskStatus::Completed
        );
        assert_eq!(
            TaskStatus::from_result(&AgentResult::failure("no", "X")),
            TaskStatus::Failed
        );
        assert_eq!(
            TaskStatus::from_result(&AgentResult::from_error(&crate::Error::Cancelled)),
            TaskStatus::Cancelled
        );
    }

    #[test]
    fn test_counts() {
        let tracker = TaskTracker::new();
        tracker.track(Uuid::new_v4(), Priority::Normal);
        tracker.track(Uuid::new_v4(), Priority::Low);
        let done = Uuid::new_v4();
        tracker.track(done, Priority::Low);
        tracker.finish(done, TaskStatus::Completed);

        let counts = tracker.counts();
        assert_eq!(
            counts,
            vec![(TaskStatus::Completed, 1), (TaskStatus::Queued, 2)]
        );
    }
}
