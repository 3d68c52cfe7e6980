//! Bounded Priority Task Queue
//!
//! Items are dequeued highest priority first, FIFO within a priority.
//! Dequeue waits up to `dequeue_timeout_ms` for work; "nothing available"
//! is `Ok(None)`, not an error. Items that wait longer than
//! `aging_threshold_secs` can be promoted by a [`QueueService::rebalance`]
//! pass so low priorities are not starved.

use crate::error::{Error, Result};
use crate::request::{Priority, Request};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued items; enqueue beyond this fails with `QueueFull`
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// How long a dequeue waits for work before reporting none
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// Wait after which a rebalance pass promotes an item
    #[serde(default = "default_aging_threshold_secs")]
    pub aging_threshold_secs: u64,
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_dequeue_timeout_ms() -> u64 {
    1000
}

fn default_aging_threshold_secs() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            aging_threshold_secs: default_aging_threshold_secs(),
        }
    }
}

impl QueueConfig {
    /// Set the capacity
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the dequeue wait
    #[must_use]
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the aging threshold
    #[must_use]
    pub fn with_aging_threshold(mut self, threshold: Duration) -> Self {
        self.aging_threshold_secs = threshold.as_secs();
        self
    }

    fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    fn aging_threshold(&self) -> Duration {
        Duration::from_secs(self.aging_threshold_secs)
    }
}

/// An item handed out by the queue
#[derive(Debug, Clone)]
pub struct QueuedTask {
    /// The request
    pub request: Request,
    /// Priority at dequeue time (after any promotion)
    pub priority: Priority,
    /// Priority assigned at enqueue time
    pub original_priority: Priority,
    /// How long the item waited
    pub wait_time: Duration,
}

/// Queued items per priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    /// Critical items
    pub critical: usize,
    /// High items
    pub high: usize,
    /// Normal items
    pub normal: usize,
    /// Low items
    pub low: usize,
}

impl PriorityCounts {
    fn add(&mut self, priority: Priority) {
        match priority {
            Priority::Critical => self.critical += 1,
            Priority::High => self.high += 1,
            Priority::Normal => self.normal += 1,
            Priority::Low => self.low += 1,
        }
    }

    /// Total across priorities
    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }
}

/// Queue statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatistics {
    /// Items ever accepted
    pub total_enqueued: u64,
    /// Items ever handed out for processing
    pub total_processed: u64,
    /// Items removed by cancellation
    pub total_cancelled: u64,
    /// Items currently queued, by priority
    pub queued: PriorityCounts,
    /// Mean wait of processed items in milliseconds
    pub average_wait_ms: f64,
    /// Processed items per second since the queue was created
    pub throughput_per_sec: f64,
}

/// Queue service contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Add a request at a priority
    async fn enqueue(&self, request: Request, priority: Priority) -> Result<()>;

    /// Wait for the next item; `Ok(None)` when nothing arrived in time
    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<QueuedTask>>;

    /// Statistics snapshot
    fn statistics(&self) -> QueueStatistics;

    /// Remove a still-queued item; returns whether it was queued
    fn cancel(&self, id: Uuid) -> bool;

    /// Promote aged items one priority level; returns how many moved
    fn rebalance(&self) -> usize;
}

struct Entry {
    priority: Priority,
    original_priority: Priority,
    seq: u64,
    enqueued_at: Instant,
    /// Start of the current aging period; reset on each promotion
    aged_since: Instant,
    request: Request,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: higher priority first, then lower sequence number first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// In-memory priority queue
pub struct PriorityTaskQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    notify: Notify,
    seq: AtomicU64,
    closed: AtomicBool,
    total_enqueued: AtomicU64,
    total_processed: AtomicU64,
    total_cancelled: AtomicU64,
    total_wait_ms: AtomicU64,
    created_at: Instant,
    config: QueueConfig,
}

impl PriorityTaskQueue {
    /// Create an empty queue
    pub fn new(config: QueueConfig) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            total_enqueued: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            total_cancelled: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
            created_at: Instant::now(),
            config,
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Stop accepting work and wake every waiting consumer
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(remaining = self.len(), "Task queue closed");
        }
        self.notify.notify_waiters();
    }

    /// Whether the queue was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pop(&self) -> Option<QueuedTask> {
        let entry = self.heap.lock().pop()?;
        let wait_time = entry.enqueued_at.elapsed();
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms
            .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
        Some(QueuedTask {
            request: entry.request,
            priority: entry.priority,
            original_priority: entry.original_priority,
            wait_time,
        })
    }
}

#[async_trait]
impl QueueService for PriorityTaskQueue {
    async fn enqueue(&self, request: Request, priority: Priority) -> Result<()> {
        if self.is_closed() {
            return Err(Error::QueueClosed);
        }

        let id = request.id;
        {
            let mut heap = self.heap.lock();
            if heap.len() >= self.config.max_queue_size {
                return Err(Error::QueueFull(self.config.max_queue_size));
            }
            let now = Instant::now();
            heap.push(Entry {
                priority,
                original_priority: priority,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                enqueued_at: now,
                aged_since: now,
                request,
            });
        }
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        debug!(task_id = %id, priority = %priority, "Task enqueued");
        Ok(())
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<QueuedTask>> {
        let deadline = Instant::now() + self.config.dequeue_timeout();
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.pop() {
                return Ok(Some(task));
            }
            if self.is_closed() {
                return Err(Error::QueueClosed);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    fn statistics(&self) -> QueueStatistics {
        let mut queued = PriorityCounts::default();
        for entry in self.heap.lock().iter() {
            queued.add(entry.priority);
        }

        let processed = self.total_processed.load(Ordering::Relaxed);
        let average_wait_ms = if processed == 0 {
            0.0
        } else {
            self.total_wait_ms.load(Ordering::Relaxed) as f64 / processed as f64
        };
        let elapsed = self.created_at.elapsed().as_secs_f64();
        let throughput_per_sec = if elapsed > 0.0 {
            processed as f64 / elapsed
        } else {
            0.0
        };

        QueueStatistics {
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_processed: processed,
            total_cancelled: self.total_cancelled.load(Ordering::Relaxed),
            queued,
            average_wait_ms,
            throughput_per_sec,
        }
    }

    fn cancel(&self, id: Uuid) -> bool {
        let removed = {
            let mut heap = self.heap.lock();
            let before = heap.len();
            heap.retain(|entry| entry.request.id != id);
            before != heap.len()
        };
        if removed {
            self.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(task_id = %id, "Queued task cancelled");
        }
        removed
    }

    fn rebalance(&self) -> usize {
        let threshold = self.config.aging_threshold();
        let now = Instant::now();
        let mut heap = self.heap.lock();
        let mut promoted = 0;
        let entries: Vec<Entry> = std::mem::take(&mut *heap)
            .into_iter()
            .map(|mut entry| {
                if entry.priority < Priority::Critical
                    && now.duration_since(entry.aged_since) >= threshold
                {
                    entry.priority = entry.priority.promoted();
                    entry.aged_since = now;
                    promoted += 1;
                }
                entry
            })
            .collect();
        *heap = entries.into();
        drop(heap);

        if promoted > 0 {
            info!(promoted, "Queue rebalanced");
        }
        promoted
    }
}
