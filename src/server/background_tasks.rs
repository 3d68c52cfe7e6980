//! Background task startup functions
//!
//! Periodic health checks, cache/tracker cleanup and the optional queue
//! aging pass. Every loop watches a token from the shutdown controller and
//! is joined when the controller drains.

use a3sist_core::{
    AgentOrchestrator, AgentResult, QueueService, ShutdownController, SingleFlightCache,
    TaskTracker,
};
use a3sist_tools::ToolOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Start the tool-server and agent health check loop
pub fn start_health_check_task(
    tools: &Arc<ToolOrchestrator>,
    agents: &Arc<AgentOrchestrator>,
    shutdown_controller: &ShutdownController,
) {
    let tools = tools.clone();
    let agents = agents.clone();
    let interval = tools.config().health_check_interval();
    let health_shutdown = shutdown_controller.token();

    shutdown_controller.spawn("health-check", async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let servers = tools.check_health().await;
                    let unhealthy: Vec<&String> = servers
                        .iter()
                        .filter(|(_, healthy)| !**healthy)
                        .map(|(name, _)| name)
                        .collect();
                    if unhealthy.is_empty() {
                        debug!(servers = servers.len(), "All tool servers healthy");
                    } else {
                        warn!(unhealthy = ?unhealthy, "Tool servers failed health check");
                    }

                    let agent_health = agents.check_agent_health().await;
                    debug!(agents = agent_health.len(), "Agent health checked");
                }
                _ = health_shutdown.cancelled() => {
                    info!("Health check task shutting down");
                    break;
                }
            }
        }
    });
    info!(
        "Health check task started (interval: {}s)",
        interval.as_secs()
    );
}

/// Start the cache compaction and tracker pruning loop
pub fn start_cleanup_task(
    cache: &Arc<SingleFlightCache<AgentResult>>,
    tracker: &Arc<TaskTracker>,
    retention: Duration,
    shutdown_controller: &ShutdownController,
) {
    let cache = cache.clone();
    let tracker = tracker.clone();
    let interval = cache.config().cleanup_interval();
    let cleanup_shutdown = shutdown_controller.token();

    shutdown_controller.spawn("cleanup", async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let evicted = cache.compact();
                    let pruned = tracker.prune_finished(retention);
                    if evicted > 0 || pruned > 0 {
                        info!(evicted, pruned, "Cleanup pass completed");
                    }
                }
                _ = cleanup_shutdown.cancelled() => {
                    info!("Cleanup task shutting down");
                    break;
                }
            }
        }
    });
    info!(
        "Cleanup task started (interval: {}s, retention: {}s)",
        interval.as_secs(),
        retention.as_secs()
    );
}

/// Start the periodic queue aging pass
pub fn start_rebalance_task(
    queue: &Arc<dyn QueueService>,
    interval: Duration,
    shutdown_controller: &ShutdownController,
) {
    let queue = queue.clone();
    let rebalance_shutdown = shutdown_controller.token();

    shutdown_controller.spawn("rebalance", async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let promoted = queue.rebalance();
                    if promoted > 0 {
                        info!(promoted, "Queue aging pass promoted tasks");
                    }
                }
                _ = rebalance_shutdown.cancelled() => {
                    info!("Rebalance task shutting down");
                    break;
                }
            }
        }
    });
    info!("Rebalance task started (interval: {}s)", interval.as_secs());
}
