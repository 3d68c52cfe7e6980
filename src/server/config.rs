//! Application configuration types
//!
//! One section per component; every section falls back to its defaults.

use a3sist_core::{AgentOrchestratorConfig, CacheConfig, ProcessorConfig, QueueConfig, WorkflowConfig};
use a3sist_tools::ToolOrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub agents: AgentOrchestratorConfig,
    #[serde(default)]
    pub tools: ToolOrchestratorConfig,
    #[serde(default)]
    pub shutdown: ShutdownAppConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownAppConfig {
    /// How long background tasks get to finish before being aborted
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownAppConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl ShutdownAppConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn default_drain_timeout_secs() -> u64 {
    30
}

/// Periodic maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Finished tasks older than this are pruned from the tracker
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
    /// Interval of the queue aging pass (0 = disabled)
    #[serde(default)]
    pub rebalance_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            task_retention_secs: default_task_retention_secs(),
            rebalance_interval_secs: 0,
        }
    }
}

impl MaintenanceConfig {
    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    pub fn rebalance_interval(&self) -> Option<Duration> {
        (self.rebalance_interval_secs > 0).then(|| Duration::from_secs(self.rebalance_interval_secs))
    }
}

fn default_task_retention_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.processor.max_concurrent_tasks, 4);
        assert_eq!(config.tools.max_concurrent_requests, 1);
        assert_eq!(config.tools.servers.len(), 5);
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_secs(30));
        assert_eq!(config.maintenance.rebalance_interval(), None);
    }

    #[test]
    fn test_rebalance_interval() {
        let maintenance = MaintenanceConfig {
            rebalance_interval_secs: 15,
            ..Default::default()
        };
        assert_eq!(
            maintenance.rebalance_interval(),
            Some(Duration::from_secs(15))
        );
    }
}
