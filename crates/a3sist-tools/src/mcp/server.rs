//! Tool server descriptors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static configuration of a remote tool server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Server name (unique identifier)
    pub name: String,
    /// Base URL; requests go to `{endpoint}/mcp`
    pub endpoint: String,
    /// Tool identifiers the server exposes
    #[serde(default)]
    pub tools: Vec<String>,
}

impl ToolServerConfig {
    /// Create a new server config
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            tools: Vec::new(),
        }
    }

    /// Declare the tools this server exposes
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

/// Live descriptor of a registered tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerDescriptor {
    /// Server name (unique per orchestrator)
    pub name: String,
    /// Base URL
    pub endpoint: String,
    /// Tool identifiers the server exposes
    pub tools: Vec<String>,
    /// Result of the last health check; servers start out healthy
    pub healthy: bool,
    /// When the last health check completed
    pub last_health_check: Option<DateTime<Utc>>,
}

impl From<ToolServerConfig> for ToolServerDescriptor {
    fn from(config: ToolServerConfig) -> Self {
        Self {
            name: config.name,
            endpoint: config.endpoint,
            tools: config.tools,
            healthy: true,
            last_health_check: None,
        }
    }
}

impl ToolServerDescriptor {
    /// Whether the server declares `tool`
    pub fn exposes(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}

/// Default server table matching the built-in analysis rules
pub fn default_servers() -> Vec<ToolServerConfig> {
    vec![
        ToolServerConfig::new("core-development", "http://localhost:3001")
            .with_tools(["code_analysis", "refactor_suggestions"]),
        ToolServerConfig::new("project-analysis", "http://localhost:3002")
            .with_tools(["project_analysis", "dependency_analysis"]),
        ToolServerConfig::new("knowledge", "http://localhost:3003")
            .with_tools(["documentation_search", "best_practices"]),
        ToolServerConfig::new("git-devops", "http://localhost:3004")
            .with_tools(["git_operations", "deployment_pipeline"]),
        ToolServerConfig::new("testing-quality", "http://localhost:3005")
            .with_tools(["test_generation", "quality_metrics", "performance_analysis"]),
    ]
}
