//! Built-in agent that fans requests out to remote tool servers

use super::agent::{Agent, AgentCapabilities, AgentKind};
use super::registry::AgentType;
use crate::error::{Error, Result};
use crate::request::{AgentResult, Request};
use a3sist_tools::ToolOrchestrator;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Dependency name under which the tool orchestrator is provided
pub const TOOL_ORCHESTRATOR: &str = "tool_orchestrator";

/// Default registration name
pub const TOOL_AGENT_NAME: &str = "tool-agent";

/// Agent backed by the [`ToolOrchestrator`]
pub struct ToolAgent {
    name: String,
    tools: Arc<ToolOrchestrator>,
}

impl ToolAgent {
    /// Create a tool agent
    pub fn new(name: impl Into<String>, tools: Arc<ToolOrchestrator>) -> Self {
        Self {
            name: name.into(),
            tools,
        }
    }

    /// Registration entry resolving the orchestrator from dependencies
    pub fn agent_type() -> AgentType {
        AgentType::new(TOOL_AGENT_NAME, AgentKind::Tooling)
            .with_capabilities(
                AgentCapabilities::new()
                    .with_keywords([
                        "analyze", "analyse", "refactor", "project", "solution", "dependency",
                        "documentation", "docs", "best practice", "git", "deploy", "test",
                        "quality", "performance",
                    ])
                    .with_priority_weight(10),
            )
            .with_dependency(TOOL_ORCHESTRATOR)
            .with_constructor(|name, deps| {
                let tools = deps.require::<ToolOrchestrator>(name, TOOL_ORCHESTRATOR)?;
                Ok(Arc::new(ToolAgent::new(name, tools)) as Arc<dyn Agent>)
            })
    }
}

#[async_trait]
impl Agent for ToolAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Tooling
    }

    fn can_handle(&self, request: &Request) -> bool {
        self.tools.requires_tools(&request.to_tool_request())
    }

    async fn handle(&self, request: &Request, cancel: &CancellationToken) -> Result<AgentResult> {
        let outcome = self
            .tools
            .process_distributed(&request.to_tool_request(), cancel)
            .await;
        if outcome.was_cancelled() {
            return Err(Error::Cancelled);
        }

        debug!(
            agent = %self.name,
            servers = ?outcome.servers_used,
            success = outcome.success,
            "Tool fan-out finished"
        );

        let failed: Vec<&str> = outcome
            .server_results
            .values()
            .filter(|r| !r.success)
            .map(|r| r.server.as_str())
            .collect();

        let mut result = if outcome.success {
            AgentResult::success(format!(
                "Processed with {} tool server(s)",
                outcome.servers_used.len()
            ))
        } else {
            let mut result = AgentResult::failure(
                format!("Tool execution failed on: {}", failed.join(", ")),
                "TOOL_ERROR",
            );
            result.requires_review = true;
            result
        };

        result = result
            .with_content(outcome.content.clone())
            .with_metadata("serversUsed", json!(outcome.servers_used))
            .with_metadata("toolsUsed", serde_json::to_value(&outcome.tools_used)?)
            .with_metadata("serverResults", serde_json::to_value(&outcome.server_results)?)
            .with_metadata("totalTimeMs", json!(outcome.total_time_ms));
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        let health = self.tools.check_health().await;
        health.is_empty() || health.values().any(|healthy| *healthy)
    }
}
