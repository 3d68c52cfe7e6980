//! Tool Orchestrator
//!
//! Fans a request out to the remote tool servers it needs and fans the
//! results back in:
//!
//! ```text
//!            ┌──────────────┐
//! request ──▶│   analyzer   │──▶ [(server, tool), ...]
//!            └──────────────┘
//!                   │ group by server
//!        ┌──────────┼──────────┐
//!        ▼          ▼          ▼          servers run concurrently,
//!    server A   server B   server C       tools within a server run in order
//!        └──────────┼──────────┘
//!                   ▼
//!              synthesis ──▶ OrchestratedResult
//! ```
//!
//! Two gates bound load on remote servers: `max_concurrent_requests` caps
//! how many top-level requests run at once (1 = fully serialized), and
//! `max_outbound_calls` caps concurrent remote calls across all requests.

use super::analysis::{ToolAnalyzer, ToolSelection, DEFAULT_LONG_CONTENT_THRESHOLD};
use super::parameters::build_parameters;
use super::protocol::{McpError, McpResult};
use super::server::{default_servers, ToolServerConfig, ToolServerDescriptor};
use super::transport::{HttpTransport, ToolTransport};
use crate::request::ToolRequest;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tool orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOrchestratorConfig {
    /// Top-level distributed requests allowed at once (1 = serialized)
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Remote calls allowed at once across all requests
    #[serde(default = "default_max_outbound_calls")]
    pub max_outbound_calls: usize,
    /// Per-call timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Interval between periodic health checks
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Content length that triggers code analysis
    #[serde(default = "default_long_content_threshold")]
    pub long_content_threshold: usize,
    /// Tool servers to register at startup
    #[serde(default = "default_servers")]
    pub servers: Vec<ToolServerConfig>,
}

fn default_max_concurrent_requests() -> usize {
    1
}

fn default_max_outbound_calls() -> usize {
    16
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_health_check_interval_secs() -> u64 {
    300
}

fn default_long_content_threshold() -> usize {
    DEFAULT_LONG_CONTENT_THRESHOLD
}

impl Default for ToolOrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            max_outbound_calls: default_max_outbound_calls(),
            call_timeout_ms: default_call_timeout_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
            long_content_threshold: default_long_content_threshold(),
            servers: default_servers(),
        }
    }
}

impl ToolOrchestratorConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent top-level requests
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Set the outbound call limit
    #[must_use]
    pub fn with_max_outbound_calls(mut self, max: usize) -> Self {
        self.max_outbound_calls = max;
        self
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Replace the startup server table
    #[must_use]
    pub fn with_servers(mut self, servers: Vec<ToolServerConfig>) -> Self {
        self.servers = servers;
        self
    }

    /// Health check interval as a duration
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Output of one tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Tool identifier
    pub tool: String,
    /// Text returned by the server
    pub output: String,
    /// Call duration in milliseconds
    pub execution_time_ms: u64,
}

/// Outcome of all tool calls made against one server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResult {
    /// Server name
    pub server: String,
    /// Whether every tool on this server succeeded
    pub success: bool,
    /// Outputs of the tools that completed, in call order
    pub outputs: Vec<ToolOutput>,
    /// Summarized error if the server failed
    pub error: Option<String>,
    /// Whether the failure was a cancellation
    pub cancelled: bool,
    /// Time spent on this server in milliseconds
    pub execution_time_ms: u64,
}

impl ServerResult {
    fn failed(server: &str, error: &McpError, outputs: Vec<ToolOutput>, started: Instant) -> Self {
        Self {
            server: server.to_string(),
            success: false,
            outputs,
            error: Some(error.to_string()),
            cancelled: error.is_cancellation(),
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Combined result of a distributed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratedResult {
    /// Logical AND over all per-server outcomes
    pub success: bool,
    /// Synthesized report
    pub content: String,
    /// Per-server outcomes keyed by server name
    pub server_results: BTreeMap<String, ServerResult>,
    /// Servers contacted, in analysis order
    pub servers_used: Vec<String>,
    /// Tools selected by analysis
    pub tools_used: Vec<ToolSelection>,
    /// Wall-clock time of the whole request in milliseconds
    pub total_time_ms: u64,
}

impl OrchestratedResult {
    /// Whether any server failure was a cancellation
    pub fn was_cancelled(&self) -> bool {
        self.server_results.values().any(|r| r.cancelled)
    }
}

/// Multi-server tool orchestrator
pub struct ToolOrchestrator {
    servers: DashMap<String, ToolServerDescriptor>,
    transport: Arc<dyn ToolTransport>,
    analyzer: ToolAnalyzer,
    request_gate: Semaphore,
    outbound: Semaphore,
    config: ToolOrchestratorConfig,
}

impl ToolOrchestrator {
    /// Create an orchestrator that talks HTTP
    pub fn new(config: ToolOrchestratorConfig) -> McpResult<Self> {
        Ok(Self::with_transport(config, Arc::new(HttpTransport::new()?)))
    }

    /// Create an orchestrator over a custom transport
    pub fn with_transport(config: ToolOrchestratorConfig, transport: Arc<dyn ToolTransport>) -> Self {
        let servers = DashMap::new();
        for server in &config.servers {
            servers.insert(server.name.clone(), server.clone().into());
        }

        Self {
            servers,
            transport,
            analyzer: ToolAnalyzer::new(config.long_content_threshold),
            request_gate: Semaphore::new(config.max_concurrent_requests.max(1)),
            outbound: Semaphore::new(config.max_outbound_calls.max(1)),
            config,
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &ToolOrchestratorConfig {
        &self.config
    }

    /// Register a server, replacing any server with the same name
    pub fn add_server(&self, config: ToolServerConfig) {
        let name = config.name.clone();
        if self.servers.insert(name.clone(), config.into()).is_some() {
            info!(server = %name, "Tool server replaced");
        } else {
            info!(server = %name, "Tool server registered");
        }
    }

    /// Remove a server; returns whether it was registered
    pub fn remove_server(&self, name: &str) -> bool {
        self.servers.remove(name).is_some()
    }

    /// Snapshot of one server
    pub fn server(&self, name: &str) -> Option<ToolServerDescriptor> {
        self.servers.get(name).map(|s| s.value().clone())
    }

    /// Snapshot of all servers, sorted by name
    pub fn servers(&self) -> Vec<ToolServerDescriptor> {
        let mut servers: Vec<_> = self.servers.iter().map(|s| s.value().clone()).collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    /// Names of servers whose last check succeeded
    pub fn healthy_servers(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .servers
            .iter()
            .filter(|s| s.healthy)
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Whether the request needs any remote tool
    pub fn requires_tools(&self, request: &ToolRequest) -> bool {
        self.analyzer.requires_tools(request)
    }

    /// Tools the request would use, each routed to the server that runs it
    pub fn analyze(&self, request: &ToolRequest) -> Vec<ToolSelection> {
        self.analyzer
            .analyze(request)
            .into_iter()
            .map(|selection| self.route(selection))
            .collect()
    }

    /// Keep the rule's server when registered, else hand the tool to the
    /// first server (by name) that declares it.
    fn route(&self, selection: ToolSelection) -> ToolSelection {
        if self.servers.contains_key(&selection.server) {
            return selection;
        }
        let owner = self
            .servers()
            .into_iter()
            .find(|server| server.exposes(&selection.tool));
        match owner {
            Some(server) => {
                debug!(
                    tool = %selection.tool,
                    from = %selection.server,
                    to = %server.name,
                    "Tool routed to declaring server"
                );
                ToolSelection {
                    server: server.name,
                    tool: selection.tool,
                }
            }
            None => selection,
        }
    }

    /// Run a request across every server it needs and synthesize one result.
    ///
    /// Never fails as a whole: server errors, timeouts and cancellation are
    /// captured in the per-server results.
    pub async fn process_distributed(
        &self,
        request: &ToolRequest,
        cancel: &CancellationToken,
    ) -> OrchestratedResult {
        let started = Instant::now();
        let selections = self.analyze(request);
        let groups = group_by_server(&selections);
        let servers_used: Vec<String> = groups.iter().map(|(s, _)| s.clone()).collect();

        let gate_permit = tokio::select! {
            permit = self.request_gate.acquire() => permit.ok(),
            _ = cancel.cancelled() => None,
        };
        if gate_permit.is_none() {
            debug!("Distributed request cancelled while waiting for the request gate");
            let server_results = servers_used
                .iter()
                .map(|s| {
                    (
                        s.clone(),
                        ServerResult::failed(s, &McpError::Cancelled, Vec::new(), started),
                    )
                })
                .collect();
            return finish(selections, servers_used, server_results, started);
        }

        info!(
            servers = ?servers_used,
            tools = selections.len(),
            "Processing distributed request"
        );

        let timeout = self.call_timeout(request);
        let executions = groups.iter().map(|(server, tools)| async move {
            match AssertUnwindSafe(self.execute_on_server(server, tools, request, timeout, cancel))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(server = %server, "Server execution panicked");
                    ServerResult::failed(
                        server,
                        &McpError::Protocol("server execution panicked".to_string()),
                        Vec::new(),
                        started,
                    )
                }
            }
        });

        let server_results = join_all(executions)
            .await
            .into_iter()
            .map(|r| (r.server.clone(), r))
            .collect();

        let result = finish(selections, servers_used, server_results, started);
        info!(
            success = result.success,
            duration_ms = result.total_time_ms,
            "Distributed request completed"
        );
        result
    }

    fn call_timeout(&self, request: &ToolRequest) -> Duration {
        let ms = request
            .context
            .get("timeoutMs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.config.call_timeout_ms);
        Duration::from_millis(ms)
    }

    async fn execute_on_server(
        &self,
        server: &str,
        tools: &[String],
        request: &ToolRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ServerResult {
        let started = Instant::now();
        let Some(endpoint) = self.servers.get(server).map(|s| s.endpoint.clone()) else {
            warn!(server = %server, "Tool server not registered");
            return ServerResult::failed(
                server,
                &McpError::ServerNotFound(server.to_string()),
                Vec::new(),
                started,
            );
        };

        let mut outputs = Vec::with_capacity(tools.len());
        for tool in tools {
            let call_started = Instant::now();
            match self.call_tool(&endpoint, tool, request, timeout, cancel).await {
                Ok(output) => {
                    debug!(server = %server, tool = %tool, "Tool call succeeded");
                    outputs.push(ToolOutput {
                        tool: tool.clone(),
                        output,
                        execution_time_ms: call_started.elapsed().as_millis() as u64,
                    });
                }
                Err(e) if e.is_cancellation() => {
                    debug!(server = %server, tool = %tool, "Tool call cancelled");
                    return ServerResult::failed(server, &e, outputs, started);
                }
                Err(e) => {
                    warn!(server = %server, tool = %tool, error = %e, "Tool call failed");
                    return ServerResult::failed(server, &e, outputs, started);
                }
            }
        }

        ServerResult {
            server: server.to_string(),
            success: true,
            outputs,
            error: None,
            cancelled: false,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn call_tool(
        &self,
        endpoint: &str,
        tool: &str,
        request: &ToolRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> McpResult<String> {
        let _permit = tokio::select! {
            permit = self.outbound.acquire() => permit.map_err(|_| McpError::Cancelled)?,
            _ = cancel.cancelled() => return Err(McpError::Cancelled),
        };

        let parameters = build_parameters(tool, request);
        let call = tokio::time::timeout(
            timeout,
            self.transport.execute_tool(endpoint, tool, parameters),
        );

        tokio::select! {
            outcome = call => outcome.unwrap_or(Err(McpError::Timeout(timeout.as_millis() as u64))),
            _ = cancel.cancelled() => Err(McpError::Cancelled),
        }
    }

    /// Check every registered server with a capability listing.
    ///
    /// Updates each descriptor's health flag and timestamp; unhealthy
    /// servers stay registered. Returns the health of each checked server.
    pub async fn check_health(&self) -> HashMap<String, bool> {
        let targets: Vec<(String, String)> = self
            .servers
            .iter()
            .map(|s| (s.name.clone(), s.endpoint.clone()))
            .collect();
        let timeout = Duration::from_millis(self.config.call_timeout_ms);

        let checks = targets.into_iter().map(|(name, endpoint)| async move {
            let healthy = match tokio::time::timeout(timeout, self.transport.list_tools(&endpoint))
                .await
            {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(server = %name, error = %e, "Tool server health check failed");
                    false
                }
                Err(_) => {
                    warn!(server = %name, "Tool server health check timed out");
                    false
                }
            };
            (name, healthy)
        });

        let results: HashMap<String, bool> = join_all(checks).await.into_iter().collect();

        let now = Utc::now();
        for (name, healthy) in &results {
            if let Some(mut server) = self.servers.get_mut(name) {
                server.healthy = *healthy;
                server.last_health_check = Some(now);
            }
        }

        debug!(
            healthy = results.values().filter(|h| **h).count(),
            total = results.len(),
            "Tool server health check complete"
        );
        results
    }
}

/// Group selections by server, keeping first-seen server order and
/// analysis order within each server.
fn group_by_server(selections: &[ToolSelection]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for selection in selections {
        match groups.iter_mut().find(|(server, _)| *server == selection.server) {
            Some((_, tools)) => tools.push(selection.tool.clone()),
            None => groups.push((selection.server.clone(), vec![selection.tool.clone()])),
        }
    }
    groups
}

fn finish(
    tools_used: Vec<ToolSelection>,
    servers_used: Vec<String>,
    server_results: BTreeMap<String, ServerResult>,
    started: Instant,
) -> OrchestratedResult {
    let success = server_results.values().all(|r| r.success);
    let content = synthesize(&servers_used, &server_results);
    OrchestratedResult {
        success,
        content,
        server_results,
        servers_used,
        tools_used,
        total_time_ms: started.elapsed().as_millis() as u64,
    }
}

/// Render per-server outcomes into one report, in server order.
fn synthesize(servers_used: &[String], results: &BTreeMap<String, ServerResult>) -> String {
    let mut sections = Vec::with_capacity(servers_used.len());
    for server in servers_used {
        let Some(result) = results.get(server) else {
            continue;
        };
        if result.success {
            let mut section = format!("## {} results\n", server);
            for output in &result.outputs {
                section.push_str(&format!("\n### {}\n{}\n", output.tool, output.output));
            }
            sections.push(section);
        } else {
            sections.push(format!(
                "## {} error\n{}\n",
                server,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    sections.join("\n")
}
