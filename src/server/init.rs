//! Runtime wiring and the `serve` loop
//!
//! ```text
//! stdin ──▶ Dispatcher ──▶ PriorityTaskQueue ──▶ TaskProcessor ──▶ AgentOrchestrator ──▶ ToolAgent ──▶ tool servers
//!               │                                      │
//!               └── direct / workflow ─────────────────┘
//! ```

use super::background_tasks::{start_cleanup_task, start_health_check_task, start_rebalance_task};
use super::config::AppConfig;
use super::validation::validate_config;
use a3sist_core::{
    wait_for_shutdown_signal, AgentDependencies, AgentFactory, AgentOrchestrator, AgentRegistry,
    AgentResult, Dispatcher, Error, PriorityTaskQueue, QueueService, Request, ShutdownController,
    SingleFlightCache, TaskOutcome, TaskProcessor, TaskTracker, ToolAgent, WorkflowEngine,
    TOOL_ORCHESTRATOR,
};
use a3sist_tools::ToolOrchestrator;
use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker as InFlight;
use tracing::{debug, info, warn};

/// Capacity of the processor outcome channel
const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// Poll interval while waiting for queued work to finish
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Every long-lived component of a running engine
pub struct Runtime {
    pub config: AppConfig,
    pub tools: Arc<ToolOrchestrator>,
    pub registry: Arc<AgentRegistry>,
    pub agents: Arc<AgentOrchestrator>,
    pub queue: Arc<PriorityTaskQueue>,
    pub tracker: Arc<TaskTracker>,
    pub processor: Arc<TaskProcessor>,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: Arc<ShutdownController>,
    outcomes: Option<mpsc::Receiver<TaskOutcome>>,
}

impl Runtime {
    /// Validate the configuration and build every component
    pub fn build(config: AppConfig) -> Result<Self> {
        validate_config(&config)?;

        let tools = Arc::new(
            ToolOrchestrator::new(config.tools.clone())
                .context("Failed to create tool orchestrator")?,
        );

        let registry = Arc::new(AgentRegistry::new());
        let tool_agent = registry
            .register(ToolAgent::agent_type(), None)
            .context("Failed to register tool agent")?;
        debug!(agent = %tool_agent, "Built-in agent registered");

        let dependencies = AgentDependencies::new().with(TOOL_ORCHESTRATOR, tools.clone());
        let factory = AgentFactory::new(registry.clone(), dependencies);
        let cache = Arc::new(SingleFlightCache::new(config.cache.clone()));
        let agents = Arc::new(AgentOrchestrator::new(
            factory,
            cache,
            config.agents.clone(),
        ));

        let queue = Arc::new(PriorityTaskQueue::new(config.queue.clone()));
        let tracker = Arc::new(TaskTracker::new());
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);
        let processor = Arc::new(
            TaskProcessor::new(
                queue.clone(),
                agents.clone(),
                tracker.clone(),
                config.processor.clone(),
            )
            .with_outcomes(outcome_tx),
        );

        let workflows = Arc::new(WorkflowEngine::new(
            agents.clone(),
            registry.clone(),
            config.workflow.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            workflows,
            agents.clone(),
            tracker.clone(),
        ));

        let shutdown = ShutdownController::with_drain_timeout(config.shutdown.drain_timeout());

        Ok(Self {
            config,
            tools,
            registry,
            agents,
            queue,
            tracker,
            processor,
            dispatcher,
            shutdown,
            outcomes: Some(outcome_rx),
        })
    }

    /// Start the processor loop under the shutdown controller
    pub fn start_processor(&self) {
        let processor = self.processor.clone();
        let token = self.shutdown.token();
        self.shutdown
            .spawn("task-processor", async move { processor.run(token).await });
        info!(
            max_concurrent_tasks = self.processor.max_concurrent_tasks(),
            "Task processor started"
        );
    }

    /// Start the periodic maintenance loops
    pub fn start_background_tasks(&self) {
        start_health_check_task(&self.tools, &self.agents, &self.shutdown);
        start_cleanup_task(
            self.agents.cache(),
            &self.tracker,
            self.config.maintenance.task_retention(),
            &self.shutdown,
        );
        if let Some(interval) = self.config.maintenance.rebalance_interval() {
            let queue: Arc<dyn QueueService> = self.queue.clone();
            start_rebalance_task(&queue, interval, &self.shutdown);
        }
    }

    /// Take the processor outcome stream; only the first call gets it
    pub fn take_outcomes(&mut self) -> Option<mpsc::Receiver<TaskOutcome>> {
        self.outcomes.take()
    }

    /// Whether any tracked task is still queued or running
    pub fn has_pending_tasks(&self) -> bool {
        self.tracker
            .counts()
            .iter()
            .any(|(status, count)| !status.is_terminal() && *count > 0)
    }

    /// Wait until no tracked task is queued or running
    pub async fn wait_until_idle(&self) {
        while self.has_pending_tasks() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Drain background work and release every component
    pub async fn shutdown(&self) {
        self.shutdown.shutdown().await;
        self.queue.close();
        self.agents.shutdown_all().await;
        info!("Runtime stopped");
    }
}

/// Parse one input line: a JSON request object or a bare prompt
pub fn parse_request(line: &str) -> Option<std::result::Result<Request, Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        return Some(
            serde_json::from_str::<Request>(line)
                .map_err(|e| Error::InvalidArgument(format!("malformed request: {}", e))),
        );
    }
    Some(Ok(Request::new(line)))
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "Failed to serialize output line"),
    }
}

fn print_result(request_id: Option<uuid::Uuid>, result: &AgentResult) {
    print_json(&json!({
        "event": "result",
        "requestId": request_id,
        "result": result,
    }));
}

fn print_outcome(outcome: &TaskOutcome) {
    print_json(&json!({
        "event": "outcome",
        "requestId": outcome.request_id,
        "priority": outcome.priority,
        "status": outcome.status.as_str(),
        "result": outcome.result,
    }));
}

/// Run the engine over newline-delimited requests on stdin.
///
/// Stops on Ctrl+C / SIGTERM, or at end of input once queued work is done.
pub async fn run(config: AppConfig) -> Result<()> {
    let mut runtime = Runtime::build(config)?;
    info!(
        "Starting a3sist engine v{} ({} tool servers, {} agents)",
        env!("CARGO_PKG_VERSION"),
        runtime.tools.servers().len(),
        runtime.registry.len()
    );

    runtime.start_processor();
    runtime.start_background_tasks();

    if let Some(mut outcomes) = runtime.take_outcomes() {
        let token = runtime.shutdown.token();
        runtime.shutdown.spawn("outcome-printer", async move {
            loop {
                tokio::select! {
                    biased;
                    outcome = outcomes.recv() => match outcome {
                        Some(outcome) => print_outcome(&outcome),
                        None => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    let in_flight = InFlight::new();
    let dispatch_token = runtime.shutdown.token();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let signal = wait_for_shutdown_signal();
    tokio::pin!(signal);

    let mut interrupted = false;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let request = match parse_request(&line) {
                        Some(Ok(request)) => request,
                        Some(Err(e)) => {
                            warn!(error = %e, "Rejected input line");
                            print_result(None, &AgentResult::from_error(&e));
                            continue;
                        }
                        None => continue,
                    };
                    let dispatcher = runtime.dispatcher.clone();
                    let token = dispatch_token.clone();
                    in_flight.spawn(async move {
                        let id = request.id;
                        let result = dispatcher.dispatch(request, &token).await;
                        print_result(Some(id), &result);
                    });
                }
                Ok(None) => {
                    info!("End of input");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            },
            _ = &mut signal => {
                interrupted = true;
                break;
            }
        }
    }

    if !interrupted {
        // Let dispatched and queued work finish unless interrupted meanwhile
        in_flight.close();
        let drained = async {
            in_flight.wait().await;
            runtime.wait_until_idle().await;
        };
        tokio::select! {
            _ = drained => debug!("All submitted work finished"),
            _ = &mut signal => info!("Interrupted while draining"),
        }
    }

    runtime.shutdown().await;
    in_flight.close();
    in_flight.wait().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3sist_core::TaskStatus;

    #[test]
    fn test_parse_bare_prompt() {
        let request = parse_request("  analyze this project  ").unwrap().unwrap();
        assert_eq!(request.prompt, "analyze this project");
        assert!(request.context.is_empty());
    }

    #[test]
    fn test_parse_json_request() {
        let line = r#"{"prompt":"refactor","filePath":"src/lib.rs","preferredAgent":"tool-agent","context":{"taskId":"x"}}"#;
        let request = parse_request(line).unwrap().unwrap();
        assert_eq!(request.prompt, "refactor");
        assert_eq!(request.file_path.as_deref(), Some("src/lib.rs"));
        assert_eq!(request.preferred_agent.as_deref(), Some("tool-agent"));
        assert_eq!(request.context_str("taskId"), Some("x"));
    }

    #[test]
    fn test_parse_rejects_blank_and_malformed() {
        assert!(parse_request("   ").is_none());
        let err = parse_request("{\"prompt\":").unwrap().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_runtime_builds_from_defaults() {
        let mut runtime = Runtime::build(AppConfig::default()).unwrap();
        assert_eq!(runtime.tools.servers().len(), 5);
        assert!(runtime.registry.contains("tool-agent"));
        assert!(runtime.take_outcomes().is_some());
        assert!(runtime.take_outcomes().is_none());
        assert!(!runtime.has_pending_tasks());

        runtime.tracker.track(uuid::Uuid::new_v4(), a3sist_core::Priority::Normal);
        assert!(runtime.has_pending_tasks());
        let (status, _) = runtime.tracker.counts()[0];
        assert_eq!(status, TaskStatus::Queued);

        runtime.shutdown().await;
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.processor.max_concurrent_tasks = 0;
        assert!(Runtime::build(config).is_err());
    }
}
