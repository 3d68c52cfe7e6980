//! Integration tests for a3sist
//!
//! These tests wire the engine together the way the binary does and run it
//! against fake tool servers:
//! - a3sist-tools: HTTP transport, tool analysis, distributed execution
//! - a3sist-core: dispatcher, queue, processor, agent routing, workflows

use std::sync::Arc;
use std::time::Duration;

use a3sist_core::{
    AgentDependencies, AgentFactory, AgentOrchestrator, AgentOrchestratorConfig, AgentRegistry,
    CacheConfig, Dispatcher, PriorityTaskQueue, ProcessorConfig, QueueConfig, QueueService,
    Request, SingleFlightCache, TaskOutcome, TaskProcessor, TaskStatus, TaskTracker, ToolAgent,
    WorkflowConfig, WorkflowEngine, TASK_ID_KEY, TOOL_ORCHESTRATOR, WORKFLOW_KEY,
};
use a3sist_tools::{ToolOrchestrator, ToolOrchestratorConfig, ToolServerConfig};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Engine {
    dispatcher: Arc<Dispatcher>,
    processor: Arc<TaskProcessor>,
    queue: Arc<PriorityTaskQueue>,
    tools: Arc<ToolOrchestrator>,
    outcomes: mpsc::Receiver<TaskOutcome>,
    shutdown: CancellationToken,
}

impl Engine {
    fn start_processor(&self) {
        tokio::spawn(self.processor.clone().run(self.shutdown.clone()));
    }

    async fn next_outcome(&mut self) -> TaskOutcome {
        tokio::time::timeout(Duration::from_secs(5), self.outcomes.recv())
            .await
            .expect("outcome within 5s")
            .expect("outcome channel open")
    }
}

fn engine(servers: Vec<ToolServerConfig>, call_timeout: Duration) -> Engine {
    let tools = Arc::new(
        ToolOrchestrator::new(
            ToolOrchestratorConfig::new()
                .with_servers(servers)
                .with_call_timeout(call_timeout),
        )
        .unwrap(),
    );

    let registry = Arc::new(AgentRegistry::new());
    registry.register(ToolAgent::agent_type(), None).unwrap();
    let factory = AgentFactory::new(
        registry.clone(),
        AgentDependencies::new().with(TOOL_ORCHESTRATOR, tools.clone()),
    );
    let agents = Arc::new(AgentOrchestrator::new(
        factory,
        Arc::new(SingleFlightCache::new(CacheConfig::default())),
        AgentOrchestratorConfig::default()
            .with_default_agent("tool-agent")
            .with_coalesce_requests(false),
    ));

    let queue = Arc::new(PriorityTaskQueue::new(
        QueueConfig::default().with_dequeue_timeout(Duration::from_millis(50)),
    ));
    let tracker = Arc::new(TaskTracker::new());
    let (tx, outcomes) = mpsc::channel(16);
    let processor = Arc::new(
        TaskProcessor::new(
            queue.clone(),
            agents.clone(),
            tracker.clone(),
            ProcessorConfig::default().with_max_concurrent_tasks(2),
        )
        .with_outcomes(tx),
    );
    let workflows = Arc::new(WorkflowEngine::new(
        agents.clone(),
        registry,
        WorkflowConfig::default().with_retry_delay(Duration::from_millis(10)),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        workflows,
        agents,
        tracker,
    ));

    Engine {
        dispatcher,
        processor,
        queue,
        tools,
        outcomes,
        shutdown: CancellationToken::new(),
    }
}

async fn tool_server(tool: &str, output: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/execute", "params": {"name": tool}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": output})))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Direct dispatch
// ============================================================================

#[tokio::test]
async fn test_direct_dispatch_fans_out_to_tool_servers() {
    let core = tool_server("code_analysis", "no issues found").await;
    let git = tool_server("git_operations", "working tree clean").await;
    let engine = engine(
        vec![
            ToolServerConfig::new("core-development", core.uri())
                .with_tools(["code_analysis", "refactor_suggestions"]),
            ToolServerConfig::new("git-devops", git.uri()).with_tools(["git_operations"]),
        ],
        Duration::from_secs(5),
    );

    let request = Request::new("analyze the git history").with_preferred_agent("tool-agent");
    let result = engine
        .dispatcher
        .dispatch(request, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.agent_name.as_deref(), Some("tool-agent"));
    assert_eq!(result.metadata["action"], json!("direct"));
    let content = result.content.unwrap();
    assert!(content.contains("## core-development results"));
    assert!(content.contains("no issues found"));
    assert!(content.contains("## git-devops results"));
    assert!(content.contains("working tree clean"));
    // Direct work never touches the queue
    assert_eq!(engine.queue.statistics().total_enqueued, 0);
}

#[tokio::test]
async fn test_server_error_yields_failure_result() {
    let core = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&core)
        .await;
    let engine = engine(
        vec![ToolServerConfig::new("core-development", core.uri())],
        Duration::from_secs(5),
    );

    let request = Request::new("refactor this function").with_preferred_agent("tool-agent");
    let result = engine
        .dispatcher
        .dispatch(request, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("TOOL_ERROR"));
    assert!(result.requires_review);
    assert!(result.message.contains("core-development"));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let core = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&core)
        .await;
    let engine = engine(
        vec![ToolServerConfig::new("core-development", core.uri())],
        Duration::from_millis(100),
    );

    let request = Request::new("analyze this").with_preferred_agent("tool-agent");
    let result = engine
        .dispatcher
        .dispatch(request, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert!(result.content.unwrap().contains("## core-development error"));
}

// ============================================================================
// Queued processing
// ============================================================================

#[tokio::test]
async fn test_enqueued_request_is_processed() {
    let core = tool_server("code_analysis", "looks fine").await;
    let mut engine = engine(
        vec![ToolServerConfig::new("core-development", core.uri())],
        Duration::from_secs(5),
    );
    engine.start_processor();

    let request = Request::new("urgent: analyze module");
    let id = request.id;
    let result = engine
        .dispatcher
        .dispatch(request, &CancellationToken::new())
        .await;
    assert!(result.success);
    assert_eq!(result.metadata["priority"], json!("Critical"));
    assert_eq!(result.metadata["taskId"], json!(id));

    let outcome = engine.next_outcome().await;
    assert_eq!(outcome.request_id, id);
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert!(outcome.result.content.unwrap().contains("looks fine"));
    assert_eq!(
        engine.dispatcher.tracker().status(id),
        Some(TaskStatus::Completed)
    );

    engine.shutdown.cancel();
}

#[tokio::test]
async fn test_cancel_and_status_of_queued_task() {
    let engine = engine(Vec::new(), Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let request = Request::new("analyze later");
    let id = request.id;
    engine.dispatcher.dispatch(request, &cancel).await;
    assert_eq!(engine.queue.len(), 1);

    let status = engine
        .dispatcher
        .dispatch(
            Request::new("check status").with_context(TASK_ID_KEY, json!(id)),
            &cancel,
        )
        .await;
    assert!(status.message.starts_with("Queue status: 1 queued"));
    assert_eq!(status.metadata["task"]["status"], json!("queued"));

    let cancelled = engine
        .dispatcher
        .dispatch(
            Request::new("cancel it").with_context(TASK_ID_KEY, json!(id)),
            &cancel,
        )
        .await;
    assert!(cancelled.success, "{:?}", cancelled);
    assert!(cancelled.message.contains("removed from the queue"));
    assert!(engine.queue.is_empty());
    assert_eq!(
        engine.dispatcher.tracker().status(id),
        Some(TaskStatus::Cancelled)
    );
}

// ============================================================================
// Workflows
// ============================================================================

#[tokio::test]
async fn test_staged_workflow_runs_against_tool_servers() {
    let core = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "analysis done"})))
        .expect(2)
        .mount(&core)
        .await;
    let engine = engine(
        vec![ToolServerConfig::new("core-development", core.uri())],
        Duration::from_secs(5),
    );

    let request = Request::new("coordinate the analysis").with_context(
        WORKFLOW_KEY,
        json!({"steps": [
            {"name": "scan", "agent": "tool-agent", "stage": 0},
            {"name": "report", "agent": "tool-agent", "stage": 1}
        ]}),
    );
    let result = engine
        .dispatcher
        .dispatch(request, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.metadata["action"], json!("workflow"));
    assert!(result.message.contains("2/2 steps succeeded"));
    assert!(result.content.unwrap().contains("analysis done"));
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_check_marks_unreachable_servers() {
    let up = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
        .mount(&up)
        .await;
    let down = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&down)
        .await;

    let engine = engine(
        vec![
            ToolServerConfig::new("knowledge", up.uri()),
            ToolServerConfig::new("git-devops", down.uri()),
        ],
        Duration::from_secs(5),
    );

    let health = engine.tools.check_health().await;
    assert_eq!(health.get("knowledge"), Some(&true));
    assert_eq!(health.get("git-devops"), Some(&false));
    assert_eq!(engine.tools.healthy_servers(), vec!["knowledge".to_string()]);
}
