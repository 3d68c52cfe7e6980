use super::*;
use crate::agents::testing::EchoAgent;
use crate::agents::{
    Agent, AgentCapabilities, AgentDependencies, AgentFactory, AgentKind, AgentOrchestrator,
    AgentOrchestratorConfig, AgentType,
};
use crate::cache::{CacheConfig, SingleFlightCache};
use std::sync::atomic::Ordering;

struct Harness {
    registry: Arc<AgentRegistry>,
    agents: Vec<Arc<EchoAgent>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: Arc::new(AgentRegistry::new()),
            agents: Vec::new(),
        }
    }

    fn add(mut self, agent: EchoAgent, keywords: &[&str], weight: u32) -> Self {
        let name = agent.name().to_string();
        let agent = Arc::new(agent);
        let shared = agent.clone();
        self.registry
            .register(
                AgentType::new(name, AgentKind::General)
                    .with_capabilities(
                        AgentCapabilities::new()
                            .with_keywords(keywords.iter().copied())
                            .with_priority_weight(weight),
                    )
                    .with_constructor(move |_, _| Ok(shared.clone() as Arc<dyn Agent>)),
                None,
            )
            .unwrap();
        self.agents.push(agent);
        self
    }

    fn agent(&self, name: &str) -> &EchoAgent {
        self.agents
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
            .unwrap()
    }

    fn engine(&self, config: WorkflowConfig) -> Arc<WorkflowEngine> {
        let factory = AgentFactory::new(self.registry.clone(), AgentDependencies::new());
        let orchestrator = AgentOrchestrator::new(
            factory,
            Arc::new(SingleFlightCache::new(CacheConfig::default())),
            AgentOrchestratorConfig::default().with_coalesce_requests(false),
        );
        Arc::new(WorkflowEngine::new(
            Arc::new(orchestrator),
            self.registry.clone(),
            config,
        ))
    }
}

fn fast_retries() -> WorkflowConfig {
    WorkflowConfig::default().with_retry_delay(Duration::from_millis(5))
}

fn with_plan(prompt: &str, steps: serde_json::Value) -> Request {
    Request::new(prompt).with_context(WORKFLOW_KEY, json!({ "steps": steps }))
}

#[test]
fn test_default_config() {
    let config = WorkflowConfig::default();
    assert_eq!(config.default_retries, 1);
    assert_eq!(config.retry_delay_ms, 500);
    assert!(!config.stop_on_failure);
}

#[test]
fn test_plan_from_context() {
    let harness = Harness::new();
    let request = with_plan(
        "run",
        json!([
            {"name": "test", "agent": "tester", "stage": 2},
            {"name": "analyze", "agent": "analyst"},
            {"name": "lint", "agent": "linter", "stage": 2, "retries": 3},
            {"name": "refactor", "agent": "refactorer", "stage": 1}
        ]),
    );

    let plan = WorkflowPlan::from_request(&request, &harness.registry).unwrap();
    assert_eq!(plan.steps.len(), 4);
    assert_eq!(plan.steps[2].retries, Some(3));
    assert_eq!(plan.stages(), vec![vec![1], vec![3], vec![0, 2]]);
}

#[test]
fn test_invalid_plans_are_rejected() {
    let harness = Harness::new();
    for steps in [
        json!([]),
        json!([{"name": "a", "agent": ""}]),
        json!([{"name": "a", "agent": "x"}, {"name": "a", "agent": "y"}]),
        json!("not a list"),
    ] {
        let err = WorkflowPlan::from_request(&with_plan("run", steps), &harness.registry)
            .unwrap_err();
        assert!(matches!(err, Error::Workflow(_)), "unexpected error {:?}", err);
    }
}

#[test]
fn test_plan_derived_from_registry() {
    let harness = Harness::new()
        .add(EchoAgent::new("light"), &["build"], 1)
        .add(EchoAgent::new("heavy"), &["build"], 5)
        .add(EchoAgent::new("other"), &["docs"], 9);

    let plan = WorkflowPlan::from_request(&Request::new("build it"), &harness.registry).unwrap();
    assert_eq!(
        plan.steps,
        vec![
            WorkflowStep::new("heavy", "heavy", 0),
            WorkflowStep::new("light", "light", 1),
        ]
    );

    let err = WorkflowPlan::from_request(&Request::new("nothing"), &harness.registry)
        .unwrap_err();
    assert_eq!(err.code(), "WORKFLOW_FAILED");
}

#[tokio::test]
async fn test_stages_pass_previous_result() {
    let harness = Harness::new()
        .add(EchoAgent::new("a"), &[], 0)
        .add(EchoAgent::new("b"), &[], 0);
    let engine = harness.engine(fast_retries());
    let request = with_plan(
        "improve",
        json!([
            {"name": "first", "agent": "a", "stage": 0},
            {"name": "second", "agent": "b", "stage": 1}
        ]),
    );

    let result = engine
        .execute_workflow(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.workflow_id, request.id);
    assert_eq!(result.succeeded(), 2);
    assert_eq!(
        result.final_output(),
        Some("b: improve (after a: improve)")
    );
    assert!(result.steps.iter().all(|s| s.started_at.is_some() && s.completed_at.is_some()));
    assert!(engine.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_steps_in_a_stage_run_concurrently() {
    let harness = Harness::new()
        .add(EchoAgent::new("p1").with_delay(Duration::from_millis(50)), &[], 0)
        .add(EchoAgent::new("p2").with_delay(Duration::from_millis(50)), &[], 0);
    let engine = harness.engine(fast_retries());
    let request = with_plan(
        "scan",
        json!([
            {"name": "one", "agent": "p1"},
            {"name": "two", "agent": "p2"}
        ]),
    );

    let started = tokio::time::Instant::now();
    let result = engine
        .execute_workflow(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_failed_step_is_retried() {
    let harness = Harness::new().add(EchoAgent::new("flaky").failing(1), &[], 0);
    let engine = harness.engine(fast_retries());
    let request = with_plan("go", json!([{"name": "only", "agent": "flaky", "retries": 1}]));

    let result = engine
        .execute_workflow(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.steps[0].attempts, 2);
    assert_eq!(harness.agent("flaky").calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_step_fails_workflow_but_others_run() {
    let harness = Harness::new()
        .add(EchoAgent::new("broken").failing(10), &[], 0)
        .add(EchoAgent::new("fine"), &[], 0);
    let engine = harness.engine(fast_retries().with_default_retries(2));
    let request = with_plan(
        "go",
        json!([
            {"name": "bad", "agent": "broken", "stage": 0},
            {"name": "good", "agent": "fine", "stage": 1}
        ]),
    );

    let result = engine
        .execute_workflow(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.steps[0].status, WorkflowStatus::Failed);
    assert_eq!(result.steps[0].attempts, 3);
    assert_eq!(
        result.steps[0].result.as_ref().unwrap().error_code.as_deref(),
        Some("INTERNAL_ERROR")
    );
    assert_eq!(result.steps[1].status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_stop_on_failure_cancels_later_stages() {
    let harness = Harness::new()
        .add(EchoAgent::new("broken").failing(10), &[], 0)
        .add(EchoAgent::new("fine"), &[], 0);
    let engine = harness.engine(
        fast_retries()
            .with_default_retries(0)
            .with_stop_on_failure(true),
    );
    let request = with_plan(
        "go",
        json!([
            {"name": "bad", "agent": "broken", "stage": 0},
            {"name": "good", "agent": "fine", "stage": 1}
        ]),
    );

    let result = engine
        .execute_workflow(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.steps[1].status, WorkflowStatus::Cancelled);
    assert_eq!(result.steps[1].attempts, 0);
    assert_eq!(harness.agent("fine").calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_lets_running_step_finish() {
    let harness = Harness::new()
        .add(EchoAgent::new("slow").with_delay(Duration::from_millis(50)), &[], 0)
        .add(EchoAgent::new("next"), &[], 0);
    let engine = harness.engine(fast_retries());
    let request = with_plan(
        "go",
        json!([
            {"name": "running", "agent": "slow", "stage": 0},
            {"name": "pending", "agent": "next", "stage": 1}
        ]),
    );
    let id = request.id;

    let handle = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute_workflow(&request, &CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.running(), vec![id]);
    assert!(engine.cancel_workflow(id));

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, WorkflowStatus::Cancelled);
    assert!(!result.success);
    assert_eq!(result.steps[0].status, WorkflowStatus::Completed);
    assert_eq!(result.steps[1].status, WorkflowStatus::Cancelled);
    assert_eq!(harness.agent("next").calls.load(Ordering::SeqCst), 0);
    assert!(!engine.cancel_workflow(id));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_last_stage_keeps_completed_status() {
    let harness = Harness::new().add(
        EchoAgent::new("slow").with_delay(Duration::from_millis(50)),
        &[],
        0,
    );
    let engine = harness.engine(fast_retries());
    let request = with_plan("go", json!([{"name": "only", "agent": "slow", "stage": 0}]));
    let id = request.id;

    let handle = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute_workflow(&request, &CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(engine.cancel_workflow(id));

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert!(result.success);
    assert_eq!(result.steps[0].status, WorkflowStatus::Completed);
}

#[test]
fn test_step_request_carries_context() {
    let request = with_plan("go", json!([])).with_content("body");
    let step = WorkflowStep::new("s", "agent-x", 0);

    let derived = step_request(&request, &step, Some("earlier"));
    assert_ne!(derived.id, request.id);
    assert_eq!(derived.preferred_agent.as_deref(), Some("agent-x"));
    assert_eq!(derived.content.as_deref(), Some("body"));
    assert_eq!(derived.context_str(PREVIOUS_RESULT_KEY), Some("earlier"));
    assert_eq!(derived.context_str("workflowStep"), Some("s"));
    assert!(!derived.context.contains_key(WORKFLOW_KEY));
}
