//! A3sist Core - Task Orchestration Engine
//!
//! This crate decides who handles a request and when:
//! - Dispatcher: intent classification, priority and action selection
//! - Queue & Processor: bounded priority queue drained by a resizable worker pool
//! - Agents: registry, factory and capability-based routing
//! - Cache: single-flight result coalescing
//! - Workflow: staged multi-step plans with per-step retry
//! - Shutdown: coordinated cancellation of background work

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agents;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod queue;
pub mod request;
pub mod shutdown;
pub mod tracker;
pub mod workflow;

pub use agents::{
    Agent, AgentCapabilities, AgentDependencies, AgentFactory, AgentHealth, AgentKind,
    AgentOrchestrator, AgentOrchestratorConfig, AgentRegistration, AgentRegistry, AgentType,
    ToolAgent, TOOL_AGENT_NAME, TOOL_ORCHESTRATOR,
};
pub use cache::{fingerprint, CacheConfig, CacheStats, SingleFlightCache};
pub use dispatcher::{classify, DispatchAction, Dispatcher};
pub use error::{Error, Result};
pub use processor::{ProcessorConfig, TaskHandler, TaskOutcome, TaskProcessor};
pub use queue::{
    PriorityCounts, PriorityTaskQueue, QueueConfig, QueueService, QueueStatistics, QueuedTask,
};
pub use request::{AgentResult, Priority, Request, TASK_ID_KEY};
pub use shutdown::{wait_for_shutdown_signal, ShutdownController, ShutdownPhase};
pub use tracker::{TaskSnapshot, TaskStatus, TaskTracker};
pub use workflow::{
    StepResult, WorkflowConfig, WorkflowEngine, WorkflowPlan, WorkflowResult, WorkflowService,
    WorkflowStatus, WorkflowStep, PREVIOUS_RESULT_KEY, WORKFLOW_KEY,
};
