//! `a3sist dispatch`: run one request through the engine
//!
//! Queued requests are followed until the processor reports their outcome.

use crate::server::config::AppConfig;
use crate::server::Runtime;
use a3sist_core::{wait_for_shutdown_signal, AgentResult, Request, TaskOutcome};
use anyhow::bail;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Arguments of a single dispatch
#[derive(Debug, Clone)]
pub struct DispatchArgs {
    pub prompt: String,
    pub content: Option<String>,
    pub file: Option<String>,
    pub agent: Option<String>,
}

impl DispatchArgs {
    pub fn into_request(self) -> Request {
        let mut request = Request::new(self.prompt);
        if let Some(content) = self.content {
            request = request.with_content(content);
        }
        if let Some(file) = self.file {
            request = request.with_file_path(file);
        }
        if let Some(agent) = self.agent {
            request = request.with_preferred_agent(agent);
        }
        request
    }
}

/// Id of the task a dispatch result put on the queue, if any
fn queued_task(result: &AgentResult) -> Option<Uuid> {
    if !result.success {
        return None;
    }
    let action = result.metadata.get("action").and_then(|v| v.as_str())?;
    if action != "enqueue" && action != "retry" {
        return None;
    }
    result
        .metadata
        .get("taskId")
        .and_then(|v| v.as_str())
        .and_then(|id| Uuid::parse_str(id).ok())
}

async fn wait_for_outcome(outcomes: &mut mpsc::Receiver<TaskOutcome>, id: Uuid) -> Option<TaskOutcome> {
    while let Some(outcome) = outcomes.recv().await {
        if outcome.request_id == id {
            return Some(outcome);
        }
    }
    None
}

pub async fn run(config: AppConfig, args: DispatchArgs) -> anyhow::Result<()> {
    let mut runtime = Runtime::build(config)?;
    let mut outcomes = runtime.take_outcomes();
    runtime.start_processor();

    let token = runtime.shutdown.token();
    let result = runtime.dispatcher.dispatch(args.into_request(), &token).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    let mut final_result = result;
    if let (Some(id), Some(outcomes)) = (queued_task(&final_result), outcomes.as_mut()) {
        info!(task_id = %id, "Waiting for queued task");
        tokio::select! {
            outcome = wait_for_outcome(outcomes, id) => {
                if let Some(outcome) = outcome {
                    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
                    final_result = outcome.result;
                }
            }
            _ = wait_for_shutdown_signal() => info!("Interrupted"),
        }
    }

    runtime.shutdown().await;

    if !final_result.success {
        bail!(
            "{} ({})",
            final_result.message,
            final_result.error_code.as_deref().unwrap_or("UNKNOWN")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_into_request() {
        let request = DispatchArgs {
            prompt: "refactor this".to_string(),
            content: Some("fn main() {}".to_string()),
            file: Some("src/main.rs".to_string()),
            agent: Some("tool-agent".to_string()),
        }
        .into_request();

        assert_eq!(request.prompt, "refactor this");
        assert_eq!(request.content.as_deref(), Some("fn main() {}"));
        assert_eq!(request.file_path.as_deref(), Some("src/main.rs"));
        assert_eq!(request.preferred_agent.as_deref(), Some("tool-agent"));
    }

    #[test]
    fn test_queued_task_only_for_enqueue_actions() {
        let id = Uuid::new_v4();
        let queued = AgentResult::success("queued")
            .with_metadata("action", json!("enqueue"))
            .with_metadata("taskId", json!(id));
        assert_eq!(queued_task(&queued), Some(id));

        let direct = AgentResult::success("done")
            .with_metadata("action", json!("direct"))
            .with_metadata("taskId", json!(id));
        assert_eq!(queued_task(&direct), None);

        let failed = AgentResult::failure("full", "QUEUE_FULL").with_metadata("action", json!("enqueue"));
        assert_eq!(queued_task(&failed), None);
    }
}
