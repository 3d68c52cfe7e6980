//! Remote tool servers
//!
//! Tool servers speak a small JSON-over-HTTP protocol: every call is a
//! `POST {endpoint}/mcp` carrying `{"method": ..., "params": ...}` and the
//! reply carries a `result` field.
//!
//! ## Usage
//!
//! ```no_run
//! use a3sist_tools::mcp::{ToolOrchestrator, ToolOrchestratorConfig};
//! use a3sist_tools::ToolRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = ToolOrchestrator::new(ToolOrchestratorConfig::default())?;
//! let request = ToolRequest::new("analyze this and check git status");
//!
//! let result = orchestrator
//!     .process_distributed(&request, &CancellationToken::new())
//!     .await;
//! println!("{}", result.content);
//! # Ok(())
//! # }
//! ```

mod analysis;
mod orchestrator;
mod parameters;
mod protocol;
mod server;
mod transport;

pub use analysis::{ToolAnalyzer, ToolSelection, DEFAULT_LONG_CONTENT_THRESHOLD};
pub use orchestrator::{
    OrchestratedResult, ServerResult, ToolOrchestrator, ToolOrchestratorConfig, ToolOutput,
};
pub use parameters::build_parameters;
pub use protocol::{
    McpError, McpExecuteParams, McpRequest, McpResponse, McpResult, MCP_PATH, METHOD_EXECUTE,
    METHOD_LIST,
};
pub use server::{default_servers, ToolServerConfig, ToolServerDescriptor};
pub use transport::{HttpTransport, ToolTransport};
