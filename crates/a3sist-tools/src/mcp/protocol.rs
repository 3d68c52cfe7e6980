//! Tool Server Protocol Types
//!
//! Wire format spoken with remote tool servers. Every call is a single
//! HTTP POST to `{endpoint}/mcp` carrying a method envelope:
//!
//! ```text
//! {"method":"tools/execute","params":{"name":"code_analysis","parameters":{...}}}
//! {"method":"tools/list"}
//! ```
//!
//! Responses are JSON objects whose `result` field holds the tool output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Method used to run a tool on a server
pub const METHOD_EXECUTE: &str = "tools/execute";

/// Method used as a lightweight capability listing / health check
pub const METHOD_LIST: &str = "tools/list";

/// Path appended to every server endpoint
pub const MCP_PATH: &str = "/mcp";

/// Tool server error type
#[derive(Debug, Error)]
pub enum McpError {
    /// Server is not registered with the orchestrator
    #[error("Server '{0}' not found")]
    ServerNotFound(String),

    /// Server answered with a non-success HTTP status
    #[error("Server returned HTTP {status}")]
    Http {
        /// HTTP status code
        status: u16,
    },

    /// Connection-level failure (DNS, refused, reset, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body did not match the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Call exceeded its deadline
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Call was abandoned because the caller cancelled
    #[error("Request cancelled")]
    Cancelled,
}

impl McpError {
    /// Whether this error is a cancellation rather than a failure
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// MCP Result type
pub type McpResult<T> = std::result::Result<T, McpError>;

/// Request envelope sent to a tool server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpRequest {
    /// Protocol method
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<McpExecuteParams>,
}

impl McpRequest {
    /// Build a `tools/execute` request
    pub fn execute(tool: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            method: METHOD_EXECUTE.to_string(),
            params: Some(McpExecuteParams {
                name: tool.into(),
                parameters,
            }),
        }
    }

    /// Build a `tools/list` request
    pub fn list() -> Self {
        Self {
            method: METHOD_LIST.to_string(),
            params: None,
        }
    }
}

/// Parameters of a `tools/execute` call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpExecuteParams {
    /// Tool identifier
    pub name: String,
    /// Tool-specific parameter object
    pub parameters: serde_json::Value,
}

/// Response body returned by a tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    /// Tool output, used verbatim
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl McpResponse {
    /// Extract the `result` field as text.
    ///
    /// String results are returned as-is; any other JSON value is rendered
    /// compactly. A missing or null `result` is a protocol error.
    pub fn into_text(self) -> McpResult<String> {
        match self.result {
            Some(serde_json::Value::String(text)) => Ok(text),
            Some(serde_json::Value::Null) | None => Err(McpError::Protocol(
                "response is missing the 'result' field".to_string(),
            )),
            Some(other) => Ok(other.to_string()),
        }
    }
}
