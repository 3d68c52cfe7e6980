//! Error types for a3sist-core
//!
//! Every error carries a stable machine-readable code so that failures can
//! be surfaced to callers as a summarized message plus code, never as a raw
//! error chain.

use a3sist_tools::McpError;
use std::any::Any;
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// No agent registered under this name
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    /// Agent is registered but could not be constructed or initialized
    #[error("agent '{name}' is not available: {reason}")]
    AgentUnavailable {
        /// Agent name
        name: String,
        /// Why construction failed
        reason: String,
    },

    /// Registration rejected
    #[error("invalid agent registration: {0}")]
    InvalidRegistration(String),

    /// Queue is at capacity
    #[error("queue is full ({0} items)")]
    QueueFull(usize),

    /// Queue no longer accepts or yields work
    #[error("queue is closed")]
    QueueClosed,

    /// No tracked task with this id
    #[error("task '{0}' not found")]
    TaskNotFound(String),

    /// Workflow planning or execution failed
    #[error("workflow error: {0}")]
    Workflow(String),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Operation exceeded its time budget
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Caller passed an invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Remote tool failure
    #[error("tool error: {0}")]
    Tool(#[from] McpError),

    /// Internal error (serialization, panics caught at a boundary, etc.)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Code carried by results of cancelled operations
pub const CANCELLED_CODE: &str = "CANCELLED";

impl Error {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AgentNotFound(_) => "AGENT_NOT_FOUND",
            Self::AgentUnavailable { .. } => "AGENT_UNAVAILABLE",
            Self::InvalidRegistration(_) => "INVALID_REGISTRATION",
            Self::QueueFull(_) => "QUEUE_FULL",
            Self::QueueClosed => "QUEUE_CLOSED",
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::Workflow(_) => "WORKFLOW_FAILED",
            Self::Cancelled => CANCELLED_CODE,
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Tool(McpError::Cancelled) => CANCELLED_CODE,
            Self::Tool(_) => "TOOL_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is a cancellation rather than a failure
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Tool(e) => e.is_cancellation(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Text of a panic payload caught with `catch_unwind`
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::AgentNotFound("x".into()).code(), "AGENT_NOT_FOUND");
        assert_eq!(Error::QueueFull(10).code(), "QUEUE_FULL");
        assert_eq!(Error::TaskNotFound("1".into()).code(), "TASK_NOT_FOUND");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
        assert_eq!(
            Error::Tool(McpError::Http { status: 500 }).code(),
            "TOOL_ERROR"
        );
    }

    #[test]
    fn test_cancellation_is_distinguished() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::Tool(McpError::Cancelled).is_cancellation());
        assert_eq!(Error::Tool(McpError::Cancelled).code(), CANCELLED_CODE);
        assert!(!Error::Timeout(100).is_cancellation());
        assert!(!Error::Tool(McpError::Timeout(100)).is_cancellation());
    }

    #[test]
    fn test_messages() {
        let error = Error::AgentUnavailable {
            name: "tool-agent".into(),
            reason: "missing dependency".into(),
        };
        assert_eq!(
            error.to_string(),
            "agent 'tool-agent' is not available: missing dependency"
        );
        assert_eq!(Error::QueueFull(3).to_string(), "queue is full (3 items)");
    }

    #[test]
    fn test_tool_error_conversion() {
        let error: Error = McpError::ServerNotFound("knowledge".into()).into();
        assert!(matches!(error, Error::Tool(McpError::ServerNotFound(_))));
        assert!(error.to_string().contains("knowledge"));
    }
}
