//! A3sist Tools - Remote Tool Server Fan-out
//!
//! This crate provides the tool layer of the a3sist engine:
//! - Analysis: mapping a request to the remote tools it needs
//! - Orchestration: concurrent per-server execution and result synthesis
//! - Transport: the JSON-over-HTTP tool protocol

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod mcp;
pub mod request;

pub use mcp::{
    McpError, McpResult, OrchestratedResult, ServerResult, ToolOrchestrator,
    ToolOrchestratorConfig, ToolServerConfig, ToolServerDescriptor,
};
pub use request::ToolRequest;
